use std::time::Duration;

use crate::config::ChatConfig;
use crate::error::ChatError;

pub(crate) const DEFAULT_MAX_RETRIES: u32 = 3;
pub(crate) const DEFAULT_RETRY_DELAY_MS: u64 = 1_000;

/// Fixed-delay retry budget for one logical send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    #[must_use]
    pub fn from_config(config: &ChatConfig) -> Self {
        Self::new(config.max_retries, config.retry_delay())
    }

    /// Delay before the next attempt, or `None` when `error` is terminal.
    ///
    /// `retries_made` counts retries already performed, not the first attempt.
    #[inline]
    #[must_use]
    pub fn next_delay(&self, error: &ChatError, retries_made: u32) -> Option<Duration> {
        (error.is_retryable() && retries_made < self.max_retries).then_some(self.delay)
    }
}
