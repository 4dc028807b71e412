use std::time::{Duration, Instant};

use tracing::info;

use crate::protocol::ProviderKind;

/// Estimate the number of tokens in `text`.
///
/// Uses a lightweight heuristic (`bytes / 4`) to avoid loading model BPE tables.
#[must_use]
pub fn estimate_tokens(text: &str) -> u64 {
    (text.len() as u64).div_ceil(4)
}

/// Counters for one logical send, across all of its retries.
#[derive(Debug, Clone)]
pub struct StreamStats {
    started: Instant,
    pub token_events: u64,
    pub content_chars: u64,
    pub reasoning_chars: u64,
    pub tool_call_updates: u64,
    pub retries: u32,
}

impl Default for StreamStats {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamStats {
    #[must_use]
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            token_events: 0,
            content_chars: 0,
            reasoning_chars: 0,
            tool_call_updates: 0,
            retries: 0,
        }
    }

    pub fn record_token(&mut self, text: &str) {
        self.token_events += 1;
        self.content_chars += text.chars().count() as u64;
    }

    pub fn record_reasoning(&mut self, text: &str) {
        self.reasoning_chars += text.chars().count() as u64;
    }

    pub fn record_tool_calls(&mut self) {
        self.tool_call_updates += 1;
    }

    pub fn record_retry(&mut self) {
        self.retries += 1;
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Log a summary for a send that reached `outcome`.
    pub fn log_finished(&self, provider: ProviderKind, outcome: &str, final_text: &str) {
        info!(
            provider = provider.as_str(),
            outcome = outcome,
            token_events = self.token_events,
            content_chars = self.content_chars,
            reasoning_chars = self.reasoning_chars,
            tool_call_updates = self.tool_call_updates,
            retries = self.retries,
            estimated_output_tokens = estimate_tokens(final_text),
            duration_seconds = self.elapsed().as_secs_f64(),
            "chat stream finished"
        );
    }
}
