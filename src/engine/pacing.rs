use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::TypingDelay;
use crate::error::ChatError;

/// Uniform random delay within the configured inclusive bounds.
#[must_use]
pub fn random_delay(bounds: TypingDelay) -> Duration {
    let millis = if bounds.min_ms >= bounds.max_ms {
        bounds.min_ms
    } else {
        fastrand::u64(bounds.min_ms..=bounds.max_ms)
    };
    Duration::from_millis(millis)
}

/// Sleep for `duration` unless `token` fires first.
///
/// # Errors
///
/// Returns [`ChatError::Abort`] when the token is cancelled before or during the sleep.
pub async fn sleep_cancellable(
    duration: Duration,
    token: &CancellationToken,
) -> Result<(), ChatError> {
    if token.is_cancelled() {
        return Err(ChatError::aborted("delay cancelled"));
    }
    if duration.is_zero() {
        return Ok(());
    }
    tokio::select! {
        biased;
        () = token.cancelled() => Err(ChatError::aborted("delay cancelled")),
        () = tokio::time::sleep(duration) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_delay_within_bounds() {
        let bounds = TypingDelay { min_ms: 10, max_ms: 20 };
        for _ in 0..200 {
            let delay = random_delay(bounds);
            assert!(delay >= Duration::from_millis(10) && delay <= Duration::from_millis(20));
        }
    }

    #[test]
    fn test_random_delay_degenerate_bounds() {
        let bounds = TypingDelay { min_ms: 5, max_ms: 5 };
        assert_eq!(random_delay(bounds), Duration::from_millis(5));
    }

    #[tokio::test]
    async fn test_sleep_completes() {
        let token = CancellationToken::new();
        assert!(sleep_cancellable(Duration::from_millis(1), &token).await.is_ok());
    }

    #[tokio::test]
    async fn test_sleep_aborts_on_cancel() {
        let token = CancellationToken::new();
        let child = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            child.cancel();
        });
        let started = std::time::Instant::now();
        let err = sleep_cancellable(Duration::from_secs(30), &token)
            .await
            .unwrap_err();
        assert!(err.is_abort());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_sleep_on_cancelled_token_fails_fast() {
        let token = CancellationToken::new();
        token.cancel();
        assert!(sleep_cancellable(Duration::ZERO, &token).await.is_err());
    }
}
