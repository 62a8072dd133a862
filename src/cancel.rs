//! Cooperative cancellation for waits inside the layer.
//!
//! Retry delays and rate-limit waits race against a
//! [`CancellationToken`] so an abandoned operation stops at its next
//! suspension point instead of running to completion in the background.

use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Returned when a wait was interrupted by its cancellation token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("operation cancelled")]
pub struct Cancelled;

/// Sleeps for `duration`, returning early with [`Cancelled`] if `cancel` fires.
///
/// An already-cancelled token returns immediately without sleeping.
pub async fn sleep_or_cancel(
    duration: Duration,
    cancel: Option<&CancellationToken>,
) -> Result<(), Cancelled> {
    match cancel {
        Some(token) => {
            tokio::select! {
                biased;
                _ = token.cancelled() => Err(Cancelled),
                _ = tokio::time::sleep(duration) => Ok(()),
            }
        }
        None => {
            tokio::time::sleep(duration).await;
            Ok(())
        }
    }
}

/// Returns `Err(Cancelled)` if the token has already fired.
pub fn check(cancel: Option<&CancellationToken>) -> Result<(), Cancelled> {
    match cancel {
        Some(token) if token.is_cancelled() => Err(Cancelled),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_sleep_completes_without_token() {
        let start = Instant::now();
        assert_eq!(sleep_or_cancel(Duration::from_secs(2), None).await, Ok(()));
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_token_returns_immediately() {
        let token = CancellationToken::new();
        token.cancel();

        let start = Instant::now();
        let result = sleep_or_cancel(Duration::from_secs(60), Some(&token)).await;
        assert_eq!(result, Err(Cancelled));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_sleep() {
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        let result = sleep_or_cancel(Duration::from_secs(30), Some(&token)).await;
        assert_eq!(result, Err(Cancelled));
        assert!(start.elapsed() < Duration::from_secs(30));
    }

    #[test]
    fn test_check() {
        let token = CancellationToken::new();
        assert_eq!(check(None), Ok(()));
        assert_eq!(check(Some(&token)), Ok(()));
        token.cancel();
        assert_eq!(check(Some(&token)), Err(Cancelled));
    }
}
