//! The retry loop.
//!
//! Attempts are strictly sequential: attempt `n + 1` starts only after attempt
//! `n` has failed and its delay has elapsed. On exhaustion the error from the
//! final attempt is returned unchanged; classification happens one layer up.

use std::convert::Infallible;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{should_retry_error, RetryConfig};
use crate::cancel::{self, Cancelled};
use crate::error::FailureDetails;

/// Failure of a cancellable retry loop.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// The last attempt failed and no retry followed.
    #[error("operation failed: {0}")]
    Failed(E),
    /// The token fired before an attempt or during a delay.
    #[error("retry cancelled")]
    Cancelled,
}

impl<E> RetryError<E> {
    /// The operation's error, if the loop ended with one.
    pub fn into_failure(self) -> Option<E> {
        match self {
            Self::Failed(error) => Some(error),
            Self::Cancelled => None,
        }
    }

    /// Returns true if the loop was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Runs `operation`, retrying every failure up to `config.max_retries` times.
pub async fn retry_with_backoff<T, E, F, Fut>(operation: F, config: &RetryConfig) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    retry_with_backoff_when(operation, config, |_: &E| true).await
}

/// Runs `operation`, retrying only failures for which `should_retry` is true.
///
/// A failure rejected by the predicate is returned immediately.
pub async fn retry_with_backoff_when<T, E, F, Fut, P>(
    operation: F,
    config: &RetryConfig,
    should_retry: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: FnMut(&E) -> bool,
{
    let outcome = run_attempts(operation, config, should_retry, |delay| async move {
        tokio::time::sleep(delay).await;
        Ok::<(), Infallible>(())
    })
    .await;

    match outcome {
        Ok(result) => result,
        Err(never) => match never {},
    }
}

/// Runs `operation` with the default predicate ([`should_retry_error`]).
pub async fn retry_with_default_policy<T, E, F, Fut>(
    operation: F,
    config: &RetryConfig,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: FailureDetails,
{
    retry_with_backoff_when(operation, config, |error: &E| {
        should_retry_error(error, config)
    })
    .await
}

/// Like [`retry_with_backoff_when`], but stops when `cancel` fires.
///
/// The token is checked before every attempt and raced against every delay.
/// An attempt already in flight is allowed to finish.
pub async fn retry_with_backoff_cancellable<T, E, F, Fut, P>(
    mut operation: F,
    config: &RetryConfig,
    should_retry: P,
    cancel: &CancellationToken,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: FnMut(&E) -> bool,
{
    cancel::check(Some(cancel)).map_err(|_| RetryError::Cancelled)?;

    let outcome = run_attempts(
        || operation(),
        config,
        should_retry,
        |delay| async move {
            cancel::sleep_or_cancel(delay, Some(cancel)).await?;
            cancel::check(Some(cancel))
        },
    )
    .await;

    match outcome {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(error)) => Err(RetryError::Failed(error)),
        Err(Cancelled) => {
            debug!("retry loop cancelled");
            Err(RetryError::Cancelled)
        }
    }
}

/// The shared attempt loop. `wait` performs the delay and may abort the loop
/// with its own error type.
async fn run_attempts<T, E, C, F, Fut, P, W, WFut>(
    mut operation: F,
    config: &RetryConfig,
    mut should_retry: P,
    mut wait: W,
) -> Result<Result<T, E>, C>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: FnMut(&E) -> bool,
    W: FnMut(Duration) -> WFut,
    WFut: Future<Output = Result<(), C>>,
{
    let mut attempt: u32 = 0;
    loop {
        let error = match operation().await {
            Ok(value) => return Ok(Ok(value)),
            Err(error) => error,
        };

        if !should_retry(&error) {
            debug!(attempt, "failure is not retryable");
            return Ok(Err(error));
        }
        if attempt >= config.max_retries {
            warn!(
                attempts = attempt + 1,
                max_retries = config.max_retries,
                "retries exhausted"
            );
            return Ok(Err(error));
        }

        let delay = config.delay_for_attempt(attempt);
        debug!(
            attempt,
            delay_ms = crate::millis(delay),
            "attempt failed, backing off"
        );
        wait(delay).await?;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NormalizedError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    fn fast_config(max_retries: u32) -> RetryConfig {
        RetryConfig::new()
            .with_max_retries(max_retries)
            .with_delays(Duration::from_millis(100), Duration::from_secs(5))
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_first_attempt() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, NormalizedError> = retry_with_backoff(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(7)
            },
            &fast_config(3),
        )
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_failing_calls_max_retries_plus_one() {
        let calls = AtomicU32::new(0);
        let result: Result<(), NormalizedError> = retry_with_backoff(
            || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                Err(NormalizedError::network(format!("attempt {n} failed")))
            },
            &fast_config(4),
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 5);
        let error = result.unwrap_err();
        assert_eq!(error.message(), "attempt 4 failed");
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retries_calls_once() {
        let calls = AtomicU32::new(0);
        let result: Result<(), &str> = retry_with_backoff(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("nope")
            },
            &fast_config(0),
        )
        .await;

        assert_eq!(result, Err("nope"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(
            || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(NormalizedError::timeout("slow"))
                } else {
                    Ok("synced")
                }
            },
            &fast_config(5),
        )
        .await;

        assert_eq!(result.unwrap(), "synced");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_predicate_rejection_returns_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), NormalizedError> = retry_with_backoff_when(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(NormalizedError::auth("expired"))
            },
            &fast_config(5),
            |error: &NormalizedError| error.is_retryable(),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_follow_backoff_schedule() {
        let config = RetryConfig::new()
            .with_max_retries(3)
            .with_delays(Duration::from_millis(100), Duration::from_millis(250));
        let stamps = std::sync::Mutex::new(Vec::new());
        let start = Instant::now();

        let _: Result<(), &str> = retry_with_backoff(
            || async {
                stamps.lock().unwrap().push(start.elapsed());
                Err("down")
            },
            &config,
        )
        .await;

        let stamps = stamps.into_inner().unwrap();
        assert_eq!(
            stamps,
            vec![
                Duration::ZERO,
                Duration::from_millis(100),
                Duration::from_millis(300),
                Duration::from_millis(550),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_policy_skips_client_errors() {
        let calls = AtomicU32::new(0);
        let result: Result<(), NormalizedError> = retry_with_default_policy(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(NormalizedError::api_failure(400, "bad request"))
            },
            &fast_config(3),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_policy_retries_rate_limit() {
        let calls = AtomicU32::new(0);
        let result: Result<(), NormalizedError> = retry_with_default_policy(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(NormalizedError::api_failure(429, "quota exceeded"))
            },
            &fast_config(2),
        )
        .await;

        assert!(result.unwrap_err().is_rate_limited());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellable_stops_during_delay() {
        let calls = Arc::new(AtomicU32::new(0));
        let token = CancellationToken::new();
        let config = RetryConfig::new()
            .with_max_retries(10)
            .with_delays(Duration::from_secs(10), Duration::from_secs(60));

        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(15)).await;
            trigger.cancel();
        });

        let counter = calls.clone();
        let result: Result<(), RetryError<NormalizedError>> = retry_with_backoff_cancellable(
            move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(NormalizedError::network("offline"))
                }
            },
            &config,
            |_| true,
            &token,
        )
        .await;

        assert!(result.unwrap_err().is_cancelled());
        // attempts at t=0s and t=10s; cancelled during the 20s delay
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellable_checks_before_first_attempt() {
        let calls = AtomicU32::new(0);
        let token = CancellationToken::new();
        token.cancel();

        let result: Result<(), RetryError<&str>> = retry_with_backoff_cancellable(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("never")
            },
            &fast_config(3),
            |_| true,
            &token,
        )
        .await;

        assert!(matches!(result, Err(RetryError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_attempt_prevents_next_attempt() {
        let calls = AtomicU32::new(0);
        let token = CancellationToken::new();
        let start = Instant::now();

        let result: Result<(), RetryError<&str>> = retry_with_backoff_cancellable(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                token.cancel();
                Err("offline")
            },
            &fast_config(5),
            |_| true,
            &token,
        )
        .await;

        assert!(result.unwrap_err().is_cancelled());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellable_returns_final_error() {
        let token = CancellationToken::new();
        let result: Result<(), RetryError<&str>> = retry_with_backoff_cancellable(
            || async { Err("still down") },
            &fast_config(1),
            |_| true,
            &token,
        )
        .await;

        assert_eq!(result.unwrap_err().into_failure(), Some("still down"));
    }
}
