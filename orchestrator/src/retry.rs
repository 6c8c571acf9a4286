//! Retry policy for external calls: up to three attempts with exponential
//! backoff starting at one second and doubling. Only failures the error
//! type marks as transient are retried.

use std::{future::Future, time::Duration};

use common::error::AppError;
use tokio_retry::{strategy::ExponentialBackoff, RetryIf};
use tracing::warn;

pub const MAX_ATTEMPTS: usize = 3;
pub const BASE_DELAY_MS: u64 = 1000;

/// Backoff delays between attempts: 1000 ms, 2000 ms.
fn backoff() -> impl Iterator<Item = Duration> {
    ExponentialBackoff::from_millis(2)
        .factor(BASE_DELAY_MS / 2)
        .take(MAX_ATTEMPTS.saturating_sub(1))
}

/// Run `operation` with the standard retry policy. The caller is expected
/// to bound the whole call with the request deadline.
pub async fn with_retry<T, F, Fut>(dependency: &'static str, operation: F) -> Result<T, AppError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    RetryIf::spawn(backoff(), operation, |err: &AppError| {
        let retry = err.is_retryable();
        if retry {
            warn!(dependency, error = %err, "transient failure, retrying");
        }
        retry
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn retries_transient_failures_up_to_three_attempts() {
        let attempts = AtomicUsize::new(0);
        let result: Result<(), AppError> = with_retry("generator", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(AppError::Generator("ETIMEDOUT".into())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), MAX_ATTEMPTS);
    }

    #[tokio::test]
    async fn permanent_failures_are_not_retried() {
        let attempts = AtomicUsize::new(0);
        let result: Result<(), AppError> = with_retry("generator", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(AppError::Validation("bad input".into())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn success_after_transient_failure_recovers() {
        let attempts = AtomicUsize::new(0);
        let result = with_retry("embedder", || {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 0 {
                    Err(AppError::Embedder("connection reset".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn backoff_doubles_from_one_second() {
        let delays: Vec<Duration> = backoff().collect();
        assert_eq!(delays, vec![Duration::from_millis(1000), Duration::from_millis(2000)]);
    }
}
