//! Exponential backoff for operations a backing store can report as a
//! transient write conflict, matching the teacher's `store_graph_entities`
//! retry loop (`is_retryable_conflict`) expressed with the same
//! `tokio_retry` strategy the teacher uses for its embedding retries.

use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

use crate::error::AppError;

const MAX_ATTEMPTS: usize = 3;
const INITIAL_BACKOFF_MS: u64 = 50;

pub async fn retry_on_conflict<F, Fut, T>(op: F) -> Result<T, AppError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, AppError>>,
{
    let strategy = ExponentialBackoff::from_millis(INITIAL_BACKOFF_MS).map(jitter).take(MAX_ATTEMPTS);
    RetryIf::spawn(strategy, op, |err: &AppError| err.is_retryable_conflict()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn succeeds_on_first_try_without_delay() {
        let calls = AtomicUsize::new(0);
        let result = retry_on_conflict(|| async {
            calls.fetch_add(1, Ordering::Relaxed);
            Ok::<_, AppError>(42)
        })
        .await
        .unwrap();
        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn retries_a_retryable_conflict_then_succeeds() {
        let calls = AtomicUsize::new(0);
        let result = retry_on_conflict(|| async {
            let n = calls.fetch_add(1, Ordering::Relaxed);
            if n == 0 {
                Err(AppError::StoreIOError("write conflict detected".to_string()))
            } else {
                Ok(())
            }
        })
        .await;
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn does_not_retry_a_non_conflict_error() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), AppError> = retry_on_conflict(|| async {
            calls.fetch_add(1, Ordering::Relaxed);
            Err(AppError::Validation("bad input".to_string()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }
}
