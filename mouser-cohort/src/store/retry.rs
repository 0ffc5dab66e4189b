//! Store write retry
//!
//! A write that fails because of the store itself (not because of a rule
//! check) is attempted once more after a short backoff. A second store
//! failure is surfaced as [`Error::StoreWrite`].

use mouser_common::{Error, Result};
use std::time::{Duration, Instant};

/// Backoff between the first attempt and the retry
pub const RETRY_BACKOFF: Duration = Duration::from_millis(20);

/// Run `operation`, retrying once on a store failure
///
/// Rule failures (duplicate identifier, capacity, not found) are returned
/// unchanged on the first attempt.
pub async fn retry_store_write<F, Fut, T>(operation_name: &str, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let start_time = Instant::now();

    let first_err = match operation().await {
        Ok(result) => return Ok(result),
        Err(err) if err.is_store_failure() => err,
        Err(err) => return Err(err),
    };

    tracing::warn!(
        operation = operation_name,
        error = %first_err,
        backoff_ms = RETRY_BACKOFF.as_millis() as u64,
        "Store write failed, retrying once"
    );
    tokio::time::sleep(RETRY_BACKOFF).await;

    match operation().await {
        Ok(result) => {
            tracing::debug!(
                operation = operation_name,
                elapsed_ms = start_time.elapsed().as_millis() as u64,
                "Store write succeeded after retry"
            );
            Ok(result)
        }
        Err(err) if err.is_store_failure() => {
            tracing::error!(
                operation = operation_name,
                error = %err,
                elapsed_ms = start_time.elapsed().as_millis() as u64,
                "Store write failed after retry"
            );
            Err(Error::StoreWrite(format!("{}: {}", operation_name, err)))
        }
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_first_attempt_success() {
        let result = retry_store_write("test_op", || async { Ok::<i32, Error>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_store_failure_then_success() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result = retry_store_write("test_op", move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(Error::Database(sqlx::Error::PoolTimedOut))
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_two_store_failures_become_store_write() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result: Result<()> = retry_store_write("commit", move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(Error::Database(sqlx::Error::PoolClosed))
            }
        })
        .await;

        assert!(matches!(result, Err(Error::StoreWrite(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_rule_failure_not_retried() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result: Result<()> = retry_store_write("commit", move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(Error::DuplicateIdentifier("A1".into()))
            }
        })
        .await;

        assert!(matches!(result, Err(Error::DuplicateIdentifier(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
