//! Timeout enforcement.
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - The deadline races the operation; on expiry the operation future is dropped,
//!   which cancels it at its next suspension point. Nothing keeps running in the
//!   background after a timeout
//! - Work that must survive a timeout has to be spawned by the operation itself
//! - Timeouts are per attempt; wrap a whole call for an overall deadline

use std::future::Future;
use std::time::Duration;

use crate::error::{DispatchError, OperationError};

/// Race `operation` against `duration`.
pub async fn with_timeout<F>(operation: F, duration: Duration) -> Result<F::Output, DispatchError>
where
    F: Future,
{
    tokio::time::timeout(duration, operation)
        .await
        .map_err(|_| DispatchError::OperationTimeout { timeout: duration })
}

/// Run one attempt, converting its error and an expired deadline into an
/// [`OperationError`] the retry engine can classify.
pub(crate) async fn run_attempt<F, T, E>(attempt: F, deadline: Option<Duration>) -> Result<T, OperationError>
where
    F: Future<Output = Result<T, E>>,
    E: Into<OperationError>,
{
    match deadline {
        Some(limit) => match tokio::time::timeout(limit, attempt).await {
            Ok(result) => result.map_err(Into::into),
            Err(_) => Err(OperationError::timeout(format!(
                "attempt exceeded {}ms deadline",
                limit.as_millis()
            ))),
        },
        None => attempt.await.map_err(Into::into),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_completes_before_deadline() {
        let result = with_timeout(
            async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                42
            },
            Duration::from_millis(50),
        )
        .await;
        assert_eq!(result, Ok(42));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_cancels_operation() {
        let dropped = Arc::new(AtomicBool::new(false));
        let flag = DropFlag(dropped.clone());

        let result = with_timeout(
            async move {
                let _flag = flag;
                tokio::time::sleep(Duration::from_secs(60)).await;
            },
            Duration::from_millis(100),
        )
        .await;

        assert_eq!(
            result,
            Err(DispatchError::OperationTimeout {
                timeout: Duration::from_millis(100)
            })
        );
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_deadline_is_a_timeout_error() {
        let result: Result<(), OperationError> = run_attempt(
            async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok::<_, OperationError>(())
            },
            Some(Duration::from_millis(20)),
        )
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_attempt_without_deadline_converts_error() {
        let result: Result<(), OperationError> = run_attempt(
            async { Err(std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused")) },
            None,
        )
        .await;
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Transport);
    }
}
