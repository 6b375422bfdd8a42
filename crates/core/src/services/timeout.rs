//! Bounded store calls.

use std::future::Future;
use std::time::Duration;

use tally_common::{AppError, AppResult};

/// Run a store call, failing with [`AppError::Storage`] if it outlives `limit`.
pub(crate) async fn bounded<T>(
    limit: Duration,
    call: impl Future<Output = AppResult<T>>,
) -> AppResult<T> {
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| AppError::Storage(format!("store call timed out after {limit:?}")))?
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_bounded_times_out() {
        let err = bounded(Duration::from_millis(50), std::future::pending::<AppResult<()>>())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Storage(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_bounded_passes_result_through() {
        let value = bounded(Duration::from_secs(1), async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }
}
