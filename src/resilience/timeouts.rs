//! Timeout enforcement.
//!
//! # Responsibilities
//! - Wrap processor calls with a deadline
//! - Report which stage expired
//! - Cancel the wrapped future cleanly on expiry (it is dropped)

use std::future::Future;
use std::time::Duration;

use crate::relay::error::{RelayError, Stage};

/// Run `fut` with a deadline; expiry becomes [`RelayError::Timeout`].
pub async fn with_deadline<F, T>(stage: Stage, limit: Duration, fut: F) -> Result<T, RelayError>
where
    F: Future<Output = Result<T, RelayError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            tracing::debug!(stage = %stage, limit = ?limit, "Deadline exceeded");
            Err(RelayError::Timeout {
                stage,
                after: limit,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn passes_through_fast_results() {
        let value = with_deadline(Stage::Call, Duration::from_secs(1), async { Ok(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn tags_the_expired_stage() {
        let err = with_deadline::<_, ()>(Stage::Probe, Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await
        .unwrap_err();
        assert_eq!(
            err,
            RelayError::Timeout {
                stage: Stage::Probe,
                after: Duration::from_millis(10)
            }
        );
    }
}
