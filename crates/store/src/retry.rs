//! Bounded retry for transient store failures.
//!
//! The scheduler's lifecycle steps must survive brief store outages;
//! this helper retries only [`StoreError::Unavailable`] with
//! exponential backoff and hands every other error straight back.

use std::time::Duration;

use crate::StoreResult;

/// Backoff policy for store retries.
#[derive(Debug, Clone)]
pub struct StoreRetryPolicy {
    /// Total attempts, including the first (≥ 1).
    pub max_attempts: u32,
    /// Backoff before the first retry.
    pub initial_backoff: Duration,
    /// Backoff multiplier per further retry.
    pub multiplier: f64,
}

impl Default for StoreRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(50),
            multiplier: 2.0,
        }
    }
}

impl StoreRetryPolicy {
    /// Backoff before retry number `retry` (0-based).
    #[must_use]
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let factor = self.multiplier.max(0.0).powi(retry as i32);
        self.initial_backoff.mul_f64(factor)
    }
}

/// Run `op`, retrying transient failures per `policy`.
///
/// Returns the first non-retryable error immediately, or the last
/// error once the attempt budget is exhausted.
pub async fn with_store_retry<T, F, Fut>(policy: &StoreRetryPolicy, mut op: F) -> StoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StoreResult<T>>,
{
    let mut retry = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && retry + 1 < policy.max_attempts.max(1) => {
                let delay = policy.backoff_for(retry);
                tracing::warn!(
                    retry,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "state store unavailable, backing off"
                );
                tokio::time::sleep(delay).await;
                retry += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::error::StoreError;

    fn policy() -> StoreRetryPolicy {
        StoreRetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            multiplier: 2.0,
        }
    }

    #[tokio::test]
    async fn returns_first_success() {
        let calls = AtomicU32::new(0);
        let result = with_store_retry(&policy(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, StoreError>(42) }
        })
        .await
        .unwrap();
        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_unavailable_until_success() {
        let calls = AtomicU32::new(0);
        let result = with_store_retry(&policy(), || {
            let attempt = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 2 {
                    Err(StoreError::Unavailable("flaky".into()))
                } else {
                    Ok(7)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausts_attempt_budget() {
        let calls = AtomicU32::new(0);
        let err = with_store_retry::<u32, _, _>(&policy(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StoreError::Unavailable("down".into())) }
        })
        .await
        .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_errors_pass_through() {
        let calls = AtomicU32::new(0);
        let err = with_store_retry::<u32, _, _>(&policy(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StoreError::MissingBlob("b".into())) }
        })
        .await
        .unwrap_err();
        assert!(matches!(err, StoreError::MissingBlob(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn backoff_grows() {
        let policy = StoreRetryPolicy::default();
        assert_eq!(policy.backoff_for(0), Duration::from_millis(50));
        assert_eq!(policy.backoff_for(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(200));
    }
}
