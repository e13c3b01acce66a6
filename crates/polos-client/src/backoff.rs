//! Bounded exponential backoff for `report_success`/`report_failure`, per
//! §4.1: "up to 5 attempts, base 1s, doubling, with any 409 treated as
//! terminal".
//!
//! Grounded in `durable::reliability::retry::RetryPolicy`, trimmed to the
//! fixed shape the spec names rather than the teacher's fully-configurable
//! policy (this crate's other retry needs — step `run` retries — live in
//! `polos_runtime` instead, since they retry user code, not HTTP calls).

use std::time::Duration;

use polos_contracts::ClientError;
use tracing::warn;

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub base: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base: Duration::from_secs(1),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base.saturating_mul(1u32 << attempt.min(20))
    }

    /// Runs `op` up to `max_attempts` times. A `ClientError::Conflict` is
    /// terminal and returned immediately without retrying (the execution has
    /// been reassigned; the caller must drop the write). Any other error
    /// retries with doubling backoff until attempts are exhausted.
    pub async fn retry<F, Fut, T>(&self, mut op: F) -> Result<T, ClientError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, ClientError>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(ClientError::Conflict) => {
                    warn!("orchestrator reported conflict (execution reassigned); dropping write");
                    return Err(ClientError::Conflict);
                }
                Err(err) if attempt + 1 >= self.max_attempts => return Err(err),
                Err(err) => {
                    warn!(attempt, error = %err, "retrying after transient orchestrator error");
                    tokio::time::sleep(self.delay_for_attempt(attempt)).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn conflict_is_terminal_without_retry() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = BackoffPolicy {
            max_attempts: 5,
            base: Duration::from_millis(1),
        };
        let calls2 = calls.clone();
        let result: Result<(), ClientError> = policy
            .retry(move || {
                let calls = calls2.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(ClientError::Conflict)
                }
            })
            .await;
        assert!(matches!(result, Err(ClientError::Conflict)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transient_errors_retry_until_exhausted() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = BackoffPolicy {
            max_attempts: 3,
            base: Duration::from_millis(1),
        };
        let calls2 = calls.clone();
        let result: Result<(), ClientError> = policy
            .retry(move || {
                let calls = calls2.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(ClientError::Transient("down".into()))
                }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn eventual_success_returns_value() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = BackoffPolicy {
            max_attempts: 5,
            base: Duration::from_millis(1),
        };
        let calls2 = calls.clone();
        let result = policy
            .retry(move || {
                let calls = calls2.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err(ClientError::Transient("down".into()))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(result, 42);
    }
}
