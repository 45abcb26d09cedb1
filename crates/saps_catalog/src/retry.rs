//! Retry executor for catalog calls.
//!
//! Transient failures (store connectivity, timeouts) are retried with a fixed
//! delay, forever unless the policy caps attempts. Anything else propagates
//! on the first failure.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use saps_config::RetrySection;

use crate::error::CatalogError;

/// Errors that know whether a retry may help.
pub trait Retryable {
    fn is_transient(&self) -> bool;
}

impl Retryable for CatalogError {
    fn is_transient(&self) -> bool {
        CatalogError::is_transient(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Fixed pause between attempts.
    pub delay: Duration,
    /// `None` retries until the operation succeeds.
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(saps_config::defaults::DEFAULT_RETRY_DELAY_SECS),
            max_attempts: None,
        }
    }
}

impl From<&RetrySection> for RetryPolicy {
    fn from(section: &RetrySection) -> Self {
        Self {
            delay: Duration::from_secs(section.delay_secs),
            max_attempts: section.max_attempts,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `op` until it succeeds, fails permanently, or exhausts the policy.
    ///
    /// `label` names the operation in logs.
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut op: F) -> Result<T, E>
    where
        E: Retryable + std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_transient() => return Err(err),
                Err(err) => {
                    if self.policy.max_attempts.is_some_and(|max| attempt >= max) {
                        warn!(operation = label, attempt, error = %err, "Giving up after transient failures");
                        return Err(err);
                    }
                    warn!(
                        operation = label,
                        attempt,
                        error = %err,
                        "Transient catalog failure, retrying in {:?}",
                        self.policy.delay
                    );
                    tokio::time::sleep(self.policy.delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_attempts: Option<u32>) -> RetryExecutor {
        RetryExecutor::new(RetryPolicy {
            delay: Duration::from_millis(1),
            max_attempts,
        })
    }

    #[tokio::test]
    async fn test_validation_error_is_not_retried() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), _> = fast(None)
            .run("add_task", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(CatalogError::validation("empty id"))
            })
            .await;

        assert!(matches!(result, Err(CatalogError::Validation(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transient_errors_retried_until_success() {
        let calls = &AtomicU32::new(0);
        let result = fast(None)
            .run("get_tasks", move || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 3 {
                    Err(CatalogError::Timeout(Duration::from_secs(300)))
                } else {
                    Ok(n)
                }
            })
            .await
            .unwrap();

        assert_eq!(result, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_max_attempts_returns_last_error() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), _> = fast(Some(2))
            .run("update_state", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(CatalogError::Sqlx(sqlx::Error::PoolTimedOut))
            })
            .await;

        assert!(result.unwrap_err().is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_policy_from_section() {
        let policy = RetryPolicy::from(&RetrySection {
            delay_secs: 7,
            max_attempts: Some(4),
        });
        assert_eq!(policy.delay, Duration::from_secs(7));
        assert_eq!(policy.max_attempts, Some(4));
        assert_eq!(RetryPolicy::default().max_attempts, None);
    }
}
