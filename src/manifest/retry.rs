//! Retry wrapper for idempotent publisher requests.

use std::future::Future;
use std::time::Duration;

use crate::config::Config;
use crate::errors::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            attempts: config.retry_attempts.max(1),
            backoff: config.retry_backoff,
        }
    }
}

/// Run `op` until it succeeds, fails with a non-retriable error, or the
/// attempts are used up. The delay grows linearly with the attempt number.
pub async fn with_retry<T, F, Fut>(policy: RetryPolicy, what: &str, mut op: F) -> Result<T, AppError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;

    loop {
        match op().await {
            Err(err) if err.is_retriable() && attempt < attempts => {
                tracing::warn!(
                    "{} failed (attempt {}/{}): {}",
                    what,
                    attempt,
                    attempts,
                    err
                );
                tokio::time::sleep(policy.backoff * attempt).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            backoff: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_retries_network_errors_until_success() {
        let calls = AtomicU32::new(0);
        let result = with_retry(policy(3), "latest build", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(AppError::Network("reset".into()))
            } else {
                Ok(7)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), AppError> = with_retry(policy(2), "latest build", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(AppError::Network("reset".into()))
        })
        .await;

        assert!(matches!(result, Err(AppError::Network(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_format_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), AppError> = with_retry(policy(5), "latest build", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(AppError::ManifestFormat("missing buildNumber".into()))
        })
        .await;

        assert!(matches!(result, Err(AppError::ManifestFormat(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
