//! Bounded exponential backoff for scanner API calls

use crate::scanners::ScannerError;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    /// Delay after the given failed attempt (1-based)
    pub fn delay_for(&self, attempt: u32, error: &ScannerError) -> Duration {
        let exponential = self
            .base_delay_ms
            .saturating_mul(1u64 << attempt.saturating_sub(1).min(16));
        let hinted = match error {
            ScannerError::RateLimited {
                retry_after_secs: Some(secs),
            } => secs.saturating_mul(1000),
            _ => 0,
        };
        Duration::from_millis(exponential.max(hinted).min(self.max_delay_ms))
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, ScannerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ScannerError>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.delay_for(attempt, &e);
                    warn!(
                        "{} failed (attempt {}/{}): {}; retrying in {:?}",
                        operation, attempt, self.max_attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_delay_grows_and_caps() {
        let policy = RetryPolicy::default();
        let err = ScannerError::Server {
            status: 503,
            body: String::new(),
        };
        assert_eq!(policy.delay_for(1, &err), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2, &err), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(10, &err), Duration::from_millis(8000));

        let hinted = ScannerError::RateLimited {
            retry_after_secs: Some(3),
        };
        assert_eq!(policy.delay_for(1, &hinted), Duration::from_millis(3000));
    }

    #[tokio::test]
    async fn test_retries_transient_errors_up_to_limit() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), _> = RetryPolicy::immediate(3)
            .run("lookup", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ScannerError::RateLimited {
                    retry_after_secs: None,
                })
            })
            .await;
        assert!(matches!(result, Err(ScannerError::RateLimited { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_does_not_retry_permanent_errors() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), _> = RetryPolicy::immediate(3)
            .run("lookup", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ScannerError::Parse("bad json".to_string()))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failure() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let value = RetryPolicy::immediate(3)
            .run("lookup", move || async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(ScannerError::Transport("reset".to_string()))
                } else {
                    Ok(42)
                }
            })
            .await
            .unwrap();
        assert_eq!(value, 42);
    }
}
