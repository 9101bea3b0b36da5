use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

use crate::config::RetryConfig;

/// Bounded retry with exponential backoff for backend I/O. Every external
/// call the pipeline makes goes through a timeout plus this policy before a
/// failure is surfaced for that unit of work.
pub struct RetryPolicy {
    max_retries: usize,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }

    pub async fn run<F, Fut, T, E>(&self, operation: &str, mut f: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut backoff = self.initial_backoff;
        let mut attempt = 0;

        loop {
            match f().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt >= self.max_retries => {
                    warn!(
                        operation,
                        attempts = attempt + 1,
                        error = %err,
                        "giving up after retries"
                    );
                    return Err(err);
                }
                Err(err) => {
                    attempt += 1;
                    warn!(
                        operation,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "retrying after failure"
                    );
                    sleep(backoff).await;
                    backoff = (backoff * 2).min(self.max_backoff);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn policy(max_retries: usize) -> RetryPolicy {
        RetryPolicy::from_config(&RetryConfig {
            max_retries,
            initial_backoff_ms: 1,
            max_backoff_ms: 4,
        })
    }

    #[tokio::test]
    async fn succeeds_after_transient_failure() {
        let attempts = AtomicUsize::new(0);
        let result: Result<u32, String> = policy(2)
            .run("test", || async {
                if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err("transient".to_string())
                } else {
                    Ok(7)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn gives_up_after_retries_are_exhausted() {
        let attempts = AtomicUsize::new(0);
        let result: Result<u32, String> = policy(1)
            .run("test", || async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err("always".to_string())
            })
            .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}
