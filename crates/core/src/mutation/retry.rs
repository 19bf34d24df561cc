use std::future::Future;
use std::time::Duration;

use log::warn;

use crate::config::{DEFAULT_CONTENTION_RETRY_ATTEMPTS, DEFAULT_CONTENTION_RETRY_DELAY_MS};
use crate::errors::Result;

/// Fixed-count, fixed-delay retry of local-phase lock contention. Any other
/// error is returned on first sight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Err(err) if err.is_contention() && attempt < self.max_attempts => {
                    warn!(
                        "[Mutation] {} hit lock contention (attempt {}/{}): {}",
                        label, attempt, self.max_attempts, err
                    );
                    tokio::time::sleep(self.delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_CONTENTION_RETRY_ATTEMPTS,
            Duration::from_millis(DEFAULT_CONTENTION_RETRY_DELAY_MS),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{DatabaseError, Error};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn locked() -> Error {
        DatabaseError::LocalContention("database is locked".into()).into()
    }

    #[tokio::test(start_paused = true)]
    async fn retries_contention_until_success() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::from_millis(50));
        let value = policy
            .run("create NETWORK", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(locked())
                } else {
                    Ok(7)
                }
            })
            .await
            .unwrap();
        assert_eq!(value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn returns_last_error_when_exhausted() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(2, Duration::from_millis(50));
        let err = policy
            .run("create NETWORK", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(locked())
            })
            .await
            .unwrap_err();
        assert!(err.is_contention());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn other_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let err = RetryPolicy::default()
            .run("create NETWORK", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(Error::validation("bad cidr"))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
