//! Fixed-count retry for infrastructure calls.
//!
//! Container and coordination-store APIs occasionally fail with races and
//! timeouts that go away on a second try. [`RetryPolicy`] retries only errors
//! that report themselves as [`Retryable`], a fixed number of times with a
//! fixed delay. Business-state convergence is handled elsewhere by a poller
//! with its own error classes.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Errors that can tell whether retrying the failed call may help.
pub trait Retryable {
    /// Returns true if this error is retryable.
    fn is_retryable(&self) -> bool;
}

/// Retry parameters for infrastructure calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub attempts: u32,
    /// Delay between attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    /// Creates a policy.
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self { attempts, delay }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            attempts: 1,
            delay: Duration::ZERO,
        }
    }

    /// Runs `op`, retrying retryable failures.
    ///
    /// Non-retryable errors and the error of the last attempt are returned
    /// as is.
    pub async fn run<T, E, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Display,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 1;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < attempts => {
                    warn!(
                        operation,
                        attempt,
                        attempts,
                        error = %e,
                        "Transient infrastructure error, retrying"
                    );
                    tokio::time::sleep(self.delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[derive(Debug)]
    struct TestError {
        retryable: bool,
    }

    impl Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "test error (retryable: {})", self.retryable)
        }
    }

    impl Retryable for TestError {
        fn is_retryable(&self) -> bool {
            self.retryable
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_until_success() {
        let calls = Cell::new(0);
        let policy = RetryPolicy::default();

        let result = policy
            .run("create", || {
                calls.set(calls.get() + 1);
                let n = calls.get();
                async move {
                    if n < 3 {
                        Err(TestError { retryable: true })
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_attempts() {
        let calls = Cell::new(0);
        let policy = RetryPolicy::new(3, Duration::from_millis(200));
        let started = tokio::time::Instant::now();

        let result: Result<(), TestError> = policy
            .run("put", || {
                calls.set(calls.get() + 1);
                async { Err(TestError { retryable: true }) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.get(), 3);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(400) && elapsed < Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_fails_immediately() {
        let calls = Cell::new(0);

        let result: Result<(), TestError> = RetryPolicy::default()
            .run("remove", || {
                calls.set(calls.get() + 1);
                async { Err(TestError { retryable: false }) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test]
    async fn test_none_policy_runs_once() {
        let calls = Cell::new(0);
        let _: Result<(), TestError> = RetryPolicy::none()
            .run("exec", || {
                calls.set(calls.get() + 1);
                async { Err(TestError { retryable: true }) }
            })
            .await;
        assert_eq!(calls.get(), 1);
    }
}
