//! Bounded polling for eventually-true conditions.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{Classify, ErrorClass, VerifyError};

/// Default interval between checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Why polling stopped without success.
#[derive(Debug, Error)]
pub enum PollError<E> {
    /// The check failed in a way retrying cannot fix.
    #[error("{0}")]
    Fatal(E),

    /// The wait elapsed.
    #[error("condition not met after {attempts} attempts in {elapsed:?}: {last}")]
    TimedOut {
        /// Time spent polling.
        elapsed: Duration,
        /// Number of checks made.
        attempts: u32,
        /// The last failure observed.
        last: E,
    },
}

impl PollError<VerifyError> {
    /// Converts into a [`VerifyError`] naming the awaited `condition`.
    pub fn into_verify_error(self, condition: impl Into<String>) -> VerifyError {
        match self {
            PollError::Fatal(e) => e,
            PollError::TimedOut {
                elapsed,
                attempts,
                last,
            } => VerifyError::ConvergenceTimeout {
                condition: condition.into(),
                elapsed,
                attempts,
                last: last.to_string(),
            },
        }
    }
}

/// Repeats a check at a fixed interval until it passes or `max_wait` elapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvergencePoller {
    max_wait: Duration,
    interval: Duration,
}

impl ConvergencePoller {
    /// Creates a poller.
    pub fn new(max_wait: Duration, interval: Duration) -> Self {
        Self { max_wait, interval }
    }

    /// Creates a poller checking once per second for up to `seconds`.
    pub fn seconds(seconds: u64) -> Self {
        Self::new(Duration::from_secs(seconds), DEFAULT_POLL_INTERVAL)
    }

    /// Returns the maximum wait.
    pub fn max_wait(&self) -> Duration {
        self.max_wait
    }

    /// Returns the interval between checks.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Runs `check` until it succeeds.
    ///
    /// Errors classified as [`ErrorClass::Fatal`] stop polling at once.
    /// Other errors are swallowed until `max_wait` has elapsed, after which
    /// the last one is returned in [`PollError::TimedOut`]. A zero `max_wait`
    /// makes exactly one attempt.
    pub async fn poll<T, E, F, Fut>(&self, mut check: F) -> Result<T, PollError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + Display,
    {
        let start = Instant::now();
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            match check().await {
                Ok(value) => {
                    debug!(attempts, elapsed = ?start.elapsed(), "Condition met");
                    return Ok(value);
                }
                Err(e) if e.class() == ErrorClass::Fatal => {
                    return Err(PollError::Fatal(e));
                }
                Err(e) => {
                    let elapsed = start.elapsed();
                    if elapsed >= self.max_wait {
                        return Err(PollError::TimedOut {
                            elapsed,
                            attempts,
                            last: e,
                        });
                    }
                    debug!(attempt = attempts, error = %e, "Condition not met yet");
                    tokio::time::sleep(self.interval).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn not_yet() -> VerifyError {
        VerifyError::assertion("not yet")
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_retries() {
        let calls = Cell::new(0u32);
        let poller = ConvergencePoller::seconds(10);
        let interval = poller.interval();
        let start = Instant::now();

        let value = poller
            .poll(|| {
                calls.set(calls.get() + 1);
                let n = calls.get();
                async move {
                    if n < 3 {
                        Err(not_yet())
                    } else {
                        Ok(n)
                    }
                }
            })
            .await
            .unwrap();

        // two failures, so two sleeps and no third
        let elapsed = start.elapsed();
        assert_eq!(value, 3);
        assert!(elapsed >= interval * 2, "finished early: {elapsed:?}");
        assert!(elapsed < interval * 3, "finished late: {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_with_last_error() {
        let start = Instant::now();
        let poller = ConvergencePoller::new(Duration::from_secs(5), Duration::from_secs(1));

        let err = poller
            .poll(|| async { Err::<(), _>(not_yet()) })
            .await
            .unwrap_err();

        match err {
            PollError::TimedOut {
                elapsed,
                attempts,
                last,
            } => {
                assert_eq!(attempts, 6);
                assert!(elapsed >= Duration::from_secs(5));
                assert!(matches!(last, VerifyError::Assertion(_)));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert!(start.elapsed() < Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_propagates_immediately() {
        let calls = Cell::new(0u32);
        let poller = ConvergencePoller::seconds(10);

        let err = poller
            .poll(|| {
                calls.set(calls.get() + 1);
                async { Err::<(), _>(VerifyError::scenario("broken")) }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, PollError::Fatal(VerifyError::Scenario(_))));
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_wait_checks_once() {
        let calls = Cell::new(0u32);
        let poller = ConvergencePoller::new(Duration::ZERO, Duration::from_secs(1));

        let err = poller
            .poll(|| {
                calls.set(calls.get() + 1);
                async { Err::<(), _>(not_yet()) }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, PollError::TimedOut { attempts: 1, .. }));
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_into_verify_error() {
        let poller = ConvergencePoller::new(Duration::from_secs(2), Duration::from_secs(1));
        let err = poller
            .poll(|| async { Err::<(), _>(not_yet()) })
            .await
            .unwrap_err()
            .into_verify_error("t1 to become leader");

        match err {
            VerifyError::ConvergenceTimeout {
                condition,
                attempts,
                last,
                ..
            } => {
                assert_eq!(condition, "t1 to become leader");
                assert_eq!(attempts, 3);
                assert_eq!(last, "assertion failed: not yet");
            }
            other => panic!("expected convergence timeout, got {other:?}"),
        }
    }
}
