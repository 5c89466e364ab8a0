//! Error types for scenario verification.

use shardlab_core::ConfigError;
use shardlab_orchestrator::OrchestratorError;
use shardlab_store::StoreError;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

/// Result type for verification operations.
pub type Result<T> = std::result::Result<T, VerifyError>;

/// How a failed check should be treated by a poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The condition does not hold yet; keep polling.
    NotYetTrue,
    /// Infrastructure hiccup; keep polling.
    InfraTransient,
    /// Polling cannot succeed; stop now.
    Fatal,
}

/// Classifies errors for [`ConvergencePoller`](crate::ConvergencePoller).
pub trait Classify {
    /// Returns the class of this error.
    fn class(&self) -> ErrorClass;
}

/// Errors raised while running and verifying a scenario.
#[derive(Debug, Error)]
pub enum VerifyError {
    /// An expectation about the cluster does not hold.
    #[error("assertion failed: {0}")]
    Assertion(String),

    /// Malformed topology or deployment.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Container orchestration failed.
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    /// Coordination store access failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Steps were used in an order that cannot work.
    #[error("scenario error: {0}")]
    Scenario(String),

    /// A condition was not reached in time.
    #[error("timed out after {elapsed:?} ({attempts} attempts) waiting for {condition}: {last}")]
    ConvergenceTimeout {
        /// What was being waited for.
        condition: String,
        /// Time spent polling.
        elapsed: Duration,
        /// Number of checks made.
        attempts: u32,
        /// The last failure observed.
        last: String,
    },

    /// Replica logs contain errors outside the allowlist.
    #[error("unexpected errors in logs of {}", .findings.keys().cloned().collect::<Vec<_>>().join(", "))]
    UnexpectedLogErrors {
        /// Offending lines per replica.
        findings: BTreeMap<String, Vec<String>>,
    },
}

impl VerifyError {
    /// Creates an assertion error.
    pub fn assertion(message: impl Into<String>) -> Self {
        Self::Assertion(message.into())
    }

    /// Creates a scenario error.
    pub fn scenario(message: impl Into<String>) -> Self {
        Self::Scenario(message.into())
    }
}

impl Classify for VerifyError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::Assertion(_) => ErrorClass::NotYetTrue,
            Self::Orchestrator(e) => match e {
                OrchestratorError::ExecFailed { .. } => ErrorClass::NotYetTrue,
                // a container that is gone will not come back by waiting
                OrchestratorError::DockerApi(_) if e.is_not_found() => ErrorClass::Fatal,
                OrchestratorError::DockerApi(_)
                | OrchestratorError::Io(_)
                | OrchestratorError::Timeout { .. } => ErrorClass::InfraTransient,
                _ => ErrorClass::Fatal,
            },
            Self::Store(e) if e.is_retryable() => ErrorClass::InfraTransient,
            _ => ErrorClass::Fatal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert_eq!(
            VerifyError::assertion("t1 is follower").class(),
            ErrorClass::NotYetTrue
        );
        assert_eq!(
            VerifyError::from(OrchestratorError::exec_failed("abc", "not running")).class(),
            ErrorClass::NotYetTrue
        );
        assert_eq!(
            VerifyError::from(OrchestratorError::timeout("docker")).class(),
            ErrorClass::InfraTransient
        );
        assert_eq!(
            VerifyError::from(OrchestratorError::replica_not_found("t9")).class(),
            ErrorClass::Fatal
        );
        assert_eq!(
            VerifyError::from(StoreError::status("k", 503, "")).class(),
            ErrorClass::InfraTransient
        );
        assert_eq!(
            VerifyError::from(StoreError::status("k", 403, "")).class(),
            ErrorClass::Fatal
        );
        assert_eq!(VerifyError::scenario("no config").class(), ErrorClass::Fatal);
    }

    fn docker_error(status_code: u16) -> VerifyError {
        VerifyError::from(OrchestratorError::DockerApi(
            bollard::errors::Error::DockerResponseServerError {
                status_code,
                message: "docker says no".to_string(),
            },
        ))
    }

    #[test]
    fn test_missing_container_is_fatal() {
        assert_eq!(docker_error(404).class(), ErrorClass::Fatal);
        assert_eq!(docker_error(500).class(), ErrorClass::InfraTransient);
        assert_eq!(docker_error(409).class(), ErrorClass::InfraTransient);
    }

    #[test]
    fn test_log_error_display() {
        let mut findings = BTreeMap::new();
        findings.insert("t1".to_string(), vec!["E> boom".to_string()]);
        findings.insert("t2".to_string(), vec!["E> bang".to_string()]);
        let err = VerifyError::UnexpectedLogErrors { findings };
        assert_eq!(err.to_string(), "unexpected errors in logs of t1, t2");
    }
}
