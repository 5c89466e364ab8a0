//! Error types for the orchestrator crate.
//!
//! This module provides error types for container orchestration operations.

use shardlab_core::Retryable;
use thiserror::Error;

/// Result type for orchestrator operations.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Errors that can occur during orchestration operations.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Container not found.
    #[error("container not found: {0}")]
    ContainerNotFound(String),

    /// Network not found.
    #[error("network not found: {0}")]
    NetworkNotFound(String),

    /// No replica or service with this name is part of the cluster.
    #[error("replica not found in cluster: {0}")]
    ReplicaNotFound(String),

    /// Container creation failed.
    #[error("failed to create container {name}: {reason}")]
    ContainerCreationFailed {
        /// The container name.
        name: String,
        /// The reason for the failure.
        reason: String,
    },

    /// Container exec failed.
    #[error("exec failed in container {container_id}: {reason}")]
    ExecFailed {
        /// The container ID.
        container_id: String,
        /// The reason for the failure.
        reason: String,
    },

    /// Network creation failed.
    #[error("failed to create network {name}: {reason}")]
    NetworkCreationFailed {
        /// The network name.
        name: String,
        /// The reason for the failure.
        reason: String,
    },

    /// Timeout waiting for condition.
    #[error("timeout waiting for {condition}")]
    Timeout {
        /// The condition that timed out.
        condition: String,
    },

    /// Docker API error.
    #[error("Docker API error: {0}")]
    DockerApi(#[from] bollard::errors::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Invalid state transition.
    #[error("invalid state transition of {name} from {from} to {to}")]
    InvalidStateTransition {
        /// The process name.
        name: String,
        /// The starting state.
        from: String,
        /// The target state.
        to: String,
    },
}

impl OrchestratorError {
    /// Creates a container not found error.
    pub fn container_not_found(id: impl Into<String>) -> Self {
        Self::ContainerNotFound(id.into())
    }

    /// Creates a network not found error.
    pub fn network_not_found(name: impl Into<String>) -> Self {
        Self::NetworkNotFound(name.into())
    }

    /// Creates a replica not found error.
    pub fn replica_not_found(name: impl Into<String>) -> Self {
        Self::ReplicaNotFound(name.into())
    }

    /// Creates a container creation failed error.
    pub fn container_creation_failed(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ContainerCreationFailed {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Creates an exec failed error.
    pub fn exec_failed(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ExecFailed {
            container_id: id.into(),
            reason: reason.into(),
        }
    }

    /// Creates a network creation failed error.
    pub fn network_creation_failed(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::NetworkCreationFailed {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Creates a timeout error.
    pub fn timeout(condition: impl Into<String>) -> Self {
        Self::Timeout {
            condition: condition.into(),
        }
    }

    /// Creates a configuration error.
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration(reason.into())
    }

    /// Creates an invalid state transition error.
    pub fn invalid_state_transition(
        name: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        Self::InvalidStateTransition {
            name: name.into(),
            from: from.into(),
            to: to.into(),
        }
    }

    /// Returns true if this error is retryable.
    ///
    /// Daemon-side failures (5xx) and transport errors are retryable; client
    /// errors such as a name conflict or a missing object are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::DockerApi(bollard::errors::Error::DockerResponseServerError {
                status_code,
                ..
            }) => *status_code >= 500,
            Self::DockerApi(_) | Self::Io(_) | Self::Timeout { .. } => true,
            _ => false,
        }
    }

    /// Returns true if this is a not found error.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::ContainerNotFound(_) | Self::NetworkNotFound(_) | Self::ReplicaNotFound(_) => {
                true
            }
            Self::DockerApi(bollard::errors::Error::DockerResponseServerError {
                status_code,
                ..
            }) => *status_code == 404,
            _ => false,
        }
    }
}

impl Retryable for OrchestratorError {
    fn is_retryable(&self) -> bool {
        OrchestratorError::is_retryable(self)
    }
}
