//! Error types for the coordination-store crate.

use shardlab_core::{ConfigError, Retryable};
use thiserror::Error;

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur while talking to the coordination store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Transport-level HTTP failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The store answered with an unexpected status.
    #[error("unexpected status {status} for key {key}: {body}")]
    Status {
        /// The key being accessed.
        key: String,
        /// HTTP status code.
        status: u16,
        /// Response body, possibly empty.
        body: String,
    },

    /// The store refused a write.
    #[error("write of key {0} was rejected")]
    WriteRejected(String),

    /// A stored value could not be decoded.
    #[error("invalid value under {key}: {source}")]
    InvalidValue {
        /// The key that was read.
        key: String,
        /// Decode error.
        #[source]
        source: ConfigError,
    },

    /// The cluster config could not be encoded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The store did not become reachable in time.
    #[error("coordination store at {address} not ready after {attempts} attempts")]
    NotReady {
        /// Store base address.
        address: String,
        /// Attempts made.
        attempts: u32,
    },
}

impl StoreError {
    /// Creates an unexpected status error.
    pub fn status(key: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
        Self::Status {
            key: key.into(),
            status,
            body: body.into(),
        }
    }

    /// Creates an invalid value error.
    pub fn invalid_value(key: impl Into<String>, source: ConfigError) -> Self {
        Self::InvalidValue {
            key: key.into(),
            source,
        }
    }

    /// Returns true if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            Self::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl Retryable for StoreError {
    fn is_retryable(&self) -> bool {
        StoreError::is_retryable(self)
    }
}
