//! Error types for the core crate.
//!
//! Everything in here is a configuration error: the scenario input was
//! malformed. These are never retried.

use thiserror::Error;

/// Result type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors raised while turning scenario text into a typed cluster model.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The input text is not valid YAML.
    #[error("failed to parse config tree: {0}")]
    Parse(#[source] serde_yaml::Error),

    /// A level that must be a mapping holds something else.
    #[error("expected a mapping at {path}")]
    NotAMapping {
        /// Dotted path of the offending node.
        path: String,
    },

    /// A mapping key is not a string.
    #[error("non-string key at {path}")]
    InvalidKey {
        /// Dotted path of the parent node.
        path: String,
    },

    /// Attributes at a level could not be applied.
    #[error("invalid attributes at {path}: {source}")]
    InvalidAttributes {
        /// Dotted path of the node.
        path: String,
        /// Underlying decode error.
        #[source]
        source: serde_yaml::Error,
    },

    /// A name is used by more than one replica-set or replica.
    #[error("duplicate name {0}: replica-set and replica names must be unique")]
    DuplicateName(String),

    /// A deployment entry references a replica that is not in the cluster config.
    #[error("replica {replica} in replica-set {replica_set} is not part of the cluster config")]
    UnknownReplica {
        /// Replica-set name from the deployment tree.
        replica_set: String,
        /// Replica name from the deployment tree.
        replica: String,
    },

    /// The model could not be encoded.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl ConfigError {
    /// Creates a not-a-mapping error.
    pub fn not_a_mapping(path: impl Into<String>) -> Self {
        Self::NotAMapping { path: path.into() }
    }

    /// Creates an invalid key error.
    pub fn invalid_key(path: impl Into<String>) -> Self {
        Self::InvalidKey { path: path.into() }
    }

    /// Creates an invalid attributes error.
    pub fn invalid_attributes(path: impl Into<String>, source: serde_yaml::Error) -> Self {
        Self::InvalidAttributes {
            path: path.into(),
            source,
        }
    }

    /// Creates an unknown replica error.
    pub fn unknown_replica(replica_set: impl Into<String>, replica: impl Into<String>) -> Self {
        Self::UnknownReplica {
            replica_set: replica_set.into(),
            replica: replica.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ConfigError::not_a_mapping("rs1.t1");
        assert_eq!(err.to_string(), "expected a mapping at rs1.t1");

        let err = ConfigError::unknown_replica("rs1", "t9");
        assert_eq!(
            err.to_string(),
            "replica t9 in replica-set rs1 is not part of the cluster config"
        );
    }
}
