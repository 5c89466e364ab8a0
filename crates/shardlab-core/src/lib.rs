//! Cluster configuration model for sharded-database test scenarios.
//!
//! Scenario text goes through three stages before anything touches a
//! container or the coordination store:
//!
//! - [`defaults`]: `_default` inheritance over nested YAML maps
//! - [`cluster`]: the typed cluster → replica-set → replica model, with
//!   identities from [`identity`]
//! - [`record`]: the identifier-keyed wire form published for the system
//!   under test
//!
//! [`deployment`] parses the per-replica launch parameters of a scenario and
//! [`retry`] holds the fixed-count retry used around infrastructure calls.
//!
//! # Example
//!
//! ```
//! use shardlab_core::{parse_defaulted_yaml, ClusterConfig, IdentityAllocator};
//!
//! let tree = parse_defaulted_yaml("
//!     rs1:
//!       _default: {master_weight: 5}
//!       t1: {master: true}
//!       t2: {}
//! ").unwrap();
//!
//! let mut allocator = IdentityAllocator::new();
//! let config = ClusterConfig::from_tree(&tree, "cluster_000", &mut allocator, |name| {
//!     format!("{name}:3301")
//! })
//! .unwrap();
//!
//! assert_eq!(config.leaders().count(), 1);
//! assert_eq!(config.replica("t2").unwrap().leader_weight, 5);
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod cluster;
pub mod defaults;
pub mod deployment;
pub mod error;
pub mod identity;
pub mod record;
pub mod retry;

pub use cluster::{ClusterConfig, ReplicaConfig, ReplicaSetConfig, REPLICA_PORT};
pub use defaults::{parse_defaulted_yaml, resolve_defaults, DEFAULT_KEY};
pub use deployment::{DeploymentPlan, PlannedReplica, ReplicaLaunch};
pub use error::{ConfigError, Result};
pub use identity::{Identity, IdentityAllocator};
pub use record::{ClusterConfigRecord, ReplicaRecord, ReplicaSetRecord};
pub use retry::{RetryPolicy, Retryable};
