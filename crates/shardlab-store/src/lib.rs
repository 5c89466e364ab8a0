//! Coordination-store access for shardlab.
//!
//! - [`kv`]: the [`KvStore`] trait and an in-memory store
//! - [`consul`]: a Consul KV client over HTTP
//! - [`publish`]: writing and reading per-cluster configuration records

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod consul;
pub mod error;
pub mod kv;
pub mod publish;

pub use consul::{ConsulKv, DEFAULT_CONSUL_PORT};
pub use error::{Result, StoreError};
pub use kv::{KvStore, MemoryKv};
pub use publish::{
    publish_cluster_config, read_cluster_config, KeyNamespace, DEFAULT_CONFIG_KEY, DEFAULT_PREFIX,
};
