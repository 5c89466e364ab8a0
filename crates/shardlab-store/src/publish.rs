//! Publishing cluster configuration to the coordination store.
//!
//! Each cluster owns one key, `{prefix}/{cluster_name}/{config_key}`, whose
//! value is the YAML-encoded [`ClusterConfigRecord`]. The processes under test
//! watch that key and reconfigure themselves from it.

use shardlab_core::{ClusterConfig, ClusterConfigRecord};
use tracing::info;

use crate::error::{Result, StoreError};
use crate::kv::KvStore;

/// Default key prefix.
pub const DEFAULT_PREFIX: &str = "autovshard";
/// Default name of the per-cluster config key.
pub const DEFAULT_CONFIG_KEY: &str = "autovshard_cfg_yaml";

/// Layout of cluster keys in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyNamespace {
    /// Prefix shared by all clusters.
    pub prefix: String,
    /// Name of the config key under a cluster.
    pub config_key: String,
}

impl Default for KeyNamespace {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
            config_key: DEFAULT_CONFIG_KEY.to_string(),
        }
    }
}

impl KeyNamespace {
    /// Creates a namespace.
    pub fn new(prefix: impl Into<String>, config_key: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            config_key: config_key.into(),
        }
    }

    /// Returns the config key of a cluster.
    pub fn config_key(&self, cluster_name: &str) -> String {
        format!("{}/{}/{}", self.prefix, cluster_name, self.config_key)
    }
}

/// Writes the config of `config.cluster_name` and returns the key written.
///
/// The write is not read back. Whether the processes have picked the new
/// value up is for the caller's convergence checks to find out.
pub async fn publish_cluster_config(
    store: &dyn KvStore,
    namespace: &KeyNamespace,
    config: &ClusterConfig,
) -> Result<String> {
    let key = namespace.config_key(&config.cluster_name);
    let value = config.to_yaml()?;
    store.put(&key, &value).await?;

    info!(
        cluster = %config.cluster_name,
        key = %key,
        replica_sets = config.replica_sets.len(),
        store = store.name(),
        "Published cluster config"
    );
    Ok(key)
}

/// Reads back the config of a cluster, if one was published.
pub async fn read_cluster_config(
    store: &dyn KvStore,
    namespace: &KeyNamespace,
    cluster_name: &str,
) -> Result<Option<ClusterConfigRecord>> {
    let key = namespace.config_key(cluster_name);
    match store.get(&key).await? {
        Some(text) => ClusterConfigRecord::from_yaml(&text)
            .map(Some)
            .map_err(|e| StoreError::invalid_value(key, e)),
        None => Ok(None),
    }
}
