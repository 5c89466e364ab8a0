//! Wire form of the cluster configuration.
//!
//! The coordination store and the system under test address replica-sets and
//! replicas by identity, so the record is keyed by [`Identity`] at every level
//! and carries human-readable names as fields. Maps are ordered, which keeps
//! the encoding byte-stable for an unchanged model.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{ConfigError, Result};
use crate::identity::Identity;

/// Identifier-keyed cluster configuration as stored in the coordination store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfigRecord {
    /// Total number of buckets.
    pub bucket_count: u32,
    /// Rebalancer disbalance threshold.
    pub rebalancer_disbalance_threshold: u32,
    /// Rebalancer max concurrent receiving operations.
    pub rebalancer_max_receiving: u32,
    /// Replica-sets keyed by identity.
    pub sharding: BTreeMap<Identity, ReplicaSetRecord>,
}

/// Replica-set entry of a [`ClusterConfigRecord`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaSetRecord {
    /// Human-readable name. Writers other than this harness may drop it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Sharding weight.
    pub weight: u32,
    /// Replicas keyed by identity.
    pub replicas: BTreeMap<Identity, ReplicaRecord>,
}

/// Replica entry of a [`ReplicaSetRecord`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaRecord {
    /// Human-readable name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Network address.
    pub address: String,
    /// Leader flag.
    pub master: bool,
    /// Leader election weight.
    pub master_weight: u32,
    /// Switchover delay in seconds.
    pub switchover_delay: u32,
}

impl ClusterConfigRecord {
    /// Encodes the record as YAML.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| ConfigError::Serialization(e.to_string()))
    }

    /// Decodes a record read back from the coordination store.
    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).map_err(ConfigError::Parse)
    }

    /// Finds a replica by identity, returning its replica-set identity too.
    pub fn replica(&self, identity: &Identity) -> Option<(&Identity, &ReplicaRecord)> {
        self.sharding
            .iter()
            .find_map(|(rs_id, rs)| rs.replicas.get(identity).map(|r| (rs_id, r)))
    }

    /// Returns the leader flag of a replica, if the replica is present.
    pub fn is_leader(&self, identity: &Identity) -> Option<bool> {
        self.replica(identity).map(|(_, r)| r.master)
    }

    /// Counts replicas flagged as leader in a replica-set.
    pub fn leader_count(&self, replica_set: &Identity) -> usize {
        self.sharding
            .get(replica_set)
            .map(|rs| rs.replicas.values().filter(|r| r.master).count())
            .unwrap_or(0)
    }
}
