//! Per-replica runtime parameters.
//!
//! The deployment tree mirrors the cluster tree (replica-set → replica) but
//! describes how each process is launched rather than what the coordination
//! store says about it.

use serde::Deserialize;
use serde_yaml::Value;

use crate::cluster::ClusterConfig;
use crate::error::{ConfigError, Result};

/// Launch parameters of one replica process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReplicaLaunch {
    /// Run the router role in this process.
    #[serde(default)]
    pub router: bool,
    /// Run the storage role in this process.
    #[serde(default)]
    pub storage: bool,
    /// Let the process manage leader election through the coordination store.
    #[serde(default)]
    pub automaster: bool,
    /// Coordination-store session TTL in seconds; the process default when unset.
    #[serde(default)]
    pub consul_session_ttl: Option<u64>,
}

/// A replica scheduled for launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedReplica {
    /// Replica-set the replica belongs to.
    pub replica_set: String,
    /// Replica name.
    pub replica: String,
    /// Launch parameters.
    pub launch: ReplicaLaunch,
}

/// Ordered set of replicas to launch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeploymentPlan {
    entries: Vec<PlannedReplica>,
}

impl DeploymentPlan {
    /// Builds a plan from a resolved deployment tree, keeping tree order.
    pub fn from_tree(tree: &Value) -> Result<Self> {
        let top = tree
            .as_mapping()
            .ok_or_else(|| ConfigError::not_a_mapping("<root>"))?;

        let mut entries = Vec::new();
        for (rs_key, rs_value) in top {
            let replica_set = rs_key
                .as_str()
                .ok_or_else(|| ConfigError::invalid_key("<root>"))?;
            let replicas = rs_value
                .as_mapping()
                .ok_or_else(|| ConfigError::not_a_mapping(replica_set))?;

            for (replica_key, launch) in replicas {
                let replica = replica_key
                    .as_str()
                    .ok_or_else(|| ConfigError::invalid_key(replica_set))?;
                let path = format!("{replica_set}.{replica}");
                let launch: ReplicaLaunch = serde_yaml::from_value(launch.clone())
                    .map_err(|e| ConfigError::invalid_attributes(&path, e))?;

                entries.push(PlannedReplica {
                    replica_set: replica_set.to_string(),
                    replica: replica.to_string(),
                    launch,
                });
            }
        }

        Ok(Self { entries })
    }

    /// Checks that every planned replica exists in `config` under the same
    /// replica-set.
    pub fn validate_against(&self, config: &ClusterConfig) -> Result<()> {
        for entry in &self.entries {
            let known = config
                .replica_sets
                .get(&entry.replica_set)
                .is_some_and(|rs| rs.replicas.contains_key(&entry.replica));
            if !known {
                return Err(ConfigError::unknown_replica(
                    &entry.replica_set,
                    &entry.replica,
                ));
            }
        }
        Ok(())
    }

    /// Iterates over planned replicas in tree order.
    pub fn iter(&self) -> impl Iterator<Item = &PlannedReplica> {
        self.entries.iter()
    }

    /// Returns the launch parameters of a replica.
    pub fn launch_of(&self, replica: &str) -> Option<&ReplicaLaunch> {
        self.entries
            .iter()
            .find(|e| e.replica == replica)
            .map(|e| &e.launch)
    }

    /// Returns the number of planned replicas.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is planned.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
