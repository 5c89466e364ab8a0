//! Typed sharded-cluster configuration.
//!
//! A [`ClusterConfig`] is built once from a resolved config tree and never
//! mutated afterwards. The tree shape is:
//!
//! ```yaml
//! bucket_count: 100          # optional cluster tunables (scalars)
//! rs1:                       # replica-set (map)
//!   weight: 10               # optional replica-set attribute (scalar)
//!   t1: {master: true}       # replica (map of overrides)
//!   t2: {}
//! ```

use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use std::collections::{BTreeMap, HashSet};

use crate::error::{ConfigError, Result};
use crate::identity::{Identity, IdentityAllocator};
use crate::record::{ClusterConfigRecord, ReplicaRecord, ReplicaSetRecord};

/// Default number of buckets.
pub const DEFAULT_BUCKET_COUNT: u32 = 100;
/// Default rebalancer disbalance threshold.
pub const DEFAULT_DISBALANCE_THRESHOLD: u32 = 10;
/// Default rebalancer max concurrent receiving operations.
pub const DEFAULT_MAX_RECEIVING: u32 = 10;
/// Default replica-set weight.
pub const DEFAULT_REPLICA_SET_WEIGHT: u32 = 10;
/// Default leader weight of a replica.
pub const DEFAULT_LEADER_WEIGHT: u32 = 10;
/// Default switchover delay of a replica.
pub const DEFAULT_SWITCHOVER_DELAY: u32 = 0;

/// Port the database listens on inside each container.
pub const REPLICA_PORT: u16 = 3301;

/// Configuration of a single replica.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaConfig {
    /// Replica name, unique within the cluster.
    pub name: String,
    /// Allocated identity.
    pub identity: Identity,
    /// Address other replicas use to reach this one.
    pub address: String,
    /// Whether this replica is configured as the replica-set leader.
    pub leader: bool,
    /// Leader election weight.
    pub leader_weight: u32,
    /// Seconds to wait before switching leadership over.
    pub switchover_delay: u32,
}

/// Configuration of a replica-set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaSetConfig {
    /// Replica-set name.
    pub name: String,
    /// Allocated identity.
    pub identity: Identity,
    /// Sharding weight.
    pub weight: u32,
    /// Replicas indexed by name.
    pub replicas: BTreeMap<String, ReplicaConfig>,
}

impl ReplicaSetConfig {
    /// Returns the replicas flagged as leader.
    pub fn leaders(&self) -> impl Iterator<Item = &ReplicaConfig> {
        self.replicas.values().filter(|r| r.leader)
    }
}

/// Configuration of a whole sharded cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterConfig {
    /// Cluster name, also the coordination-store namespace.
    pub cluster_name: String,
    /// Total number of buckets.
    pub bucket_count: u32,
    /// Rebalancer disbalance threshold (percent).
    pub rebalancer_disbalance_threshold: u32,
    /// Rebalancer max concurrent receiving operations.
    pub rebalancer_max_receiving: u32,
    /// Replica-sets indexed by name.
    pub replica_sets: BTreeMap<String, ReplicaSetConfig>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ClusterAttributes {
    bucket_count: Option<u32>,
    rebalancer_disbalance_threshold: Option<u32>,
    rebalancer_max_receiving: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ReplicaSetAttributes {
    weight: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ReplicaAttributes {
    #[serde(alias = "leader")]
    master: Option<bool>,
    #[serde(alias = "leader_weight")]
    master_weight: Option<u32>,
    switchover_delay: Option<u32>,
    address: Option<String>,
}

impl ClusterConfig {
    /// Builds a cluster config from a resolved tree.
    ///
    /// Identities are allocated in tree order: each replica-set first, then
    /// its replicas. `address_of` produces the default address of a replica
    /// from its name; an `address` attribute in the tree overrides it.
    pub fn from_tree<F>(
        tree: &Value,
        cluster_name: impl Into<String>,
        allocator: &mut IdentityAllocator,
        address_of: F,
    ) -> Result<Self>
    where
        F: Fn(&str) -> String,
    {
        let top = tree.as_mapping().ok_or_else(|| ConfigError::not_a_mapping("<root>"))?;
        let (scalars, replica_sets) = split_level(top, "<root>")?;
        let attrs: ClusterAttributes = decode_attributes(scalars, "<root>")?;

        let mut seen = HashSet::new();
        let mut sets = BTreeMap::new();

        for (rs_name, rs_tree) in replica_sets {
            claim_name(&mut seen, rs_name)?;
            let identity = allocator.allocate(rs_name);

            let (rs_scalars, replica_trees) = split_level(rs_tree, rs_name)?;
            let rs_attrs: ReplicaSetAttributes = decode_attributes(rs_scalars, rs_name)?;

            let mut replicas = BTreeMap::new();
            for (replica_name, replica_tree) in replica_trees {
                claim_name(&mut seen, replica_name)?;
                let path = format!("{rs_name}.{replica_name}");
                let overrides: ReplicaAttributes =
                    serde_yaml::from_value(Value::Mapping(replica_tree.clone()))
                        .map_err(|e| ConfigError::invalid_attributes(&path, e))?;

                let replica = ReplicaConfig {
                    name: replica_name.to_string(),
                    identity: allocator.allocate(replica_name),
                    address: overrides
                        .address
                        .unwrap_or_else(|| address_of(replica_name)),
                    leader: overrides.master.unwrap_or(false),
                    leader_weight: overrides.master_weight.unwrap_or(DEFAULT_LEADER_WEIGHT),
                    switchover_delay: overrides
                        .switchover_delay
                        .unwrap_or(DEFAULT_SWITCHOVER_DELAY),
                };
                replicas.insert(replica.name.clone(), replica);
            }

            sets.insert(
                rs_name.to_string(),
                ReplicaSetConfig {
                    name: rs_name.to_string(),
                    identity,
                    weight: rs_attrs.weight.unwrap_or(DEFAULT_REPLICA_SET_WEIGHT),
                    replicas,
                },
            );
        }

        Ok(Self {
            cluster_name: cluster_name.into(),
            bucket_count: attrs.bucket_count.unwrap_or(DEFAULT_BUCKET_COUNT),
            rebalancer_disbalance_threshold: attrs
                .rebalancer_disbalance_threshold
                .unwrap_or(DEFAULT_DISBALANCE_THRESHOLD),
            rebalancer_max_receiving: attrs
                .rebalancer_max_receiving
                .unwrap_or(DEFAULT_MAX_RECEIVING),
            replica_sets: sets,
        })
    }

    /// Returns the replica with the given name.
    pub fn replica(&self, name: &str) -> Option<&ReplicaConfig> {
        self.replica_sets
            .values()
            .find_map(|rs| rs.replicas.get(name))
    }

    /// Returns the replica-set that contains the named replica.
    pub fn replica_set_of(&self, replica: &str) -> Option<&ReplicaSetConfig> {
        self.replica_sets
            .values()
            .find(|rs| rs.replicas.contains_key(replica))
    }

    /// Iterates over every replica together with its replica-set.
    pub fn replicas(&self) -> impl Iterator<Item = (&ReplicaSetConfig, &ReplicaConfig)> {
        self.replica_sets
            .values()
            .flat_map(|rs| rs.replicas.values().map(move |r| (rs, r)))
    }

    /// Iterates over replicas flagged as leader.
    pub fn leaders(&self) -> impl Iterator<Item = &ReplicaConfig> {
        self.replica_sets.values().flat_map(ReplicaSetConfig::leaders)
    }

    /// Converts the model into its identifier-keyed wire form.
    pub fn to_record(&self) -> ClusterConfigRecord {
        let sharding = self
            .replica_sets
            .values()
            .map(|rs| {
                let replicas = rs
                    .replicas
                    .values()
                    .map(|r| {
                        (
                            r.identity.clone(),
                            ReplicaRecord {
                                name: Some(r.name.clone()),
                                address: r.address.clone(),
                                master: r.leader,
                                master_weight: r.leader_weight,
                                switchover_delay: r.switchover_delay,
                            },
                        )
                    })
                    .collect();

                (
                    rs.identity.clone(),
                    ReplicaSetRecord {
                        name: Some(rs.name.clone()),
                        weight: rs.weight,
                        replicas,
                    },
                )
            })
            .collect();

        ClusterConfigRecord {
            bucket_count: self.bucket_count,
            rebalancer_disbalance_threshold: self.rebalancer_disbalance_threshold,
            rebalancer_max_receiving: self.rebalancer_max_receiving,
            sharding,
        }
    }

    /// Encodes the wire form as YAML. Equal models give identical text.
    pub fn to_yaml(&self) -> Result<String> {
        self.to_record().to_yaml()
    }
}

/// Splits a level into scalar attributes and named nested maps.
fn split_level<'a>(
    level: &'a Mapping,
    path: &str,
) -> Result<(Mapping, Vec<(&'a str, &'a Mapping)>)> {
    let mut scalars = Mapping::new();
    let mut nested = Vec::new();

    for (key, value) in level {
        let name = key.as_str().ok_or_else(|| ConfigError::invalid_key(path))?;
        match value {
            Value::Mapping(map) => nested.push((name, map)),
            other => {
                scalars.insert(key.clone(), other.clone());
            }
        }
    }

    Ok((scalars, nested))
}

fn decode_attributes<T>(scalars: Mapping, path: &str) -> Result<T>
where
    T: serde::de::DeserializeOwned + Default,
{
    if scalars.is_empty() {
        return Ok(T::default());
    }
    serde_yaml::from_value(Value::Mapping(scalars))
        .map_err(|e| ConfigError::invalid_attributes(path, e))
}

fn claim_name(seen: &mut HashSet<String>, name: &str) -> Result<()> {
    if seen.insert(name.to_string()) {
        Ok(())
    } else {
        Err(ConfigError::DuplicateName(name.to_string()))
    }
}
