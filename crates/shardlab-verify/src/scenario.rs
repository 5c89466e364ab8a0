//! Per-scenario state.
//!
//! A [`ScenarioContext`] isolates one scenario run: it owns the run id, the
//! cluster and network names derived from it, the identity allocator, the
//! published cluster config and the set of replicas exempt from the log
//! audit.

use rand::Rng;
use shardlab_core::{
    parse_defaulted_yaml, ClusterConfig, ClusterConfigRecord, DeploymentPlan, IdentityAllocator,
};
use shardlab_orchestrator::OrchestratorSettings;
use shardlab_store::{publish_cluster_config, read_cluster_config, KeyNamespace, KvStore};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, warn};

use crate::error::{Result, VerifyError};
use crate::logs::LogClassifier;
use crate::probe::Role;

/// Default prefix of run network names.
pub const DEFAULT_NETWORK_PREFIX: &str = "shardlab_net";

/// Hands out zero-padded run ids: `000`, `001`, ...
#[derive(Debug, Default)]
pub struct RunCounter {
    next: AtomicU64,
}

impl RunCounter {
    /// Creates a counter starting at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next run id.
    pub fn next_run_id(&self) -> String {
        format!("{:03}", self.next.fetch_add(1, Ordering::SeqCst))
    }
}

/// Returns a network name with a random suffix.
pub fn random_network_name(prefix: &str) -> String {
    let suffix: u32 = rand::thread_rng().gen_range(1..=99_999);
    format!("{prefix}_{suffix}")
}

/// State of one scenario run.
#[derive(Debug)]
pub struct ScenarioContext {
    run_id: String,
    cluster_name: String,
    network: String,
    allocator: IdentityAllocator,
    namespace: KeyNamespace,
    classifier: LogClassifier,
    config: Option<ClusterConfig>,
    exempt: BTreeSet<String>,
}

impl ScenarioContext {
    /// Creates the context of run `run_id` on `network`.
    pub fn new(
        run_id: impl Into<String>,
        network: impl Into<String>,
        namespace: KeyNamespace,
        classifier: LogClassifier,
    ) -> Self {
        let run_id = run_id.into();
        Self {
            cluster_name: format!("cluster_{run_id}"),
            run_id,
            network: network.into(),
            allocator: IdentityAllocator::new(),
            namespace,
            classifier,
            config: None,
            exempt: BTreeSet::new(),
        }
    }

    /// Returns the run id.
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Returns the cluster name.
    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    /// Returns the network name.
    pub fn network(&self) -> &str {
        &self.network
    }

    /// Returns the key namespace.
    pub fn namespace(&self) -> &KeyNamespace {
        &self.namespace
    }

    /// Returns orchestration settings scoped to this run.
    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings::new(&self.run_id, &self.network)
    }

    /// Builds a cluster config from defaulted topology text.
    ///
    /// Identities come from this scenario's allocator, so names seen before
    /// keep their identity.
    pub fn build_config(&mut self, topology: &str) -> Result<ClusterConfig> {
        let tree = parse_defaulted_yaml(topology)?;
        let settings = self.orchestrator_settings();
        let config =
            ClusterConfig::from_tree(&tree, &self.cluster_name, &mut self.allocator, |name| {
                settings.replica_address(name)
            })?;
        Ok(config)
    }

    /// Builds a cluster config and publishes it to `store`.
    ///
    /// The config becomes the current config of the scenario.
    pub async fn publish_config(
        &mut self,
        store: &dyn KvStore,
        topology: &str,
    ) -> Result<&ClusterConfig> {
        let config = self.build_config(topology)?;
        publish_cluster_config(store, &self.namespace, &config).await?;
        Ok(self.config.insert(config))
    }

    /// Returns the current config.
    pub fn config(&self) -> Result<&ClusterConfig> {
        self.config
            .as_ref()
            .ok_or_else(|| VerifyError::scenario("no cluster config has been published"))
    }

    /// Builds a deployment plan from defaulted text and checks it against
    /// the current config.
    pub fn deployment_plan(&self, deployment: &str) -> Result<DeploymentPlan> {
        let plan = DeploymentPlan::from_tree(&parse_defaulted_yaml(deployment)?)?;
        plan.validate_against(self.config()?)?;
        Ok(plan)
    }

    /// Reads the published config back from `store`.
    pub async fn read_published(&self, store: &dyn KvStore) -> Result<ClusterConfigRecord> {
        read_cluster_config(store, &self.namespace, &self.cluster_name)
            .await?
            .ok_or_else(|| {
                VerifyError::assertion(format!(
                    "no config published under {}",
                    self.namespace.config_key(&self.cluster_name)
                ))
            })
    }

    /// Checks the leader flag of `replica` in the published config.
    pub async fn check_published_role(
        &self,
        store: &dyn KvStore,
        replica: &str,
        expected: Role,
    ) -> Result<()> {
        let expected_leader = match expected {
            Role::Leader => true,
            Role::Follower => false,
            other => {
                return Err(VerifyError::scenario(format!(
                    "published config cannot express role {other}"
                )))
            }
        };

        let identity = &self
            .config()?
            .replica(replica)
            .ok_or_else(|| VerifyError::scenario(format!("unknown replica {replica}")))?
            .identity;

        let record = self.read_published(store).await?;
        match record.is_leader(identity) {
            Some(leader) if leader == expected_leader => Ok(()),
            Some(leader) => Err(VerifyError::assertion(format!(
                "published config marks {replica} as {}, expected {expected}",
                if leader { Role::Leader } else { Role::Follower }
            ))),
            None => Err(VerifyError::assertion(format!(
                "{replica} is missing from the published config"
            ))),
        }
    }

    /// Exempts a replica from the log audit.
    pub fn exempt(&mut self, replica: impl Into<String>) {
        self.exempt.insert(replica.into());
    }

    /// Exempts several replicas from the log audit.
    pub fn exempt_all<I, S>(&mut self, replicas: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exempt.extend(replicas.into_iter().map(Into::into));
    }

    /// Returns true if a replica is exempt from the log audit.
    pub fn is_exempt(&self, replica: &str) -> bool {
        self.exempt.contains(replica)
    }

    /// Audits captured replica logs.
    pub fn audit_logs(&self, logs: &BTreeMap<String, String>) -> LogAudit {
        let mut audit = LogAudit::default();
        for (replica, text) in logs {
            if self.is_exempt(replica) {
                audit.exempted.insert(replica.clone());
                continue;
            }
            audit.audited += 1;

            let errors = self.classifier.real_errors(text);
            if !errors.is_empty() {
                warn!(replica = %replica, count = errors.len(), "Unexpected errors in replica logs");
                audit.findings.insert(
                    replica.clone(),
                    errors.into_iter().map(str::to_string).collect(),
                );
            }
        }
        info!(
            audited = audit.audited,
            exempted = audit.exempted.len(),
            failing = audit.findings.len(),
            "Log audit complete"
        );
        audit
    }
}

/// Outcome of a log audit.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LogAudit {
    /// Real error lines per replica.
    pub findings: BTreeMap<String, Vec<String>>,
    /// Replicas skipped because they were exempt.
    pub exempted: BTreeSet<String>,
    /// Number of replicas audited.
    pub audited: usize,
}

impl LogAudit {
    /// Returns true if no audited replica logged a real error.
    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }

    /// Converts into an error if any real errors were found.
    pub fn into_result(self) -> Result<()> {
        if self.is_clean() {
            Ok(())
        } else {
            Err(VerifyError::UnexpectedLogErrors {
                findings: self.findings,
            })
        }
    }
}

/// Final report of one scenario run.
#[derive(Debug)]
pub struct ScenarioReport {
    /// Scenario name.
    pub name: String,
    /// Run id.
    pub run_id: String,
    /// Outcome of the scenario steps.
    pub result: Result<()>,
    /// Outcome of the log audit, kept apart from the step outcome.
    pub audit: LogAudit,
    /// Failures while tearing the cluster down.
    pub teardown_errors: Vec<String>,
}

impl ScenarioReport {
    /// Returns true if the steps passed and the logs are clean.
    pub fn passed(&self) -> bool {
        self.result.is_ok() && self.audit.is_clean()
    }
}
