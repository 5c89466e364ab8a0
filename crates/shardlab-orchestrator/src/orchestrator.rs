//! Cluster provisioning and scoped teardown.
//!
//! [`ClusterOrchestrator`] turns a [`ClusterConfig`] and a [`DeploymentPlan`]
//! into containers on one network, and guarantees teardown through
//! [`ClusterOrchestrator::scoped`].

use shardlab_core::{
    ClusterConfig, DeploymentPlan, ReplicaConfig, ReplicaLaunch, ReplicaSetConfig, RetryPolicy,
    REPLICA_PORT,
};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::cluster::Cluster;
use crate::container::{ContainerHandle, ContainerSpec, ProcessState, DEFAULT_MEMORY_BYTES};
use crate::error::{OrchestratorError, Result};
use crate::net::{wait_tcp_port, DEFAULT_PORT_TIMEOUT};
use crate::runtime::ContainerRuntime;

/// Default image of a database replica.
pub const DEFAULT_REPLICA_IMAGE: &str = "tarantool/tarantool:2.3";

/// Label carrying the run identifier.
pub const RUN_LABEL: &str = "shardlab.run";

/// Label carrying the replica-set name.
pub const REPLICA_SET_LABEL: &str = "shardlab.replica_set";

/// Label carrying the replica name.
pub const REPLICA_LABEL: &str = "shardlab.replica";

/// Per-run orchestration settings.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Run identifier; prefixes every container name.
    pub run_id: String,

    /// Network the run's containers attach to.
    pub network: String,

    /// Replica image.
    pub replica_image: String,

    /// Replica command, replacing the image default when set.
    pub replica_command: Option<Vec<String>>,

    /// Replica memory limit.
    pub memory_bytes: Option<u64>,

    /// Coordination store URL as seen from inside the network.
    pub coordination_url: String,

    /// Retry policy for daemon calls.
    pub retry: RetryPolicy,

    /// Host that published ports are reachable on.
    pub port_host: String,

    /// How long to wait for a published port to open.
    pub port_timeout: Duration,
}

impl OrchestratorSettings {
    /// Creates settings for a run with defaults for everything else.
    pub fn new(run_id: impl Into<String>, network: impl Into<String>) -> Self {
        let run_id = run_id.into();
        let coordination_url = format!("http://{run_id}_consul:8500");
        Self {
            run_id,
            network: network.into(),
            replica_image: DEFAULT_REPLICA_IMAGE.to_string(),
            replica_command: None,
            memory_bytes: Some(DEFAULT_MEMORY_BYTES),
            coordination_url,
            retry: RetryPolicy::default(),
            port_host: "localhost".to_string(),
            port_timeout: DEFAULT_PORT_TIMEOUT,
        }
    }

    /// Sets the replica image.
    pub fn with_replica_image(mut self, image: impl Into<String>) -> Self {
        self.replica_image = image.into();
        self
    }

    /// Sets the replica command.
    pub fn with_replica_command(mut self, command: Vec<String>) -> Self {
        self.replica_command = Some(command);
        self
    }

    /// Sets the replica memory limit.
    pub fn with_memory_bytes(mut self, memory_bytes: Option<u64>) -> Self {
        self.memory_bytes = memory_bytes;
        self
    }

    /// Sets the coordination store URL.
    pub fn with_coordination_url(mut self, url: impl Into<String>) -> Self {
        self.coordination_url = url.into();
        self
    }

    /// Sets the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the published port host and timeout.
    pub fn with_port_wait(mut self, host: impl Into<String>, timeout: Duration) -> Self {
        self.port_host = host.into();
        self.port_timeout = timeout;
        self
    }

    /// Returns the container name of a replica or service.
    pub fn container_name(&self, name: &str) -> String {
        format!("{}_{name}", self.run_id)
    }

    /// Returns the network address of a replica.
    pub fn replica_address(&self, replica: &str) -> String {
        format!("{}:{REPLICA_PORT}", self.container_name(replica))
    }
}

/// Result of a scoped cluster run.
#[derive(Debug)]
pub struct Scoped<T, E> {
    /// What the body returned.
    pub result: std::result::Result<T, E>,

    /// Teardown outcome.
    pub teardown: TeardownReport,
}

/// What teardown captured and what went wrong during it.
#[derive(Debug, Default)]
pub struct TeardownReport {
    /// Logs of every replica, captured before removal.
    pub logs: BTreeMap<String, String>,

    /// Removal failures.
    pub errors: Vec<String>,
}

impl TeardownReport {
    /// Returns true if every container was removed.
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Provisions and tears down test clusters.
pub struct ClusterOrchestrator {
    runtime: Arc<dyn ContainerRuntime>,
    settings: OrchestratorSettings,
}

impl ClusterOrchestrator {
    /// Creates an orchestrator.
    pub fn new(runtime: Arc<dyn ContainerRuntime>, settings: OrchestratorSettings) -> Self {
        Self { runtime, settings }
    }

    /// Returns the settings.
    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Returns the runtime.
    pub fn runtime(&self) -> &Arc<dyn ContainerRuntime> {
        &self.runtime
    }

    /// Creates an empty cluster bound to this orchestrator's runtime.
    pub fn empty_cluster(&self, name: impl Into<String>) -> Cluster {
        Cluster::new(name, Arc::clone(&self.runtime))
    }

    /// Removes leftovers of a previous run and creates the run network.
    pub async fn prepare_network(&self) -> Result<()> {
        let network = self.settings.network.as_str();
        self.settings
            .retry
            .run("purge network", || self.runtime.purge_network(network))
            .await?;
        self.settings
            .retry
            .run("create network", || self.runtime.create_network(network))
            .await?;
        info!(network, "Network ready");
        Ok(())
    }

    /// Removes the run network and anything still attached to it.
    pub async fn release_network(&self) -> Result<()> {
        let network = self.settings.network.as_str();
        self.settings
            .retry
            .run("purge network", || self.runtime.purge_network(network))
            .await
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<ContainerHandle> {
        self.settings
            .retry
            .run("create container", || self.runtime.create(spec))
            .await
    }

    /// Creates and starts a service container, then waits for `port` to be
    /// reachable through its published host port. Returns the host port.
    pub async fn start_service(
        &self,
        cluster: &mut Cluster,
        service: &str,
        spec: ContainerSpec,
        port: u16,
    ) -> Result<u16> {
        let mut handle = self.create_container(&spec).await?;
        let started = self.start_published(&mut handle, port).await;
        cluster.insert_service(service, handle);
        let host_port = started?;

        wait_tcp_port(&self.settings.port_host, host_port, self.settings.port_timeout).await?;
        info!(service, container = %spec.name, host_port, "Service started");
        Ok(host_port)
    }

    async fn start_published(&self, handle: &mut ContainerHandle, port: u16) -> Result<u16> {
        self.runtime.start(&handle.container_id).await?;
        handle.transition(ProcessState::Started)?;

        let host_port = self
            .runtime
            .host_port(&handle.container_id, port)
            .await?
            .ok_or_else(|| {
                OrchestratorError::configuration(format!(
                    "port {port} of {} is not published",
                    handle.name
                ))
            })?;
        handle.port_mappings.insert(port, host_port);
        Ok(host_port)
    }

    /// Builds the container spec of one replica.
    pub fn replica_spec(
        &self,
        config: &ClusterConfig,
        replica_set: &ReplicaSetConfig,
        replica: &ReplicaConfig,
        launch: &ReplicaLaunch,
    ) -> ContainerSpec {
        let settings = &self.settings;
        let mut builder = ContainerSpec::builder(
            settings.container_name(&replica.name),
            &settings.replica_image,
        )
        .hostname(&replica.name)
        .network(&settings.network)
        .entrypoint(Vec::<String>::new())
        .memory_bytes(settings.memory_bytes)
        .env("SHARDLAB_CLUSTER_NAME", &config.cluster_name)
        .env("SHARDLAB_REPLICASET_UUID", replica_set.identity.as_str())
        .env("SHARDLAB_INSTANCE_UUID", replica.identity.as_str())
        .env("SHARDLAB_INSTANCE_NAME", &replica.name)
        .env("SHARDLAB_ROUTER", launch.router.to_string())
        .env("SHARDLAB_STORAGE", launch.storage.to_string())
        .env("SHARDLAB_AUTOMASTER", launch.automaster.to_string())
        .env("SHARDLAB_CONSUL_HTTP_ADDRESS", &settings.coordination_url)
        .label(RUN_LABEL, &settings.run_id)
        .label(REPLICA_SET_LABEL, &replica_set.name)
        .label(REPLICA_LABEL, &replica.name);

        if let Some(ttl) = launch.consul_session_ttl {
            builder = builder.env("SHARDLAB_CONSUL_SESSION_TTL", ttl.to_string());
        }
        if let Some(command) = &settings.replica_command {
            builder = builder.command(command.clone());
        }
        builder.build()
    }

    /// Creates one container per planned replica and adds them to `cluster`.
    ///
    /// Containers are created, not started. If any creation fails, the
    /// containers created so far are removed and the error is returned.
    pub async fn provision(
        &self,
        cluster: &mut Cluster,
        config: &ClusterConfig,
        plan: &DeploymentPlan,
    ) -> Result<()> {
        plan.validate_against(config)
            .map_err(|e| OrchestratorError::configuration(e.to_string()))?;

        info!(
            cluster = %config.cluster_name,
            replicas = plan.len(),
            network = %self.settings.network,
            "Provisioning cluster"
        );

        let mut created: Vec<(String, String, ContainerHandle)> = Vec::with_capacity(plan.len());
        for entry in plan.iter() {
            let (replica_set, replica) = config
                .replica_sets
                .get(&entry.replica_set)
                .and_then(|rs| rs.replicas.get(&entry.replica).map(|r| (rs, r)))
                .ok_or_else(|| OrchestratorError::replica_not_found(&entry.replica))?;

            let spec = self.replica_spec(config, replica_set, replica, &entry.launch);
            match self.create_container(&spec).await {
                Ok(handle) => {
                    created.push((entry.replica_set.clone(), entry.replica.clone(), handle))
                }
                Err(e) => {
                    error!(replica = %entry.replica, error = %e, "Failed to create replica");
                    self.discard(created.into_iter().map(|(_, _, h)| h)).await;
                    return Err(e);
                }
            }
        }

        for (replica_set, replica, handle) in created {
            cluster.insert_replica(replica_set, replica, handle);
        }
        Ok(())
    }

    async fn discard(&self, handles: impl Iterator<Item = ContainerHandle>) {
        for handle in handles {
            if let Err(e) = self.runtime.remove(&handle.container_id, true).await {
                warn!(container = %handle.name, error = %e, "Failed to remove partially provisioned container");
            }
        }
    }

    /// Runs `body` against `cluster`, then tears the cluster down.
    ///
    /// The body owns the cluster while it runs and hands it back with its
    /// result. Teardown happens whether the body succeeds or fails. Replica
    /// logs are captured before removal; removal failures are logged and
    /// reported in the [`TeardownReport`] without replacing the body's result.
    pub async fn scoped<T, E, F, Fut>(&self, cluster: Cluster, body: F) -> Scoped<T, E>
    where
        F: FnOnce(Cluster) -> Fut,
        Fut: Future<Output = (Cluster, std::result::Result<T, E>)>,
    {
        let (mut cluster, result) = body(cluster).await;

        let logs = cluster.collect_logs().await;
        let errors = cluster.remove_all().await;
        for e in &errors {
            error!(cluster = %cluster.name(), error = %e, "Teardown error");
        }

        Scoped {
            result,
            teardown: TeardownReport { logs, errors },
        }
    }
}
