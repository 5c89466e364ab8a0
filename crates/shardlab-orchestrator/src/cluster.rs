//! Runtime view of a provisioned test cluster.
//!
//! A [`Cluster`] owns the container handles of one scenario, grouped
//! replica-set → replica, plus any auxiliary service containers (such as the
//! coordination store). Every operation addresses a replica by name; unknown
//! names are [`OrchestratorError::ReplicaNotFound`].

use shardlab_core::REPLICA_PORT;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::container::{ContainerHandle, ProcessState};
use crate::error::{OrchestratorError, Result};
use crate::runtime::{ContainerRuntime, ExecOutput};

/// Builds the command that feeds `script` to the admin console of the
/// database inside a container.
pub fn console_command(script: &str) -> Vec<String> {
    vec![
        "bash".to_string(),
        "-ec".to_string(),
        format!("cat <<\"EOF\" | tarantoolctl connect {REPLICA_PORT}\n{script}\nEOF\n"),
    ]
}

/// Live processes of one scenario.
pub struct Cluster {
    name: String,
    runtime: Arc<dyn ContainerRuntime>,
    replica_sets: BTreeMap<String, BTreeMap<String, ContainerHandle>>,
    services: BTreeMap<String, ContainerHandle>,
}

impl std::fmt::Debug for Cluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cluster")
            .field("name", &self.name)
            .field("runtime", &self.runtime.name())
            .field("replica_sets", &self.replica_sets)
            .field("services", &self.services)
            .finish()
    }
}

impl Cluster {
    /// Creates an empty cluster.
    pub fn new(name: impl Into<String>, runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            name: name.into(),
            runtime,
            replica_sets: BTreeMap::new(),
            services: BTreeMap::new(),
        }
    }

    /// Returns the cluster name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn insert_replica(
        &mut self,
        replica_set: impl Into<String>,
        replica: impl Into<String>,
        handle: ContainerHandle,
    ) {
        self.replica_sets
            .entry(replica_set.into())
            .or_default()
            .insert(replica.into(), handle);
    }

    pub(crate) fn insert_service(&mut self, name: impl Into<String>, handle: ContainerHandle) {
        self.services.insert(name.into(), handle);
    }

    /// Returns the handle of a replica.
    pub fn find(&self, replica: &str) -> Result<&ContainerHandle> {
        self.replica_sets
            .values()
            .find_map(|rs| rs.get(replica))
            .ok_or_else(|| OrchestratorError::replica_not_found(replica))
    }

    fn find_mut(&mut self, replica: &str) -> Result<&mut ContainerHandle> {
        self.replica_sets
            .values_mut()
            .find_map(|rs| rs.get_mut(replica))
            .ok_or_else(|| OrchestratorError::replica_not_found(replica))
    }

    /// Returns the handle of a service container.
    pub fn service(&self, name: &str) -> Result<&ContainerHandle> {
        self.services
            .get(name)
            .ok_or_else(|| OrchestratorError::replica_not_found(name))
    }

    /// Returns the replica-set a replica belongs to.
    pub fn replica_set_of(&self, replica: &str) -> Option<&str> {
        self.replica_sets
            .iter()
            .find(|(_, replicas)| replicas.contains_key(replica))
            .map(|(rs, _)| rs.as_str())
    }

    /// Returns the replicas of a replica-set.
    pub fn members(&self, replica_set: &str) -> Result<Vec<&str>> {
        self.replica_sets
            .get(replica_set)
            .map(|replicas| replicas.keys().map(String::as_str).collect())
            .ok_or_else(|| OrchestratorError::replica_not_found(replica_set))
    }

    /// Returns all replica names, ordered by replica-set then replica.
    pub fn replica_names(&self) -> Vec<&str> {
        self.processes().map(|(_, replica, _)| replica).collect()
    }

    /// Iterates over `(replica_set, replica, handle)` for every replica.
    pub fn processes(&self) -> impl Iterator<Item = (&str, &str, &ContainerHandle)> {
        self.replica_sets.iter().flat_map(|(rs, replicas)| {
            replicas
                .iter()
                .map(move |(name, handle)| (rs.as_str(), name.as_str(), handle))
        })
    }

    /// Returns the number of replicas.
    pub fn len(&self) -> usize {
        self.replica_sets.values().map(BTreeMap::len).sum()
    }

    /// Returns true if no replica is tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Starts a replica. Starting a replica that is already up is a no-op.
    ///
    /// The state is read back from the runtime first, so a replica that
    /// crashed behind the cluster's back is started again.
    pub async fn start(&mut self, replica: &str) -> Result<()> {
        let current = self.refresh_state(replica).await?;
        if current.is_up() {
            debug!(replica, "Replica already started");
            return Ok(());
        }

        let runtime = Arc::clone(&self.runtime);
        let handle = self.find_mut(replica)?;
        if !handle.state.can_transition_to(&ProcessState::Started) {
            return Err(OrchestratorError::invalid_state_transition(
                &handle.name,
                handle.state.name(),
                ProcessState::Started.name(),
            ));
        }

        runtime.start(&handle.container_id).await?;
        handle.transition(ProcessState::Started)?;
        info!(replica, container = %handle.name, "Started replica");
        Ok(())
    }

    /// Starts every replica of a replica-set.
    pub async fn start_replica_set(&mut self, replica_set: &str) -> Result<()> {
        let replicas: Vec<String> = self
            .members(replica_set)?
            .into_iter()
            .map(str::to_string)
            .collect();
        for replica in replicas {
            self.start(&replica).await?;
        }
        Ok(())
    }

    /// Starts every replica.
    pub async fn start_all(&mut self) -> Result<()> {
        let replicas: Vec<String> = self.replica_names().into_iter().map(str::to_string).collect();
        for replica in replicas {
            self.start(&replica).await?;
        }
        Ok(())
    }

    /// Stops a replica gracefully. Stopping an exited replica is a no-op.
    pub async fn stop(&mut self, replica: &str) -> Result<()> {
        if !self.prepare_exit(replica).await? {
            return Ok(());
        }
        let runtime = Arc::clone(&self.runtime);
        let handle = self.find_mut(replica)?;

        runtime.stop(&handle.container_id).await?;
        handle.transition(ProcessState::Exited { exit_code: None })?;
        info!(replica, "Stopped replica");
        Ok(())
    }

    /// Kills a replica with SIGKILL. Killing an exited replica is a no-op.
    pub async fn kill(&mut self, replica: &str) -> Result<()> {
        if !self.prepare_exit(replica).await? {
            return Ok(());
        }
        let runtime = Arc::clone(&self.runtime);
        let handle = self.find_mut(replica)?;

        runtime.kill(&handle.container_id).await?;
        handle.transition(ProcessState::Exited { exit_code: None })?;
        info!(replica, "Killed replica");
        Ok(())
    }

    /// Refreshes the state of a replica before a stop or kill. Returns false
    /// when the process has already exited.
    async fn prepare_exit(&mut self, replica: &str) -> Result<bool> {
        let current = self.refresh_state(replica).await?;
        if current.is_exited() {
            debug!(replica, "Replica already exited");
            return Ok(false);
        }

        let next = ProcessState::Exited { exit_code: None };
        if !current.can_transition_to(&next) {
            let handle = self.find(replica)?;
            return Err(OrchestratorError::invalid_state_transition(
                &handle.name,
                current.name(),
                next.name(),
            ));
        }
        Ok(true)
    }

    /// Kills a service container.
    pub async fn kill_service(&mut self, name: &str) -> Result<()> {
        let runtime = Arc::clone(&self.runtime);
        let handle = self
            .services
            .get_mut(name)
            .ok_or_else(|| OrchestratorError::replica_not_found(name))?;

        runtime.kill(&handle.container_id).await?;
        handle.state = ProcessState::Exited { exit_code: None };
        info!(service = name, "Killed service");
        Ok(())
    }

    /// Runs a command inside a replica.
    pub async fn exec(&self, replica: &str, cmd: &[String]) -> Result<ExecOutput> {
        let handle = self.find(replica)?;
        self.runtime.exec(&handle.container_id, cmd).await
    }

    /// Runs a script in the admin console of a replica.
    pub async fn exec_script(&self, replica: &str, script: &str) -> Result<ExecOutput> {
        self.exec(replica, &console_command(script)).await
    }

    /// Returns the logs of a replica.
    pub async fn logs(&self, replica: &str) -> Result<String> {
        let handle = self.find(replica)?;
        self.runtime.logs(&handle.container_id).await
    }

    /// Returns the state the runtime reports for a replica without recording
    /// it on the handle.
    pub async fn observe_state(&self, replica: &str) -> Result<ProcessState> {
        let handle = self.find(replica)?;
        self.runtime.state(&handle.container_id).await
    }

    /// Queries the runtime for the state of a replica and records it.
    pub async fn refresh_state(&mut self, replica: &str) -> Result<ProcessState> {
        let runtime = Arc::clone(&self.runtime);
        let handle = self.find_mut(replica)?;
        let observed = runtime.state(&handle.container_id).await?;

        if observed != handle.state {
            debug!(replica, from = %handle.state, to = %observed, "Replica state changed");
            handle.transition(observed)?;
        }
        Ok(observed)
    }

    /// Fetches the logs of every replica. Replicas whose logs cannot be read
    /// are skipped with a warning.
    pub async fn collect_logs(&self) -> BTreeMap<String, String> {
        let mut logs = BTreeMap::new();
        for (_, replica, handle) in self.processes() {
            match self.runtime.logs(&handle.container_id).await {
                Ok(text) => {
                    logs.insert(replica.to_string(), text);
                }
                Err(e) => {
                    warn!(replica, error = %e, "Failed to fetch logs");
                }
            }
        }
        logs
    }

    /// Force-removes every replica and service container.
    ///
    /// Keeps going past failures and returns them; a container that is
    /// already gone counts as removed.
    pub async fn remove_all(&mut self) -> Vec<String> {
        info!(cluster = %self.name, replicas = self.len(), "Tearing down cluster");

        let runtime = Arc::clone(&self.runtime);
        let mut errors = Vec::new();

        let handles = self
            .replica_sets
            .values_mut()
            .flat_map(|rs| rs.values_mut())
            .chain(self.services.values_mut());

        for handle in handles {
            if handle.state == ProcessState::Removed {
                continue;
            }
            match runtime.remove(&handle.container_id, true).await {
                Ok(()) => handle.state = ProcessState::Removed,
                Err(e) if e.is_not_found() => handle.state = ProcessState::Removed,
                Err(e) => {
                    error!(
                        container = %handle.name,
                        id = %handle.short_id(),
                        error = %e,
                        "Failed to remove container"
                    );
                    errors.push(format!("{}: {e}", handle.name));
                }
            }
        }

        if errors.is_empty() {
            info!(cluster = %self.name, "Cluster teardown complete");
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ContainerSpec;
    use crate::runtime::MemoryRuntime;

    async fn cluster_with(runtime: &Arc<MemoryRuntime>, members: &[(&str, &str)]) -> Cluster {
        runtime.create_network("net").await.unwrap();
        let mut cluster = Cluster::new("cluster_001", runtime.clone());
        for (rs, replica) in members {
            let spec = ContainerSpec::builder(format!("001_{replica}"), "tarantool")
                .network("net")
                .build();
            let handle = runtime.create(&spec).await.unwrap();
            cluster.insert_replica(*rs, *replica, handle);
        }
        cluster
    }

    #[test]
    fn test_console_command() {
        let cmd = console_command("return 1");
        assert_eq!(cmd[0], "bash");
        assert_eq!(cmd[1], "-ec");
        assert_eq!(
            cmd[2],
            "cat <<\"EOF\" | tarantoolctl connect 3301\nreturn 1\nEOF\n"
        );
    }

    #[tokio::test]
    async fn test_lookup() {
        let runtime = Arc::new(MemoryRuntime::new());
        let cluster = cluster_with(&runtime, &[("rs1", "t1"), ("rs1", "t2"), ("rs2", "t3")]).await;

        assert_eq!(cluster.len(), 3);
        assert_eq!(cluster.replica_names(), vec!["t1", "t2", "t3"]);
        assert_eq!(cluster.replica_set_of("t3"), Some("rs2"));
        assert_eq!(cluster.members("rs1").unwrap(), vec!["t1", "t2"]);
        assert_eq!(cluster.find("t2").unwrap().name, "001_t2");

        let err = cluster.find("t9").unwrap_err();
        assert!(matches!(err, OrchestratorError::ReplicaNotFound(ref n) if n == "t9"));
    }

    #[tokio::test]
    async fn test_start_stop_restart() {
        let runtime = Arc::new(MemoryRuntime::new());
        let mut cluster = cluster_with(&runtime, &[("rs1", "t1")]).await;

        cluster.start("t1").await.unwrap();
        assert_eq!(cluster.find("t1").unwrap().state, ProcessState::Started);
        // second start is a no-op
        cluster.start("t1").await.unwrap();

        assert_eq!(cluster.refresh_state("t1").await.unwrap(), ProcessState::Running);

        cluster.stop("t1").await.unwrap();
        assert!(cluster.find("t1").unwrap().state.is_exited());

        cluster.start("t1").await.unwrap();
        assert_eq!(cluster.refresh_state("t1").await.unwrap(), ProcessState::Running);
    }

    #[tokio::test]
    async fn test_stop_before_start_is_rejected() {
        let runtime = Arc::new(MemoryRuntime::new());
        let mut cluster = cluster_with(&runtime, &[("rs1", "t1")]).await;

        let err = cluster.stop("t1").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidStateTransition { .. }));
    }

    #[tokio::test]
    async fn test_crash_is_observed() {
        let runtime = Arc::new(MemoryRuntime::new());
        let mut cluster = cluster_with(&runtime, &[("rs1", "t1")]).await;
        cluster.start_all().await.unwrap();

        runtime.exit("001_t1", 139).await.unwrap();
        assert_eq!(
            cluster.refresh_state("t1").await.unwrap(),
            ProcessState::Exited {
                exit_code: Some(139)
            }
        );
    }

    #[tokio::test]
    async fn test_restart_after_crash() {
        let runtime = Arc::new(MemoryRuntime::new());
        let mut cluster = cluster_with(&runtime, &[("rs1", "t1"), ("rs1", "t2")]).await;
        cluster.start_all().await.unwrap();

        // the process dies without the cluster being told
        runtime.exit("001_t1", 139).await.unwrap();
        assert_eq!(cluster.find("t1").unwrap().state, ProcessState::Started);

        cluster.start("t1").await.unwrap();
        assert_eq!(cluster.observe_state("t1").await.unwrap(), ProcessState::Running);
        assert_eq!(cluster.find("t1").unwrap().state, ProcessState::Started);
    }

    #[tokio::test]
    async fn test_stop_and_kill_after_crash_are_noops() {
        let runtime = Arc::new(MemoryRuntime::new());
        let mut cluster = cluster_with(&runtime, &[("rs1", "t1")]).await;
        cluster.start_all().await.unwrap();
        runtime.exit("001_t1", 139).await.unwrap();

        cluster.stop("t1").await.unwrap();
        cluster.kill("t1").await.unwrap();

        let journal = runtime.journal().await;
        assert!(!journal.contains(&"stop 001_t1".to_string()));
        assert!(!journal.contains(&"kill 001_t1".to_string()));
        assert_eq!(
            cluster.find("t1").unwrap().state,
            ProcessState::Exited {
                exit_code: Some(139)
            }
        );
    }

    #[tokio::test]
    async fn test_start_replica_set() {
        let runtime = Arc::new(MemoryRuntime::new());
        let mut cluster = cluster_with(&runtime, &[("rs1", "t1"), ("rs1", "t2"), ("rs2", "t3")]).await;

        cluster.start_replica_set("rs1").await.unwrap();
        assert!(cluster.find("t1").unwrap().state.is_up());
        assert!(cluster.find("t2").unwrap().state.is_up());
        assert_eq!(cluster.find("t3").unwrap().state, ProcessState::Created);
        assert!(cluster.start_replica_set("rs9").await.is_err());
    }

    #[tokio::test]
    async fn test_remove_all_continues_past_failures() {
        let runtime = Arc::new(MemoryRuntime::new());
        let mut cluster = cluster_with(&runtime, &[("rs1", "t1"), ("rs1", "t2"), ("rs2", "t3")]).await;
        runtime.fail_remove("001_t2").await;

        let errors = cluster.remove_all().await;
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("001_t2"));
        assert_eq!(runtime.container_names().await, vec!["001_t2".to_string()]);
        assert_eq!(cluster.find("t1").unwrap().state, ProcessState::Removed);
        assert_eq!(cluster.find("t2").unwrap().state, ProcessState::Created);
    }

    #[tokio::test]
    async fn test_collect_logs() {
        let runtime = Arc::new(MemoryRuntime::new());
        let cluster = cluster_with(&runtime, &[("rs1", "t1"), ("rs1", "t2")]).await;
        runtime.push_log("001_t1", "I> ready").await.unwrap();

        let logs = cluster.collect_logs().await;
        assert_eq!(logs.len(), 2);
        assert_eq!(logs["t1"], "I> ready\n");
        assert_eq!(logs["t2"], "");
    }
}
