//! In-process container runtime.
//!
//! Keeps containers as plain records so orchestration and verification logic
//! can be exercised without a daemon. Exec output comes from a pluggable
//! responder, and failures can be injected per container name.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::container::{ContainerHandle, ContainerSpec, ProcessState};
use crate::error::{OrchestratorError, Result};
use crate::runtime::r#trait::{ContainerRuntime, ExecOutput};

/// Produces exec output from the container name and the command.
pub type ExecResponder = Arc<dyn Fn(&str, &[String]) -> ExecOutput + Send + Sync>;

const FIRST_HOST_PORT: u16 = 40000;

#[derive(Debug, Clone)]
struct MemoryContainer {
    spec: ContainerSpec,
    state: ProcessState,
    logs: String,
    ports: HashMap<u16, u16>,
}

#[derive(Default)]
struct Faults {
    create: HashSet<String>,
    transient_create: HashMap<String, u32>,
    remove: HashSet<String>,
}

/// A container runtime that lives in memory.
pub struct MemoryRuntime {
    containers: RwLock<BTreeMap<String, MemoryContainer>>,
    networks: RwLock<HashSet<String>>,
    journal: RwLock<Vec<String>>,
    faults: RwLock<Faults>,
    responder: RwLock<ExecResponder>,
    next_id: AtomicU64,
    next_port: AtomicU64,
}

impl Default for MemoryRuntime {
    fn default() -> Self {
        Self {
            containers: RwLock::new(BTreeMap::new()),
            networks: RwLock::new(HashSet::new()),
            journal: RwLock::new(Vec::new()),
            faults: RwLock::new(Faults::default()),
            responder: RwLock::new(Arc::new(|_: &str, _: &[String]| ExecOutput::default())),
            next_id: AtomicU64::new(1),
            next_port: AtomicU64::new(u64::from(FIRST_HOST_PORT)),
        }
    }
}

impl MemoryRuntime {
    /// Creates an empty runtime.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the exec responder.
    pub async fn set_exec_responder(&self, responder: ExecResponder) {
        *self.responder.write().await = responder;
    }

    /// Makes every creation of `name` fail permanently.
    pub async fn fail_create(&self, name: impl Into<String>) {
        self.faults.write().await.create.insert(name.into());
    }

    /// Makes the next `times` creations of `name` fail with a retryable error.
    pub async fn fail_create_transiently(&self, name: impl Into<String>, times: u32) {
        self.faults
            .write()
            .await
            .transient_create
            .insert(name.into(), times);
    }

    /// Makes removal of `name` fail.
    pub async fn fail_remove(&self, name: impl Into<String>) {
        self.faults.write().await.remove.insert(name.into());
    }

    /// Appends a line to the logs of the named container.
    pub async fn push_log(&self, name: &str, line: &str) -> Result<()> {
        let mut containers = self.containers.write().await;
        let container = containers
            .values_mut()
            .find(|c| c.spec.name == name)
            .ok_or_else(|| OrchestratorError::container_not_found(name))?;
        container.logs.push_str(line);
        container.logs.push('\n');
        Ok(())
    }

    /// Marks the named container as exited, as if its process died.
    pub async fn exit(&self, name: &str, exit_code: i64) -> Result<()> {
        let mut containers = self.containers.write().await;
        let container = containers
            .values_mut()
            .find(|c| c.spec.name == name)
            .ok_or_else(|| OrchestratorError::container_not_found(name))?;
        container.state = ProcessState::Exited {
            exit_code: Some(exit_code),
        };
        Ok(())
    }

    /// Returns the names of containers that still exist.
    pub async fn container_names(&self) -> Vec<String> {
        self.containers
            .read()
            .await
            .values()
            .map(|c| c.spec.name.clone())
            .collect()
    }

    /// Returns the spec a named container was created from.
    pub async fn spec_of(&self, name: &str) -> Option<ContainerSpec> {
        self.containers
            .read()
            .await
            .values()
            .find(|c| c.spec.name == name)
            .map(|c| c.spec.clone())
    }

    /// Returns the existing networks.
    pub async fn networks(&self) -> Vec<String> {
        let mut names: Vec<String> = self.networks.read().await.iter().cloned().collect();
        names.sort();
        names
    }

    /// Returns every call made so far, as `"<op> <name>"` entries.
    pub async fn journal(&self) -> Vec<String> {
        self.journal.read().await.clone()
    }

    async fn record(&self, op: &str, name: &str) {
        self.journal.write().await.push(format!("{op} {name}"));
    }

    async fn name_of(&self, container_id: &str) -> Result<String> {
        self.containers
            .read()
            .await
            .get(container_id)
            .map(|c| c.spec.name.clone())
            .ok_or_else(|| OrchestratorError::container_not_found(container_id))
    }

    async fn set_state(&self, container_id: &str, state: ProcessState) -> Result<()> {
        let mut containers = self.containers.write().await;
        let container = containers
            .get_mut(container_id)
            .ok_or_else(|| OrchestratorError::container_not_found(container_id))?;
        container.state = state;
        Ok(())
    }
}

#[async_trait]
impl ContainerRuntime for MemoryRuntime {
    async fn create_network(&self, name: &str) -> Result<String> {
        self.record("create_network", name).await;
        if !self.networks.write().await.insert(name.to_string()) {
            return Err(OrchestratorError::network_creation_failed(
                name,
                "network already exists",
            ));
        }
        Ok(name.to_string())
    }

    async fn remove_network(&self, name: &str) -> Result<()> {
        self.record("remove_network", name).await;
        if self.networks.write().await.remove(name) {
            Ok(())
        } else {
            Err(OrchestratorError::network_not_found(name))
        }
    }

    async fn purge_network(&self, name: &str) -> Result<()> {
        self.record("purge_network", name).await;
        self.containers
            .write()
            .await
            .retain(|_, c| c.spec.network.as_deref() != Some(name));
        self.networks.write().await.remove(name);
        Ok(())
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<ContainerHandle> {
        self.record("create", &spec.name).await;
        {
            let mut faults = self.faults.write().await;
            if faults.create.contains(&spec.name) {
                return Err(OrchestratorError::container_creation_failed(
                    &spec.name,
                    "injected failure",
                ));
            }
            if let Some(remaining) = faults.transient_create.get_mut(&spec.name) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(OrchestratorError::timeout(format!(
                        "creation of {}",
                        spec.name
                    )));
                }
            }
        }

        if let Some(network) = &spec.network {
            if !self.networks.read().await.contains(network) {
                return Err(OrchestratorError::network_not_found(network));
            }
        }

        let mut containers = self.containers.write().await;
        if containers.values().any(|c| c.spec.name == spec.name) {
            return Err(OrchestratorError::container_creation_failed(
                &spec.name,
                "name already in use",
            ));
        }

        let id = format!("{:064x}", self.next_id.fetch_add(1, Ordering::SeqCst));
        containers.insert(
            id.clone(),
            MemoryContainer {
                spec: spec.clone(),
                state: ProcessState::Created,
                logs: String::new(),
                ports: HashMap::new(),
            },
        );
        Ok(ContainerHandle::new(id, &spec.name))
    }

    async fn start(&self, container_id: &str) -> Result<()> {
        let name = self.name_of(container_id).await?;
        self.record("start", &name).await;

        let mut containers = self.containers.write().await;
        let container = containers
            .get_mut(container_id)
            .ok_or_else(|| OrchestratorError::container_not_found(container_id))?;
        for port in &container.spec.published_ports {
            if !container.ports.contains_key(port) {
                let host = self.next_port.fetch_add(1, Ordering::SeqCst);
                container.ports.insert(*port, host as u16);
            }
        }
        container.state = ProcessState::Running;
        Ok(())
    }

    async fn stop(&self, container_id: &str) -> Result<()> {
        let name = self.name_of(container_id).await?;
        self.record("stop", &name).await;
        self.set_state(container_id, ProcessState::Exited { exit_code: Some(0) })
            .await
    }

    async fn kill(&self, container_id: &str) -> Result<()> {
        let name = self.name_of(container_id).await?;
        self.record("kill", &name).await;
        self.set_state(
            container_id,
            ProcessState::Exited {
                exit_code: Some(137),
            },
        )
        .await
    }

    async fn remove(&self, container_id: &str, force: bool) -> Result<()> {
        let name = self.name_of(container_id).await?;
        self.record("remove", &name).await;

        if self.faults.read().await.remove.contains(&name) {
            return Err(OrchestratorError::DockerApi(
                bollard::errors::Error::DockerResponseServerError {
                    status_code: 500,
                    message: "injected removal failure".to_string(),
                },
            ));
        }

        let mut containers = self.containers.write().await;
        if !force
            && containers
                .get(container_id)
                .is_some_and(|c| c.state == ProcessState::Running)
        {
            return Err(OrchestratorError::configuration(format!(
                "cannot remove running container {name} without force"
            )));
        }
        containers.remove(container_id);
        Ok(())
    }

    async fn exec(&self, container_id: &str, cmd: &[String]) -> Result<ExecOutput> {
        let (name, state) = {
            let containers = self.containers.read().await;
            let container = containers
                .get(container_id)
                .ok_or_else(|| OrchestratorError::container_not_found(container_id))?;
            (container.spec.name.clone(), container.state)
        };
        self.record("exec", &name).await;

        if state != ProcessState::Running {
            return Err(OrchestratorError::exec_failed(
                container_id,
                format!("container {name} is {state}"),
            ));
        }

        let responder = self.responder.read().await.clone();
        Ok(responder(&name, cmd))
    }

    async fn logs(&self, container_id: &str) -> Result<String> {
        self.containers
            .read()
            .await
            .get(container_id)
            .map(|c| c.logs.clone())
            .ok_or_else(|| OrchestratorError::container_not_found(container_id))
    }

    async fn state(&self, container_id: &str) -> Result<ProcessState> {
        self.containers
            .read()
            .await
            .get(container_id)
            .map(|c| c.state)
            .ok_or_else(|| OrchestratorError::container_not_found(container_id))
    }

    async fn host_port(&self, container_id: &str, container_port: u16) -> Result<Option<u16>> {
        self.containers
            .read()
            .await
            .get(container_id)
            .map(|c| c.ports.get(&container_port).copied())
            .ok_or_else(|| OrchestratorError::container_not_found(container_id))
    }

    fn name(&self) -> &str {
        "memory"
    }
}
