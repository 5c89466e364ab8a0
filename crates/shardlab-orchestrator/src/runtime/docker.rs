//! Docker runtime implementation.
//!
//! Talks to the local Docker daemon through bollard.

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, ListContainersOptions, LogOutput,
    LogsOptions, RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::network::CreateNetworkOptions;
use bollard::secret::ContainerStateStatusEnum;
use bollard::Docker;
use futures::StreamExt;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};

use crate::container::{ContainerHandle, ContainerSpec, ProcessState};
use crate::error::{OrchestratorError, Result};
use crate::runtime::r#trait::{ContainerRuntime, ExecOutput};

/// Label attached to every container and network this runtime creates.
pub const MANAGED_LABEL: &str = "shardlab.managed";

/// Configuration for the Docker runtime.
#[derive(Debug, Clone)]
pub struct DockerRuntimeConfig {
    /// Grace period before a stop turns into a kill, in seconds.
    pub stop_timeout_secs: i64,

    /// Additional Docker labels to apply to all containers.
    pub labels: HashMap<String, String>,
}

impl Default for DockerRuntimeConfig {
    fn default() -> Self {
        Self {
            stop_timeout_secs: 10,
            labels: HashMap::new(),
        }
    }
}

impl DockerRuntimeConfig {
    /// Adds a label.
    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

/// Container runtime backed by the local Docker daemon.
pub struct DockerRuntime {
    docker: Docker,
    config: DockerRuntimeConfig,
}

impl DockerRuntime {
    /// Connects with the default configuration.
    pub async fn new() -> Result<Self> {
        Self::with_config(DockerRuntimeConfig::default()).await
    }

    /// Connects with the given configuration.
    pub async fn with_config(config: DockerRuntimeConfig) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()?;

        // Verify connection
        docker.ping().await?;

        info!("Connected to Docker daemon");
        Ok(Self { docker, config })
    }

    fn labels(&self, spec_labels: &BTreeMap<String, String>) -> HashMap<String, String> {
        let mut labels = self.config.labels.clone();
        labels.extend(spec_labels.iter().map(|(k, v)| (k.clone(), v.clone())));
        labels.insert(MANAGED_LABEL.to_string(), "true".to_string());
        labels
    }

    async fn network_containers(&self, network: &str) -> Result<Vec<String>> {
        let filters: HashMap<String, Vec<String>> =
            [("network".to_string(), vec![network.to_string()])]
                .into_iter()
                .collect();

        let options = ListContainersOptions {
            all: true,
            filters,
            ..Default::default()
        };

        let containers = self.docker.list_containers(Some(options)).await?;
        Ok(containers.into_iter().filter_map(|c| c.id).collect())
    }
}

/// Maps a daemon 404 to a typed not-found error.
fn not_found_as(e: bollard::errors::Error, not_found: OrchestratorError) -> OrchestratorError {
    match e {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        } => not_found,
        other => OrchestratorError::DockerApi(other),
    }
}

fn map_state(status: Option<ContainerStateStatusEnum>, exit_code: Option<i64>) -> ProcessState {
    match status {
        Some(ContainerStateStatusEnum::CREATED) => ProcessState::Created,
        Some(ContainerStateStatusEnum::RUNNING)
        | Some(ContainerStateStatusEnum::PAUSED)
        | Some(ContainerStateStatusEnum::RESTARTING) => ProcessState::Running,
        Some(ContainerStateStatusEnum::EXITED) | Some(ContainerStateStatusEnum::DEAD) => {
            ProcessState::Exited { exit_code }
        }
        Some(ContainerStateStatusEnum::REMOVING) => ProcessState::Removed,
        Some(ContainerStateStatusEnum::EMPTY) | None => ProcessState::Created,
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn create_network(&self, name: &str) -> Result<String> {
        let labels: HashMap<&str, &str> = [(MANAGED_LABEL, "true")].into_iter().collect();

        let options = CreateNetworkOptions {
            name,
            labels,
            ..Default::default()
        };

        let response = self.docker.create_network(options).await?;

        if response.id.is_empty() {
            return Err(OrchestratorError::network_creation_failed(
                name,
                "no ID returned",
            ));
        }

        info!(network = %name, id = %response.id, "Created network");
        Ok(response.id)
    }

    async fn remove_network(&self, name: &str) -> Result<()> {
        self.docker
            .remove_network(name)
            .await
            .map_err(|e| not_found_as(e, OrchestratorError::network_not_found(name)))?;
        info!(network = %name, "Removed network");
        Ok(())
    }

    async fn purge_network(&self, name: &str) -> Result<()> {
        for id in self.network_containers(name).await? {
            match self.remove(&id, true).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }

        match self.remove_network(name).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => {
                debug!(network = %name, "Network already gone");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<ContainerHandle> {
        let exposed_ports: HashMap<String, HashMap<(), ()>> = spec
            .published_ports
            .iter()
            .map(|p| (format!("{p}/tcp"), HashMap::new()))
            .collect();

        let port_bindings: HashMap<String, Option<Vec<bollard::service::PortBinding>>> = spec
            .published_ports
            .iter()
            .map(|p| {
                let binding = bollard::service::PortBinding {
                    host_ip: None,
                    host_port: None,
                };
                (format!("{p}/tcp"), Some(vec![binding]))
            })
            .collect();

        let host_config = bollard::service::HostConfig {
            port_bindings: Some(port_bindings),
            network_mode: spec.network.clone(),
            memory: spec.memory_bytes.map(|b| b as i64),
            ..Default::default()
        };

        let config = Config {
            image: Some(spec.image.clone()),
            hostname: spec.hostname.clone(),
            env: Some(spec.env_list()),
            labels: Some(self.labels(&spec.labels)),
            exposed_ports: Some(exposed_ports),
            host_config: Some(host_config),
            cmd: spec.command.clone(),
            entrypoint: spec.entrypoint.clone(),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.as_str(),
            platform: None,
        };

        debug!(container = %spec.name, image = %spec.image, "Creating container");
        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| match e {
                bollard::errors::Error::DockerResponseServerError {
                    status_code: 404,
                    message,
                } => OrchestratorError::container_creation_failed(&spec.name, message),
                other => OrchestratorError::DockerApi(other),
            })?;

        for warning in &response.warnings {
            warn!(container = %spec.name, warning = %warning, "Docker warning");
        }

        info!(container = %spec.name, id = %response.id, "Created container");
        Ok(ContainerHandle::new(response.id, &spec.name))
    }

    async fn start(&self, container_id: &str) -> Result<()> {
        self.docker
            .start_container(container_id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| not_found_as(e, OrchestratorError::container_not_found(container_id)))?;
        debug!(container = %container_id, "Started container");
        Ok(())
    }

    async fn stop(&self, container_id: &str) -> Result<()> {
        let options = StopContainerOptions {
            t: self.config.stop_timeout_secs,
        };
        self.docker
            .stop_container(container_id, Some(options))
            .await
            .map_err(|e| not_found_as(e, OrchestratorError::container_not_found(container_id)))?;
        debug!(container = %container_id, "Stopped container");
        Ok(())
    }

    async fn kill(&self, container_id: &str) -> Result<()> {
        let options = KillContainerOptions { signal: "SIGKILL" };
        self.docker
            .kill_container(container_id, Some(options))
            .await
            .map_err(|e| not_found_as(e, OrchestratorError::container_not_found(container_id)))?;
        debug!(container = %container_id, "Killed container");
        Ok(())
    }

    async fn remove(&self, container_id: &str, force: bool) -> Result<()> {
        let options = RemoveContainerOptions {
            force,
            v: true,
            ..Default::default()
        };

        self.docker
            .remove_container(container_id, Some(options))
            .await
            .map_err(|e| not_found_as(e, OrchestratorError::container_not_found(container_id)))?;

        info!(container = %container_id, "Removed container");
        Ok(())
    }

    async fn exec(&self, container_id: &str, cmd: &[String]) -> Result<ExecOutput> {
        debug!(container = %container_id, cmd = ?cmd, "Executing command");

        let exec_options = CreateExecOptions {
            cmd: Some(cmd.to_vec()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(container_id, exec_options)
            .await
            .map_err(|e| not_found_as(e, OrchestratorError::container_not_found(container_id)))?;

        let start_result = self.docker.start_exec(&exec.id, None).await?;

        let mut stdout = String::new();
        let mut stderr = String::new();

        if let StartExecResults::Attached { mut output, .. } = start_result {
            while let Some(result) = output.next().await {
                match result {
                    Ok(LogOutput::StdOut { message }) => {
                        stdout.push_str(&String::from_utf8_lossy(&message));
                    }
                    Ok(LogOutput::StdErr { message }) => {
                        stderr.push_str(&String::from_utf8_lossy(&message));
                    }
                    Ok(_) => {}
                    Err(e) => {
                        return Err(OrchestratorError::exec_failed(container_id, e.to_string()));
                    }
                }
            }
        }

        // Get exit code
        let exec_inspect = self.docker.inspect_exec(&exec.id).await?;
        let exit_code = exec_inspect.exit_code.unwrap_or(-1);

        Ok(ExecOutput {
            stdout,
            stderr,
            exit_code,
        })
    }

    async fn logs(&self, container_id: &str) -> Result<String> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            tail: "all".to_string(),
            ..Default::default()
        };

        let mut stream = self.docker.logs(container_id, Some(options));
        let mut output = String::new();

        while let Some(result) = stream.next().await {
            match result {
                Ok(log) => output.push_str(&log.to_string()),
                Err(e) => {
                    return Err(not_found_as(
                        e,
                        OrchestratorError::container_not_found(container_id),
                    ))
                }
            }
        }

        Ok(output)
    }

    async fn state(&self, container_id: &str) -> Result<ProcessState> {
        let inspect = self
            .docker
            .inspect_container(container_id, None)
            .await
            .map_err(|e| not_found_as(e, OrchestratorError::container_not_found(container_id)))?;

        let (status, exit_code) = inspect
            .state
            .map(|s| (s.status, s.exit_code))
            .unwrap_or((None, None));
        Ok(map_state(status, exit_code))
    }

    async fn host_port(&self, container_id: &str, container_port: u16) -> Result<Option<u16>> {
        let inspect = self
            .docker
            .inspect_container(container_id, None)
            .await
            .map_err(|e| not_found_as(e, OrchestratorError::container_not_found(container_id)))?;

        let key = format!("{container_port}/tcp");
        let port = inspect
            .network_settings
            .and_then(|n| n.ports)
            .and_then(|mut ports| ports.remove(&key))
            .flatten()
            .and_then(|bindings| bindings.into_iter().find_map(|b| b.host_port))
            .and_then(|p| p.parse().ok());

        Ok(port)
    }

    fn name(&self) -> &str {
        "docker"
    }

    async fn is_ready(&self) -> bool {
        self.docker.ping().await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_state() {
        assert_eq!(
            map_state(Some(ContainerStateStatusEnum::CREATED), None),
            ProcessState::Created
        );
        assert_eq!(
            map_state(Some(ContainerStateStatusEnum::RUNNING), Some(0)),
            ProcessState::Running
        );
        assert_eq!(
            map_state(Some(ContainerStateStatusEnum::EXITED), Some(139)),
            ProcessState::Exited {
                exit_code: Some(139)
            }
        );
        assert!(map_state(Some(ContainerStateStatusEnum::DEAD), None).is_exited());
    }

    #[test]
    fn test_not_found_mapping() {
        let err = not_found_as(
            bollard::errors::Error::DockerResponseServerError {
                status_code: 404,
                message: "No such container".to_string(),
            },
            OrchestratorError::container_not_found("abc"),
        );
        assert!(matches!(err, OrchestratorError::ContainerNotFound(_)));

        let err = not_found_as(
            bollard::errors::Error::DockerResponseServerError {
                status_code: 500,
                message: "oops".to_string(),
            },
            OrchestratorError::container_not_found("abc"),
        );
        assert!(matches!(err, OrchestratorError::DockerApi(_)));
    }

    #[test]
    fn test_config_labels() {
        let config = DockerRuntimeConfig::default().label("shardlab.run", "001");
        assert_eq!(config.stop_timeout_secs, 10);
        assert_eq!(config.labels.get("shardlab.run").map(String::as_str), Some("001"));
    }
}
