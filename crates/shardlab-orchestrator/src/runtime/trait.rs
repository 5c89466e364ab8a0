//! Container runtime trait definition.
//!
//! This module defines the boundary between cluster orchestration and the
//! container daemon, along with the exec output type.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::container::{ContainerHandle, ContainerSpec, ProcessState};
use crate::error::Result;

/// Low-level container operations used by the orchestrator.
///
/// Containers are addressed by the ID the runtime returned from
/// [`create`](ContainerRuntime::create). Implementations must be thread-safe
/// (`Send + Sync`); the orchestrator shares one runtime across a scenario.
///
/// # Lifecycle
///
/// 1. `create_network()` for the run
/// 2. `create()` and `start()` each process
/// 3. `exec()`, `logs()` and `state()` while the scenario runs
/// 4. `remove()` every container, then `remove_network()`
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Creates a network and returns its ID.
    async fn create_network(&self, name: &str) -> Result<String>;

    /// Removes a network.
    async fn remove_network(&self, name: &str) -> Result<()>;

    /// Force-removes every container attached to `name`, then the network
    /// itself. Missing objects are not an error.
    async fn purge_network(&self, name: &str) -> Result<()>;

    /// Creates a container without starting it.
    ///
    /// Ports listed in the spec are published on random host ports; the
    /// returned handle carries the mapping once the runtime has assigned it.
    async fn create(&self, spec: &ContainerSpec) -> Result<ContainerHandle>;

    /// Starts a container.
    async fn start(&self, container_id: &str) -> Result<()>;

    /// Stops a container gracefully.
    async fn stop(&self, container_id: &str) -> Result<()>;

    /// Kills a container with SIGKILL.
    async fn kill(&self, container_id: &str) -> Result<()>;

    /// Removes a container.
    async fn remove(&self, container_id: &str, force: bool) -> Result<()>;

    /// Executes a command in a running container.
    async fn exec(&self, container_id: &str, cmd: &[String]) -> Result<ExecOutput>;

    /// Returns the full log output of a container.
    async fn logs(&self, container_id: &str) -> Result<String>;

    /// Returns the state the runtime reports for a container.
    async fn state(&self, container_id: &str) -> Result<ProcessState>;

    /// Returns the host port a container port is published on.
    async fn host_port(&self, container_id: &str, container_port: u16) -> Result<Option<u16>>;

    /// Returns the name of this runtime.
    fn name(&self) -> &str;

    /// Checks if the runtime is connected and ready.
    async fn is_ready(&self) -> bool {
        true
    }
}

/// Output from executing a command in a container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOutput {
    /// Standard output from the command.
    pub stdout: String,

    /// Standard error from the command.
    pub stderr: String,

    /// Exit code of the command.
    pub exit_code: i64,
}

impl ExecOutput {
    /// Creates a new exec output.
    pub fn new(stdout: impl Into<String>, stderr: impl Into<String>, exit_code: i64) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
            exit_code,
        }
    }

    /// Returns true if the command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Returns the combined stdout and stderr.
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }

    /// Returns true if `marker` appears in stdout or stderr.
    pub fn contains(&self, marker: &str) -> bool {
        self.stdout.contains(marker) || self.stderr.contains(marker)
    }
}
