//! Container lifecycle tracking.
//!
//! Every process in a test cluster moves through
//! `Created → Started → (Running | Exited) → Removed`. `Removed` is reachable
//! from any state so teardown can always proceed, and `Exited → Started` is
//! allowed so a stopped or crashed replica can be brought back.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::error::{OrchestratorError, Result};

/// State of a managed process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessState {
    /// Container exists but was never started.
    Created,

    /// Start was issued; the runtime has not reported back yet.
    Started,

    /// The runtime reports the process as running.
    Running,

    /// The process has exited.
    Exited {
        /// Exit code, when the runtime reported one.
        exit_code: Option<i64>,
    },

    /// Container has been removed.
    Removed,
}

impl ProcessState {
    /// Returns true if moving from `self` to `next` is allowed.
    pub fn can_transition_to(&self, next: &ProcessState) -> bool {
        use ProcessState::*;

        match (self, next) {
            (Removed, _) => false,
            (_, Removed) => true,
            (Created, Started) => true,
            (Started, Running | Exited { .. }) => true,
            (Running, Exited { .. }) => true,
            (Exited { .. }, Started) => true,
            (a, b) => a.same_kind(b),
        }
    }

    /// Returns true if the process is started or running.
    pub fn is_up(&self) -> bool {
        matches!(self, Self::Started | Self::Running)
    }

    /// Returns true if the process has exited.
    pub fn is_exited(&self) -> bool {
        matches!(self, Self::Exited { .. })
    }

    /// Returns the lowercase state name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Started => "started",
            Self::Running => "running",
            Self::Exited { .. } => "exited",
            Self::Removed => "removed",
        }
    }

    fn same_kind(&self, other: &ProcessState) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Handle to a managed container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerHandle {
    /// Container ID assigned by the runtime.
    pub container_id: String,

    /// Container name.
    pub name: String,

    /// Current state of the process.
    pub state: ProcessState,

    /// Mapped ports (container port -> host port).
    pub port_mappings: HashMap<u16, u16>,
}

impl ContainerHandle {
    /// Creates a handle for a freshly created container.
    pub fn new(container_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            container_id: container_id.into(),
            name: name.into(),
            state: ProcessState::Created,
            port_mappings: HashMap::new(),
        }
    }

    /// Returns the short container ID (first 12 characters).
    pub fn short_id(&self) -> &str {
        if self.container_id.len() > 12 {
            &self.container_id[..12]
        } else {
            &self.container_id
        }
    }

    /// Returns the host port for a container port.
    pub fn host_port(&self, container_port: u16) -> Option<u16> {
        self.port_mappings.get(&container_port).copied()
    }

    /// Moves the handle to `next`, rejecting disallowed transitions.
    pub fn transition(&mut self, next: ProcessState) -> Result<()> {
        if !self.state.can_transition_to(&next) {
            return Err(OrchestratorError::invalid_state_transition(
                &self.name,
                self.state.name(),
                next.name(),
            ));
        }
        self.state = next;
        Ok(())
    }
}
