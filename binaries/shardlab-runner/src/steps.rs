//! Scenario files and their steps.
//!
//! A scenario file is YAML:
//!
//! ```yaml
//! name: leader failover
//! steps:
//!   - step: publish_config
//!     topology: |
//!       rs1:
//!         t1:
//!           master: true
//!         t2: {}
//!   - step: deploy
//!     deployment: |
//!       rs1:
//!         _default: {router: true, storage: true, automaster: true}
//!         t1: {}
//!         t2: {}
//!   - step: start_all
//!   - step: wait_for_role
//!     replica: t1
//!     role: leader
//!     within_secs: 10
//!   - step: crash
//!     replica: t1
//!   - step: wait_for_role
//!     replica: t2
//!     role: leader
//!     within_secs: 20
//! ```

use anyhow::Context;
use serde::{Deserialize, Serialize};
use shardlab_verify::Role;
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// One scenario step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum Step {
    /// Publish a cluster config built from defaulted topology text. Publishing
    /// again changes the config; replicas keep their identities.
    PublishConfig { topology: String },

    /// Create one container per replica of the published config.
    Deploy { deployment: String },

    /// Start every replica.
    StartAll,

    /// Start every replica of a replica-set.
    StartReplicaSet { replica_set: String },

    /// Start one replica.
    Start { replica: String },

    /// Stop one replica gracefully.
    Stop { replica: String },

    /// Crash the database process of a replica.
    Crash { replica: String },

    /// Kill the coordination store.
    CoordinationUnreachable,

    /// Wait a fixed time.
    Sleep { secs: f64 },

    /// Wait for a replica to take a role.
    WaitForRole {
        replica: String,
        role: Role,
        within_secs: u64,
    },

    /// Check the current role of a replica.
    CheckRole { replica: String, role: Role },

    /// Check the leader flag of a replica in the published config.
    CheckPublishedRole { replica: String, role: Role },

    /// Check the router API of one replica, or of all when none is named.
    CheckRouterApi {
        #[serde(default)]
        replica: Option<String>,
    },
}

impl Step {
    /// Returns the sleep duration of a [`Step::Sleep`].
    pub fn sleep_duration(secs: f64) -> anyhow::Result<Duration> {
        Duration::try_from_secs_f64(secs).with_context(|| format!("Invalid sleep of {secs}s"))
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::PublishConfig { .. } => write!(f, "publish config"),
            Step::Deploy { .. } => write!(f, "deploy cluster"),
            Step::StartAll => write!(f, "start all replicas"),
            Step::StartReplicaSet { replica_set } => write!(f, "start replica-set {replica_set}"),
            Step::Start { replica } => write!(f, "start {replica}"),
            Step::Stop { replica } => write!(f, "stop {replica}"),
            Step::Crash { replica } => write!(f, "crash {replica}"),
            Step::CoordinationUnreachable => write!(f, "make coordination store unreachable"),
            Step::Sleep { secs } => write!(f, "sleep {secs}s"),
            Step::WaitForRole {
                replica,
                role,
                within_secs,
            } => write!(f, "{replica} becomes {role} within {within_secs}s"),
            Step::CheckRole { replica, role } => write!(f, "{replica} is {role}"),
            Step::CheckPublishedRole { replica, role } => {
                write!(f, "{replica} is published as {role}")
            }
            Step::CheckRouterApi { replica: Some(r) } => write!(f, "router API works on {r}"),
            Step::CheckRouterApi { replica: None } => write!(f, "router API works everywhere"),
        }
    }
}

/// A named list of steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioFile {
    /// Scenario name.
    pub name: String,

    /// Free-form description.
    #[serde(default)]
    pub description: Option<String>,

    /// Steps, run in order.
    pub steps: Vec<Step>,
}

impl ScenarioFile {
    /// Parses a scenario from YAML text.
    pub fn from_yaml(text: &str) -> anyhow::Result<Self> {
        let scenario: Self = serde_yaml::from_str(text)?;
        scenario.validate()?;
        Ok(scenario)
    }

    /// Loads a scenario file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content).with_context(|| format!("Invalid scenario {:?}", path))
    }

    /// Checks what can be checked before anything is started.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.steps.is_empty() {
            anyhow::bail!("Scenario {} has no steps", self.name);
        }

        let first_publish = self
            .steps
            .iter()
            .position(|s| matches!(s, Step::PublishConfig { .. }));
        let first_deploy = self
            .steps
            .iter()
            .position(|s| matches!(s, Step::Deploy { .. }));
        if let Some(deploy) = first_deploy {
            if first_publish.map_or(true, |publish| publish > deploy) {
                anyhow::bail!("Scenario {} deploys before publishing a config", self.name);
            }
        }

        for step in &self.steps {
            if let Step::Sleep { secs } = step {
                Step::sleep_duration(*secs)?;
            }
        }
        Ok(())
    }
}
