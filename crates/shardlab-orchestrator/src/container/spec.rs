//! Container specification types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Default memory limit of a test container (256 MiB).
pub const DEFAULT_MEMORY_BYTES: u64 = 256 * 1024 * 1024;

/// Everything the runtime needs to create one container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    /// Container name, unique on the host.
    pub name: String,

    /// Image reference.
    pub image: String,

    /// Hostname inside the container network.
    pub hostname: Option<String>,

    /// Command, replacing the image default when set.
    pub command: Option<Vec<String>>,

    /// Entrypoint override. An empty list clears the image entrypoint.
    pub entrypoint: Option<Vec<String>>,

    /// Environment variables.
    pub env: BTreeMap<String, String>,

    /// Labels.
    pub labels: BTreeMap<String, String>,

    /// Network to attach to.
    pub network: Option<String>,

    /// Container ports published on a random host port.
    pub published_ports: Vec<u16>,

    /// Memory limit in bytes.
    pub memory_bytes: Option<u64>,
}

impl ContainerSpec {
    /// Creates a new spec builder.
    pub fn builder(name: impl Into<String>, image: impl Into<String>) -> ContainerSpecBuilder {
        ContainerSpecBuilder {
            spec: ContainerSpec {
                name: name.into(),
                image: image.into(),
                hostname: None,
                command: None,
                entrypoint: None,
                env: BTreeMap::new(),
                labels: BTreeMap::new(),
                network: None,
                published_ports: Vec::new(),
                memory_bytes: Some(DEFAULT_MEMORY_BYTES),
            },
        }
    }

    /// Returns the environment as `KEY=value` strings.
    pub fn env_list(&self) -> Vec<String> {
        self.env.iter().map(|(k, v)| format!("{k}={v}")).collect()
    }
}

/// Builder for [`ContainerSpec`].
#[derive(Debug)]
pub struct ContainerSpecBuilder {
    spec: ContainerSpec,
}

impl ContainerSpecBuilder {
    /// Sets the hostname.
    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.spec.hostname = Some(hostname.into());
        self
    }

    /// Sets the command.
    pub fn command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.spec.command = Some(command.into_iter().map(Into::into).collect());
        self
    }

    /// Sets the entrypoint.
    pub fn entrypoint<I, S>(mut self, entrypoint: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.spec.entrypoint = Some(entrypoint.into_iter().map(Into::into).collect());
        self
    }

    /// Adds an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.spec.env.insert(key.into(), value.into());
        self
    }

    /// Adds a label.
    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.spec.labels.insert(key.into(), value.into());
        self
    }

    /// Attaches the container to a network.
    pub fn network(mut self, network: impl Into<String>) -> Self {
        self.spec.network = Some(network.into());
        self
    }

    /// Publishes a container port on a random host port.
    pub fn publish(mut self, port: u16) -> Self {
        self.spec.published_ports.push(port);
        self
    }

    /// Sets the memory limit; `None` removes it.
    pub fn memory_bytes(mut self, bytes: Option<u64>) -> Self {
        self.spec.memory_bytes = bytes;
        self
    }

    /// Builds the spec.
    pub fn build(self) -> ContainerSpec {
        self.spec
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let spec = ContainerSpec::builder("001_consul", "consul:1.5.3")
            .hostname("consul")
            .command(["consul", "agent", "-dev"])
            .env("B", "2")
            .env("A", "1")
            .network("shardlab_net_1")
            .publish(8500)
            .build();

        assert_eq!(spec.name, "001_consul");
        assert_eq!(spec.hostname.as_deref(), Some("consul"));
        assert_eq!(spec.command.as_ref().unwrap().len(), 3);
        assert_eq!(spec.env_list(), vec!["A=1", "B=2"]);
        assert_eq!(spec.published_ports, vec![8500]);
        assert_eq!(spec.memory_bytes, Some(DEFAULT_MEMORY_BYTES));
        assert!(spec.entrypoint.is_none());
    }

    #[test]
    fn test_memory_override() {
        let spec = ContainerSpec::builder("x", "img").memory_bytes(None).build();
        assert!(spec.memory_bytes.is_none());
    }
}
