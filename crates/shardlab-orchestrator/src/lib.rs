//! Container orchestration for shardlab test clusters.
//!
//! This crate turns a cluster topology into live database replicas, one
//! container per replica, on a dedicated network:
//!
//! - **Runtime**: the [`ContainerRuntime`] boundary with a Docker backend
//!   ([`DockerRuntime`]) and an in-memory backend ([`MemoryRuntime`]).
//! - **Cluster**: [`Cluster`] tracks replica containers and their
//!   [`ProcessState`], and runs commands and console scripts inside them.
//! - **Orchestrator**: [`ClusterOrchestrator`] provisions a cluster from a
//!   topology and a deployment plan, and tears it down when a scenario ends.
//!
//! # Example
//!
//! ```no_run
//! use shardlab_orchestrator::{ClusterOrchestrator, DockerRuntime, OrchestratorSettings};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let runtime = Arc::new(DockerRuntime::new().await?);
//! let orchestrator = ClusterOrchestrator::new(
//!     runtime,
//!     OrchestratorSettings::new("001", "shardlab_net_1"),
//! );
//! orchestrator.prepare_network().await?;
//! let cluster = orchestrator.empty_cluster("cluster_001");
//! # let _ = cluster;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod cluster;
pub mod container;
pub mod error;
pub mod net;
pub mod orchestrator;
pub mod runtime;

pub use cluster::{console_command, Cluster};
pub use container::{
    ContainerHandle, ContainerSpec, ContainerSpecBuilder, ProcessState, DEFAULT_MEMORY_BYTES,
};
pub use error::{OrchestratorError, Result};
pub use net::{wait_tcp_port, DEFAULT_PORT_TIMEOUT};
pub use orchestrator::{
    ClusterOrchestrator, OrchestratorSettings, Scoped, TeardownReport, DEFAULT_REPLICA_IMAGE,
};
pub use runtime::{
    ContainerRuntime, DockerRuntime, DockerRuntimeConfig, ExecOutput, ExecResponder,
    MemoryRuntime,
};
