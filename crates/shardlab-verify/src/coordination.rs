//! The coordination store container of a run.

use shardlab_orchestrator::{Cluster, ClusterOrchestrator, ContainerSpec, OrchestratorSettings};
use shardlab_store::{ConsulKv, DEFAULT_CONSUL_PORT};
use std::time::Duration;
use tracing::info;

use crate::error::Result;

/// Default coordination store image.
pub const DEFAULT_CONSUL_IMAGE: &str = "consul:1.5.3";

/// Service name of the coordination store; also its hostname.
pub const CONSUL_SERVICE: &str = "consul";

/// Readiness probes made after the port opens.
pub const READY_ATTEMPTS: u32 = 20;

/// Interval between readiness probes.
pub const READY_INTERVAL: Duration = Duration::from_millis(100);

/// A single-node coordination store run in dev mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinationService {
    /// Image to run.
    pub image: String,
    /// HTTP port inside the container.
    pub port: u16,
}

impl Default for CoordinationService {
    fn default() -> Self {
        Self {
            image: DEFAULT_CONSUL_IMAGE.to_string(),
            port: DEFAULT_CONSUL_PORT,
        }
    }
}

impl CoordinationService {
    /// Creates a service from an image and port.
    pub fn new(image: impl Into<String>, port: u16) -> Self {
        Self {
            image: image.into(),
            port,
        }
    }

    /// Returns the URL replicas use to reach the service.
    pub fn internal_url(&self, settings: &OrchestratorSettings) -> String {
        format!(
            "http://{}:{}",
            settings.container_name(CONSUL_SERVICE),
            self.port
        )
    }

    /// Builds the container spec.
    pub fn spec(&self, settings: &OrchestratorSettings) -> ContainerSpec {
        ContainerSpec::builder(settings.container_name(CONSUL_SERVICE), &self.image)
            .hostname(CONSUL_SERVICE)
            .command(["consul", "agent", "-dev", "-client", "0.0.0.0"])
            .network(&settings.network)
            .label(shardlab_orchestrator::orchestrator::RUN_LABEL, &settings.run_id)
            .publish(self.port)
            .build()
    }

    /// Starts the service in `cluster` and returns a client for it once it
    /// answers KV reads.
    pub async fn start(
        &self,
        orchestrator: &ClusterOrchestrator,
        cluster: &mut Cluster,
    ) -> Result<ConsulKv> {
        let settings = orchestrator.settings();
        let host_port = orchestrator
            .start_service(cluster, CONSUL_SERVICE, self.spec(settings), self.port)
            .await?;

        let client = ConsulKv::new(format!("http://{}:{host_port}", settings.port_host))?
            .with_retry(settings.retry);
        client.wait_ready(READY_ATTEMPTS, READY_INTERVAL).await?;

        info!(host_port, "Coordination store started");
        Ok(client)
    }

    /// Kills the service, cutting replicas off from it.
    pub async fn make_unreachable(cluster: &mut Cluster) -> Result<()> {
        cluster.kill_service(CONSUL_SERVICE).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shardlab_orchestrator::{ContainerRuntime, MemoryRuntime};
    use std::sync::Arc;

    #[test]
    fn test_spec() {
        let settings = OrchestratorSettings::new("007", "shardlab_net_5");
        let service = CoordinationService::default();
        let spec = service.spec(&settings);

        assert_eq!(spec.name, "007_consul");
        assert_eq!(spec.hostname.as_deref(), Some("consul"));
        assert_eq!(spec.image, "consul:1.5.3");
        assert_eq!(
            spec.command,
            Some(vec![
                "consul".to_string(),
                "agent".to_string(),
                "-dev".to_string(),
                "-client".to_string(),
                "0.0.0.0".to_string()
            ])
        );
        assert_eq!(spec.published_ports, vec![8500]);
        assert_eq!(service.internal_url(&settings), settings.coordination_url);
    }

    #[tokio::test]
    async fn test_make_unreachable() {
        let runtime = Arc::new(MemoryRuntime::new());
        let orchestrator = ClusterOrchestrator::new(
            runtime.clone(),
            OrchestratorSettings::new("001", "net")
                .with_port_wait("127.0.0.1", Duration::from_millis(50)),
        );
        orchestrator.prepare_network().await.unwrap();
        let mut cluster = orchestrator.empty_cluster("cluster_001");

        assert!(CoordinationService::make_unreachable(&mut cluster).await.is_err());

        // nothing listens on the in-memory host port, but the service is tracked
        let spec = CoordinationService::default().spec(orchestrator.settings());
        assert!(orchestrator
            .start_service(&mut cluster, CONSUL_SERVICE, spec, DEFAULT_CONSUL_PORT)
            .await
            .is_err());

        CoordinationService::make_unreachable(&mut cluster).await.unwrap();
        let id = cluster.service(CONSUL_SERVICE).unwrap().container_id.clone();
        assert!(runtime.state(&id).await.unwrap().is_exited());
    }
}
