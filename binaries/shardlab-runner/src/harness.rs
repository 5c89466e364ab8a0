//! Scenario execution.
//!
//! Each scenario gets its own run id, network, coordination store and
//! cluster. The cluster is torn down and the network released whatever the
//! steps returned; replica logs captured at teardown are audited afterwards.

use shardlab_orchestrator::{Cluster, ClusterOrchestrator, ContainerRuntime};
use shardlab_store::KvStore;
use shardlab_verify::{
    check_role, check_router_api, check_router_api_everywhere, crash_replica, random_network_name,
    wait_for_role_with, ConvergencePoller, CoordinationService, LogAudit, Result, RunCounter,
    ScenarioContext, ScenarioReport, VerifyError,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::HarnessConfig;
use crate::steps::{ScenarioFile, Step};

/// Runs steps against one cluster.
pub struct StepExecutor<'a> {
    orchestrator: &'a ClusterOrchestrator,
    context: &'a mut ScenarioContext,
    store: &'a dyn KvStore,
    poll_interval: Duration,
}

impl<'a> StepExecutor<'a> {
    /// Creates an executor publishing to `store`.
    pub fn new(
        orchestrator: &'a ClusterOrchestrator,
        context: &'a mut ScenarioContext,
        store: &'a dyn KvStore,
        poll_interval: Duration,
    ) -> Self {
        Self {
            orchestrator,
            context,
            store,
            poll_interval,
        }
    }

    /// Runs `steps` in order, stopping at the first failure.
    pub async fn run_all(&mut self, cluster: &mut Cluster, steps: &[Step]) -> Result<()> {
        for (index, step) in steps.iter().enumerate() {
            info!(index, step = %step, "Running step");
            if let Err(e) = self.execute(cluster, step).await {
                error!(index, step = %step, error = %e, "Step failed");
                return Err(e);
            }
        }
        Ok(())
    }

    /// Runs one step.
    pub async fn execute(&mut self, cluster: &mut Cluster, step: &Step) -> Result<()> {
        match step {
            Step::PublishConfig { topology } => {
                self.context.publish_config(self.store, topology).await?;
            }
            Step::Deploy { deployment } => {
                if !cluster.is_empty() {
                    return Err(VerifyError::scenario("cluster is already deployed"));
                }
                let plan = self.context.deployment_plan(deployment)?;
                self.orchestrator
                    .provision(cluster, self.context.config()?, &plan)
                    .await?;
            }
            Step::StartAll => cluster.start_all().await?,
            Step::StartReplicaSet { replica_set } => cluster.start_replica_set(replica_set).await?,
            Step::Start { replica } => cluster.start(replica).await?,
            Step::Stop { replica } => cluster.stop(replica).await?,
            Step::Crash { replica } => {
                crash_replica(cluster, replica).await?;
                self.context.exempt(replica.as_str());
            }
            Step::CoordinationUnreachable => {
                CoordinationService::make_unreachable(cluster).await?;
                self.context.exempt_all(cluster.replica_names());
            }
            Step::Sleep { secs } => {
                let duration =
                    Step::sleep_duration(*secs).map_err(|e| VerifyError::scenario(e.to_string()))?;
                tokio::time::sleep(duration).await;
            }
            Step::WaitForRole {
                replica,
                role,
                within_secs,
            } => {
                let poller =
                    ConvergencePoller::new(Duration::from_secs(*within_secs), self.poll_interval);
                wait_for_role_with(&poller, cluster, replica, *role).await?;
            }
            Step::CheckRole { replica, role } => check_role(cluster, replica, *role).await?,
            Step::CheckPublishedRole { replica, role } => {
                self.context
                    .check_published_role(self.store, replica, *role)
                    .await?
            }
            Step::CheckRouterApi { replica: Some(r) } => check_router_api(cluster, r).await?,
            Step::CheckRouterApi { replica: None } => check_router_api_everywhere(cluster).await?,
        }
        Ok(())
    }
}

/// Runs scenarios against a container runtime.
pub struct Harness {
    config: HarnessConfig,
    runtime: Arc<dyn ContainerRuntime>,
    counter: RunCounter,
}

impl Harness {
    /// Creates a harness.
    pub fn new(config: HarnessConfig, runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            config,
            runtime,
            counter: RunCounter::new(),
        }
    }

    /// Runs one scenario in isolation and reports its outcome.
    pub async fn run(&self, scenario: &ScenarioFile) -> ScenarioReport {
        let run_id = self.counter.next_run_id();
        let mut context = ScenarioContext::new(
            &run_id,
            random_network_name(&self.config.docker.network_prefix),
            self.config.coordination.namespace(),
            self.config.log_audit.classifier(),
        );

        let coordination = self.config.coordination.service();
        let base = context.orchestrator_settings();
        let coordination_url = coordination.internal_url(&base);
        let orchestrator = ClusterOrchestrator::new(
            self.runtime.clone(),
            self.config
                .apply(base)
                .with_coordination_url(coordination_url),
        );

        info!(
            scenario = %scenario.name,
            run_id = %run_id,
            network = %context.network(),
            steps = scenario.steps.len(),
            description = scenario.description.as_deref().unwrap_or_default(),
            "Running scenario"
        );

        if let Err(e) = orchestrator.prepare_network().await {
            error!(scenario = %scenario.name, error = %e, "Failed to prepare network");
            return ScenarioReport {
                name: scenario.name.clone(),
                run_id,
                result: Err(e.into()),
                audit: LogAudit::default(),
                teardown_errors: Vec::new(),
            };
        }

        let cluster = orchestrator.empty_cluster(context.cluster_name());
        let poll_interval = self.config.timing.poll_interval();
        let steps = scenario.steps.as_slice();
        let (orch, coord, ctx) = (&orchestrator, &coordination, &mut context);

        let outcome = orchestrator
            .scoped(cluster, |mut cluster| async move {
                let result = run_steps(orch, coord, ctx, &mut cluster, steps, poll_interval).await;
                (cluster, result)
            })
            .await;

        let audit = context.audit_logs(&outcome.teardown.logs);
        let mut teardown_errors = outcome.teardown.errors;
        if let Err(e) = orchestrator.release_network().await {
            error!(network = %context.network(), error = %e, "Failed to release network");
            teardown_errors.push(e.to_string());
        }

        let report = ScenarioReport {
            name: scenario.name.clone(),
            run_id,
            result: outcome.result,
            audit,
            teardown_errors,
        };
        log_report(&report);
        report
    }
}

async fn run_steps(
    orchestrator: &ClusterOrchestrator,
    coordination: &CoordinationService,
    context: &mut ScenarioContext,
    cluster: &mut Cluster,
    steps: &[Step],
    poll_interval: Duration,
) -> Result<()> {
    let store = coordination.start(orchestrator, cluster).await?;
    StepExecutor::new(orchestrator, context, &store, poll_interval)
        .run_all(cluster, steps)
        .await
}

fn log_report(report: &ScenarioReport) {
    match &report.result {
        Ok(()) => info!(scenario = %report.name, run_id = %report.run_id, "Steps passed"),
        Err(e) => error!(scenario = %report.name, run_id = %report.run_id, error = %e, "Steps failed"),
    }
    for (replica, lines) in &report.audit.findings {
        for line in lines {
            error!(scenario = %report.name, replica = %replica, line = %line, "Unexpected log error");
        }
    }
    if !report.teardown_errors.is_empty() {
        warn!(
            scenario = %report.name,
            count = report.teardown_errors.len(),
            "Teardown left resources behind"
        );
    }
}
