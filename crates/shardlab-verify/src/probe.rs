//! Probes run against live replicas.
//!
//! Role and router checks go through the admin console of the replica, see
//! [`console_command`](shardlab_orchestrator::console_command).

use serde::{Deserialize, Serialize};
use shardlab_orchestrator::Cluster;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{Result, VerifyError};
use crate::poller::{ConvergencePoller, DEFAULT_POLL_INTERVAL};

/// Console script reporting whether the replica is read-only.
///
/// The markers are split so the echoed script never contains them.
pub const ROLE_SCRIPT: &str =
    "local i=box.info() return i.ro and 'I_AM_' .. 'RO' or 'I_AM_' .. 'RW'";

const LEADER_MARKER: &str = "I_AM_RW";
const FOLLOWER_MARKER: &str = "I_AM_RO";

/// Console script exercising the router on a few buckets.
pub const ROUTER_CHECK_SCRIPT: &str = r#"
do
    assert(router.test(1) == "test ok")
    assert(router.test(2) == "test ok")
    assert(router.test(3) == "test ok")
    return "CHECK" .. "OK"
end
"#;

const ROUTER_OK_MARKER: &str = "CHECKOK";

/// Console script that makes the replica process segfault.
pub const CRASH_SCRIPT: &str = "require('ffi').cast('char *', 0)[0] = 48";

/// Role of a replica as observed from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Writable replica.
    Leader,
    /// Read-only replica.
    Follower,
    /// The replica answered but its role could not be read.
    Unknown,
    /// The replica process has exited.
    Down,
}

impl Role {
    /// Reads the role from role-probe output.
    pub fn from_probe_output(output: &str) -> Self {
        if output.contains(FOLLOWER_MARKER) {
            Self::Follower
        } else if output.contains(LEADER_MARKER) {
            Self::Leader
        } else {
            Self::Unknown
        }
    }

    /// Returns the lowercase role name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Leader => "leader",
            Self::Follower => "follower",
            Self::Unknown => "unknown",
            Self::Down => "down",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Role {
    type Err = VerifyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "leader" | "master" | "rw" => Ok(Self::Leader),
            "follower" | "replica" | "ro" => Ok(Self::Follower),
            "unknown" => Ok(Self::Unknown),
            "down" => Ok(Self::Down),
            other => Err(VerifyError::scenario(format!("unknown role: {other}"))),
        }
    }
}

/// Observes the current role of a replica.
///
/// An exited replica is [`Role::Down`]. A running replica is asked through
/// its console; a failing console call is an assertion failure so pollers
/// keep trying while the replica boots.
pub async fn observe_role(cluster: &Cluster, replica: &str) -> Result<Role> {
    if cluster.observe_state(replica).await?.is_exited() {
        return Ok(Role::Down);
    }

    let output = cluster.exec_script(replica, ROLE_SCRIPT).await?;
    if !output.success() {
        return Err(VerifyError::assertion(format!(
            "{replica} console exited with {}: {}",
            output.exit_code,
            output.combined_output().trim()
        )));
    }
    Ok(Role::from_probe_output(&output.combined_output()))
}

/// Checks that a replica currently has the `expected` role.
pub async fn check_role(cluster: &Cluster, replica: &str, expected: Role) -> Result<()> {
    let observed = observe_role(cluster, replica).await?;
    if observed != expected {
        return Err(VerifyError::assertion(format!(
            "unexpected role of {replica}: expected {expected}, observed {observed}"
        )));
    }
    debug!(replica, role = %observed, "Role confirmed");
    Ok(())
}

/// Waits up to `max_wait` for a replica to take the `expected` role,
/// checking once per second.
pub async fn wait_for_role(
    cluster: &Cluster,
    replica: &str,
    expected: Role,
    max_wait: Duration,
) -> Result<()> {
    let poller = ConvergencePoller::new(max_wait, DEFAULT_POLL_INTERVAL);
    wait_for_role_with(&poller, cluster, replica, expected).await
}

/// Like [`wait_for_role`], with the bounds of `poller`.
pub async fn wait_for_role_with(
    poller: &ConvergencePoller,
    cluster: &Cluster,
    replica: &str,
    expected: Role,
) -> Result<()> {
    poller
        .poll(move || check_role(cluster, replica, expected))
        .await
        .map_err(|e| e.into_verify_error(format!("{replica} to become {expected}")))?;
    info!(replica, role = %expected, "Replica reached expected role");
    Ok(())
}

/// Checks that the router API of a replica serves requests.
pub async fn check_router_api(cluster: &Cluster, replica: &str) -> Result<()> {
    let output = cluster.exec_script(replica, ROUTER_CHECK_SCRIPT).await?;
    if !output.success() || !output.contains(ROUTER_OK_MARKER) {
        return Err(VerifyError::assertion(format!(
            "router API check failed on {replica}: {}",
            output.combined_output().trim()
        )));
    }
    debug!(replica, "Router API works");
    Ok(())
}

/// Checks the router API of every replica.
pub async fn check_router_api_everywhere(cluster: &Cluster) -> Result<()> {
    for replica in cluster.replica_names() {
        check_router_api(cluster, replica).await?;
    }
    Ok(())
}

/// Crashes the database process of a replica.
///
/// The console call is expected to die with the process, so its outcome is
/// ignored; only an unknown replica is an error.
pub async fn crash_replica(cluster: &Cluster, replica: &str) -> Result<()> {
    cluster.find(replica)?;
    match cluster.exec_script(replica, CRASH_SCRIPT).await {
        Ok(output) => debug!(replica, exit_code = output.exit_code, "Crash script returned"),
        Err(e) => debug!(replica, error = %e, "Crash script failed"),
    }
    info!(replica, "Crashed replica");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use shardlab_core::{parse_defaulted_yaml, ClusterConfig, DeploymentPlan, IdentityAllocator};
    use shardlab_orchestrator::{
        ClusterOrchestrator, ContainerRuntime, ExecOutput, ExecResponder, MemoryRuntime,
        OrchestratorError, OrchestratorSettings,
    };
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    async fn cluster() -> (Arc<MemoryRuntime>, Cluster) {
        let runtime = Arc::new(MemoryRuntime::new());
        runtime.create_network("net").await.unwrap();
        let orchestrator =
            ClusterOrchestrator::new(runtime.clone(), OrchestratorSettings::new("001", "net"));
        let mut cluster = orchestrator.empty_cluster("cluster_001");
        let config = ClusterConfig::from_tree(
            &parse_defaulted_yaml("rs1:\n  t1:\n    master: true\n  t2: {}\n").unwrap(),
            "cluster_001",
            &mut IdentityAllocator::new(),
            |n| format!("001_{n}:3301"),
        )
        .unwrap();
        let plan =
            DeploymentPlan::from_tree(&parse_defaulted_yaml("rs1:\n  t1: {}\n  t2: {}\n").unwrap())
                .unwrap();
        orchestrator.provision(&mut cluster, &config, &plan).await.unwrap();
        cluster.start_all().await.unwrap();
        (runtime, cluster)
    }

    fn role_responder(leader: &'static str) -> ExecResponder {
        Arc::new(move |name: &str, cmd: &[String]| {
            let script = cmd.last().map(String::as_str).unwrap_or_default();
            if script.contains("box.info()") {
                let marker = if name.ends_with(leader) { "I_AM_RW" } else { "I_AM_RO" };
                ExecOutput::new(format!("---\n- {marker}\n...\n"), "", 0)
            } else if script.contains("router.test") {
                ExecOutput::new("---\n- CHECKOK\n...\n", "", 0)
            } else {
                ExecOutput::new("", "connection lost", 1)
            }
        })
    }

    #[test]
    fn test_role_from_output() {
        assert_eq!(Role::from_probe_output("- I_AM_RW"), Role::Leader);
        assert_eq!(Role::from_probe_output("- I_AM_RO"), Role::Follower);
        assert_eq!(Role::from_probe_output("error"), Role::Unknown);
        // the script echo never contains a full marker
        assert_eq!(Role::from_probe_output(ROLE_SCRIPT), Role::Unknown);
    }

    #[test]
    fn test_role_parse() {
        assert_eq!("master".parse::<Role>().unwrap(), Role::Leader);
        assert_eq!("RO".parse::<Role>().unwrap(), Role::Follower);
        assert_eq!("down".parse::<Role>().unwrap(), Role::Down);
        assert!("boss".parse::<Role>().is_err());
    }

    #[tokio::test]
    async fn test_check_role() {
        let (runtime, cluster) = cluster().await;
        runtime.set_exec_responder(role_responder("t1")).await;

        check_role(&cluster, "t1", Role::Leader).await.unwrap();
        check_role(&cluster, "t2", Role::Follower).await.unwrap();

        let err = check_role(&cluster, "t2", Role::Leader).await.unwrap_err();
        assert!(matches!(err, VerifyError::Assertion(_)));
    }

    #[tokio::test]
    async fn test_exited_replica_is_down() {
        let (runtime, cluster) = cluster().await;
        runtime.exit("001_t2", 139).await.unwrap();

        check_role(&cluster, "t2", Role::Down).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_role_converges() {
        let (runtime, cluster) = cluster().await;
        let probes = Arc::new(AtomicU32::new(0));
        let seen = probes.clone();
        runtime
            .set_exec_responder(Arc::new(move |_: &str, _: &[String]| {
                if seen.fetch_add(1, Ordering::SeqCst) + 1 < 3 {
                    ExecOutput::new("- I_AM_RO", "", 0)
                } else {
                    ExecOutput::new("- I_AM_RW", "", 0)
                }
            }))
            .await;

        wait_for_role(&cluster, "t2", Role::Leader, Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(probes.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_role_times_out() {
        let (runtime, cluster) = cluster().await;
        runtime.set_exec_responder(role_responder("t1")).await;

        let err = wait_for_role(&cluster, "t2", Role::Leader, Duration::from_secs(3))
            .await
            .unwrap_err();
        match err {
            VerifyError::ConvergenceTimeout {
                condition,
                attempts,
                ..
            } => {
                assert_eq!(condition, "t2 to become leader");
                assert_eq!(attempts, 4);
            }
            other => panic!("expected convergence timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_replica_is_fatal() {
        let (_, cluster) = cluster().await;
        let err = wait_for_role(&cluster, "t9", Role::Leader, Duration::from_secs(30))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            VerifyError::Orchestrator(OrchestratorError::ReplicaNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_router_api() {
        let (runtime, cluster) = cluster().await;
        runtime.set_exec_responder(role_responder("t1")).await;
        check_router_api_everywhere(&cluster).await.unwrap();

        runtime
            .set_exec_responder(Arc::new(|_: &str, _: &[String]| {
                ExecOutput::new("", "assertion failed!", 1)
            }))
            .await;
        assert!(check_router_api(&cluster, "t1").await.is_err());
    }

    #[tokio::test]
    async fn test_crash_ignores_console_failure() {
        let (runtime, cluster) = cluster().await;
        runtime.set_exec_responder(role_responder("t1")).await;

        crash_replica(&cluster, "t1").await.unwrap();
        assert!(crash_replica(&cluster, "t9").await.is_err());
    }

    #[tokio::test]
    async fn test_role_probe_goes_through_console() {
        let (runtime, cluster) = cluster().await;
        let commands = Arc::new(Mutex::new(Vec::new()));
        let sink = commands.clone();
        runtime
            .set_exec_responder(Arc::new(move |_: &str, cmd: &[String]| {
                sink.lock().unwrap().push(cmd.to_vec());
                ExecOutput::new("- I_AM_RW", "", 0)
            }))
            .await;

        check_role(&cluster, "t1", Role::Leader).await.unwrap();
        let commands = commands.lock().unwrap();
        assert_eq!(commands[0][0], "bash");
        assert!(commands[0][2].contains("tarantoolctl connect 3301"));
        assert!(commands[0][2].contains(ROLE_SCRIPT));
    }
}
