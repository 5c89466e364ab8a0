//! shardlab - runs convergence scenarios against sharded database clusters.
//!
//! Every scenario file gets a fresh run: its own network, coordination
//! store and replica containers, torn down when the scenario ends. Replica
//! logs are audited for unexpected errors after teardown.
//!
//! # Usage
//!
//! ```bash
//! # Run scenarios with the default configuration
//! shardlab scenarios/failover.yaml scenarios/switchover.yaml
//!
//! # Run with a configuration file
//! shardlab --config shardlab.toml scenarios/failover.yaml
//!
//! # Print the default configuration
//! shardlab --print-config
//! ```

mod config;
mod harness;
mod steps;

use anyhow::{Context, Result};
use clap::Parser;
use config::HarnessConfig;
use harness::Harness;
use shardlab_orchestrator::DockerRuntime;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use steps::ScenarioFile;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// CLI arguments for the shardlab runner.
#[derive(Parser, Debug)]
#[command(
    name = "shardlab",
    about = "Runs convergence scenarios against containerized sharded database clusters",
    version,
    author
)]
pub struct CliArgs {
    /// Scenario files to run, in order.
    #[arg(value_name = "SCENARIO")]
    scenarios: Vec<PathBuf>,

    /// Path to the configuration file.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Database replica image.
    #[arg(long, value_name = "IMAGE")]
    replica_image: Option<String>,

    /// Host under which published container ports are reachable.
    #[arg(long, value_name = "HOST")]
    port_host: Option<String>,

    /// Treat every error line in replica logs as a failure.
    #[arg(long)]
    strict_logs: bool,

    /// Stop after the first failing scenario.
    #[arg(long)]
    fail_fast: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Enable JSON log output.
    #[arg(long)]
    json_logs: bool,

    /// Print the default configuration and exit.
    #[arg(long)]
    print_config: bool,
}

/// Initialize tracing/logging.
fn init_tracing(config: &config::LoggingConfig, json_logs: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .context("Failed to parse log filter")?;

    let format = if json_logs || config.format == "json" {
        "json"
    } else {
        &config.format
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json())
                .try_init()
                .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;
        }
        "compact" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().compact())
                .try_init()
                .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().pretty())
                .try_init()
                .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;
        }
    }

    Ok(())
}

/// Loads every scenario up front so a typo fails before any container starts.
fn load_scenarios(paths: &[PathBuf]) -> Result<Vec<ScenarioFile>> {
    if paths.is_empty() {
        anyhow::bail!("No scenario files given");
    }
    paths
        .iter()
        .map(|path| {
            ScenarioFile::from_file(path)
                .with_context(|| format!("Failed to load scenario from {:?}", path))
        })
        .collect()
}

/// Sets a flag on Ctrl+C so the run stops between scenarios.
fn interrupt_flag() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    let set = flag.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; stopping after the current scenario");
            set.store(true, Ordering::SeqCst);
        }
    });
    flag
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    if args.print_config {
        let config = HarnessConfig::default();
        println!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    let mut config = if let Some(ref config_path) = args.config {
        HarnessConfig::from_file(config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path))?
    } else {
        HarnessConfig::default()
    };

    config.merge_cli_args(&args);

    config.validate().context("Invalid configuration")?;

    init_tracing(&config.logging, args.json_logs)?;

    info!(version = env!("CARGO_PKG_VERSION"), "shardlab starting");

    let scenarios = load_scenarios(&args.scenarios)?;

    let runtime = DockerRuntime::with_config(config.docker_runtime())
        .await
        .context("Failed to connect to Docker")?;
    let harness = Harness::new(config, Arc::new(runtime));
    let interrupted = interrupt_flag();

    let mut failed = Vec::new();
    let mut ran = 0usize;
    for scenario in &scenarios {
        if interrupted.load(Ordering::SeqCst) {
            break;
        }

        let report = harness.run(scenario).await;
        ran += 1;
        if !report.passed() {
            failed.push(report.name.clone());
            if args.fail_fast {
                break;
            }
        }
    }

    info!(
        ran,
        total = scenarios.len(),
        failed = failed.len(),
        "Run complete"
    );

    if !failed.is_empty() {
        error!(scenarios = ?failed, "Scenarios failed");
        anyhow::bail!("{} of {} scenarios failed", failed.len(), ran);
    }
    if ran < scenarios.len() {
        anyhow::bail!("Interrupted after {} of {} scenarios", ran, scenarios.len());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_args_parsing() {
        let args = CliArgs::parse_from(["shardlab"]);
        assert!(args.config.is_none());
        assert!(args.scenarios.is_empty());
        assert!(!args.json_logs);
        assert!(!args.fail_fast);
    }

    #[test]
    fn test_cli_args_with_options() {
        let args = CliArgs::parse_from([
            "shardlab",
            "--config",
            "shardlab.toml",
            "--replica-image",
            "tarantool/tarantool:2.4",
            "--log-level",
            "debug",
            "--json-logs",
            "--fail-fast",
            "a.yaml",
            "b.yaml",
        ]);

        assert_eq!(args.config, Some(PathBuf::from("shardlab.toml")));
        assert_eq!(args.replica_image, Some("tarantool/tarantool:2.4".to_string()));
        assert_eq!(args.log_level, Some("debug".to_string()));
        assert!(args.json_logs);
        assert!(args.fail_fast);
        assert_eq!(
            args.scenarios,
            vec![PathBuf::from("a.yaml"), PathBuf::from("b.yaml")]
        );
    }

    #[test]
    fn test_config_merge() {
        let mut config = HarnessConfig::default();
        let args = CliArgs::parse_from([
            "shardlab",
            "--replica-image",
            "tarantool/tarantool:2.5",
            "--port-host",
            "docker",
            "--log-level",
            "warn",
            "--strict-logs",
        ]);

        config.merge_cli_args(&args);

        assert_eq!(config.docker.replica_image, "tarantool/tarantool:2.5");
        assert_eq!(config.docker.port_host, "docker");
        assert_eq!(config.logging.level, "warn");
        assert!(config.log_audit.strict);
    }

    #[test]
    fn test_load_scenarios_requires_files() {
        assert!(load_scenarios(&[]).is_err());
        assert!(load_scenarios(&[PathBuf::from("/nonexistent/scenario.yaml")]).is_err());
    }
}
