//! Harness configuration.
//!
//! Configuration is loaded from a TOML file, then overridden by CLI
//! arguments. Every section has defaults, so an empty file is valid.

use serde::{Deserialize, Serialize};
use shardlab_core::RetryPolicy;
use shardlab_orchestrator::{
    DockerRuntimeConfig, OrchestratorSettings, DEFAULT_MEMORY_BYTES, DEFAULT_PORT_TIMEOUT,
    DEFAULT_REPLICA_IMAGE,
};
use shardlab_store::{KeyNamespace, DEFAULT_CONFIG_KEY, DEFAULT_CONSUL_PORT, DEFAULT_PREFIX};
use shardlab_verify::{
    CoordinationService, LogClassifier, DEFAULT_CONSUL_IMAGE, DEFAULT_NETWORK_PREFIX,
    DEFAULT_POLL_INTERVAL,
};
use std::path::PathBuf;
use std::time::Duration;

/// Harness configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Container settings.
    pub docker: DockerConfig,

    /// Coordination store settings.
    pub coordination: CoordinationConfig,

    /// Retry and polling settings.
    pub timing: TimingConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,

    /// Replica log audit settings.
    pub log_audit: LogAuditConfig,
}

/// Container settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerConfig {
    /// Image of the database replicas.
    pub replica_image: String,

    /// Replica command; the image default when unset.
    pub replica_command: Option<Vec<String>>,

    /// Memory limit per replica in MiB; 0 disables the limit.
    pub memory_mb: u64,

    /// Prefix of the per-run network name.
    pub network_prefix: String,

    /// Host under which published ports are reachable.
    pub port_host: String,

    /// Grace period of a container stop, in seconds.
    pub stop_timeout_secs: i64,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            replica_image: DEFAULT_REPLICA_IMAGE.to_string(),
            replica_command: None,
            memory_mb: DEFAULT_MEMORY_BYTES / (1024 * 1024),
            network_prefix: DEFAULT_NETWORK_PREFIX.to_string(),
            port_host: "localhost".to_string(),
            stop_timeout_secs: 10,
        }
    }
}

impl DockerConfig {
    /// Returns the memory limit in bytes.
    pub fn memory_bytes(&self) -> Option<u64> {
        (self.memory_mb > 0).then(|| self.memory_mb * 1024 * 1024)
    }
}

/// Coordination store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinationConfig {
    /// Image of the coordination store.
    pub image: String,

    /// HTTP port inside the container.
    pub port: u16,

    /// Key prefix shared by all clusters.
    pub kv_prefix: String,

    /// Name of the per-cluster config key.
    pub config_key: String,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            image: DEFAULT_CONSUL_IMAGE.to_string(),
            port: DEFAULT_CONSUL_PORT,
            kv_prefix: DEFAULT_PREFIX.to_string(),
            config_key: DEFAULT_CONFIG_KEY.to_string(),
        }
    }
}

impl CoordinationConfig {
    /// Returns the coordination service to start.
    pub fn service(&self) -> CoordinationService {
        CoordinationService::new(&self.image, self.port)
    }

    /// Returns the key namespace.
    pub fn namespace(&self) -> KeyNamespace {
        KeyNamespace::new(&self.kv_prefix, &self.config_key)
    }
}

/// Retry and polling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Attempts made for transient infrastructure failures.
    pub retry_attempts: u32,

    /// Delay between attempts in milliseconds.
    pub retry_delay_ms: u64,

    /// Interval between convergence checks in milliseconds.
    pub poll_interval_ms: u64,

    /// Time to wait for a published port to open, in seconds.
    pub port_timeout_secs: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            retry_attempts: retry.attempts,
            retry_delay_ms: retry.delay.as_millis() as u64,
            poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            port_timeout_secs: DEFAULT_PORT_TIMEOUT.as_secs(),
        }
    }
}

impl TimingConfig {
    /// Returns the retry delay as a Duration.
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Returns the poll interval as a Duration.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Returns the port timeout as a Duration.
    pub fn port_timeout(&self) -> Duration {
        Duration::from_secs(self.port_timeout_secs)
    }

    /// Returns the retry policy.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_attempts, self.retry_delay())
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    pub level: String,

    /// Log format (pretty, json, compact).
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

/// Replica log audit settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LogAuditConfig {
    /// Ignore the built-in allowlist of benign errors.
    pub strict: bool,

    /// Extra substrings marking an error line as benign.
    pub extra_patterns: Vec<String>,
}

impl LogAuditConfig {
    /// Builds the log classifier.
    pub fn classifier(&self) -> LogClassifier {
        let base = if self.strict {
            LogClassifier::strict()
        } else {
            LogClassifier::new()
        };
        base.with_substrings(self.extra_patterns.iter().cloned())
    }
}

impl HarnessConfig {
    /// Loads configuration from a file.
    pub fn from_file(path: &PathBuf) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Merges CLI arguments into the configuration.
    pub fn merge_cli_args(&mut self, args: &super::CliArgs) {
        if let Some(ref image) = args.replica_image {
            self.docker.replica_image = image.clone();
        }

        if let Some(ref host) = args.port_host {
            self.docker.port_host = host.clone();
        }

        if let Some(ref level) = args.log_level {
            self.logging.level = level.clone();
        }

        if args.strict_logs {
            self.log_audit.strict = true;
        }
    }

    /// Validates the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!("Invalid log level: {}", self.logging.level);
        }

        let valid_formats = ["pretty", "json", "compact"];
        if !valid_formats.contains(&self.logging.format.to_lowercase().as_str()) {
            anyhow::bail!("Invalid log format: {}", self.logging.format);
        }

        if self.docker.replica_image.is_empty() {
            anyhow::bail!("Replica image must not be empty");
        }
        if let Some(ref command) = self.docker.replica_command {
            if command.is_empty() {
                anyhow::bail!("Replica command must not be empty when set");
            }
        }
        if self.docker.network_prefix.is_empty() {
            anyhow::bail!("Network prefix must not be empty");
        }

        if self.coordination.port == 0 {
            anyhow::bail!("Coordination port must not be 0");
        }
        if self.coordination.kv_prefix.is_empty() || self.coordination.config_key.is_empty() {
            anyhow::bail!("Coordination key prefix and config key must not be empty");
        }

        if self.timing.retry_attempts == 0 {
            anyhow::bail!("Retry attempts must be at least 1");
        }
        if self.timing.poll_interval_ms == 0 {
            anyhow::bail!("Poll interval must be positive");
        }

        Ok(())
    }

    /// Returns the Docker runtime configuration.
    pub fn docker_runtime(&self) -> DockerRuntimeConfig {
        DockerRuntimeConfig {
            stop_timeout_secs: self.docker.stop_timeout_secs,
            ..DockerRuntimeConfig::default()
        }
    }

    /// Applies container and timing settings to the settings of a run.
    pub fn apply(&self, settings: OrchestratorSettings) -> OrchestratorSettings {
        let settings = settings
            .with_replica_image(&self.docker.replica_image)
            .with_memory_bytes(self.docker.memory_bytes())
            .with_retry(self.timing.retry_policy())
            .with_port_wait(&self.docker.port_host, self.timing.port_timeout());
        match self.docker.replica_command {
            Some(ref command) => settings.with_replica_command(command.clone()),
            None => settings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = HarnessConfig::default();

        assert_eq!(config.docker.replica_image, DEFAULT_REPLICA_IMAGE);
        assert_eq!(config.docker.memory_bytes(), Some(DEFAULT_MEMORY_BYTES));
        assert_eq!(config.docker.network_prefix, "shardlab_net");
        assert_eq!(config.coordination.port, 8500);
        assert_eq!(
            config.coordination.namespace().config_key("cluster_000"),
            "autovshard/cluster_000/autovshard_cfg_yaml"
        );
        assert_eq!(config.timing.retry_policy(), RetryPolicy::default());
        assert_eq!(config.logging.level, "info");
        assert!(!config.log_audit.strict);
    }

    #[test]
    fn test_config_validation() {
        let mut config = HarnessConfig::default();

        assert!(config.validate().is_ok());

        config.logging.level = "invalid".to_string();
        assert!(config.validate().is_err());

        config.logging.level = "info".to_string();

        config.logging.format = "invalid".to_string();
        assert!(config.validate().is_err());

        config.logging.format = "json".to_string();
        config.timing.retry_attempts = 0;
        assert!(config.validate().is_err());

        config.timing.retry_attempts = 3;
        config.docker.replica_command = Some(Vec::new());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_timing_durations() {
        let config = TimingConfig::default();

        assert_eq!(config.retry_delay(), Duration::from_millis(200));
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.port_timeout(), DEFAULT_PORT_TIMEOUT);
    }

    #[test]
    fn test_memory_limit_can_be_disabled() {
        let docker = DockerConfig {
            memory_mb: 0,
            ..DockerConfig::default()
        };
        assert_eq!(docker.memory_bytes(), None);
    }

    #[test]
    fn test_apply_to_settings() {
        let mut config = HarnessConfig::default();
        config.docker.replica_image = "tarantool/tarantool:2.5".to_string();
        config.docker.replica_command = Some(vec!["tarantool".into(), "/opt/init.lua".into()]);
        config.timing.retry_attempts = 5;

        let settings = config.apply(OrchestratorSettings::new("004", "net"));
        assert_eq!(settings.replica_image, "tarantool/tarantool:2.5");
        assert_eq!(
            settings.replica_command,
            Some(vec!["tarantool".to_string(), "/opt/init.lua".to_string()])
        );
        assert_eq!(settings.retry.attempts, 5);
        assert_eq!(settings.run_id, "004");
    }

    #[test]
    fn test_classifier_from_config() {
        let config = LogAuditConfig {
            strict: true,
            extra_patterns: vec!["flaky".to_string()],
        };
        let classifier = config.classifier();
        assert_eq!(classifier.patterns().len(), 1);
        assert_eq!(
            classifier.real_errors("E> flaky\nE> ER_LOADING: Instance bootstrap hasn't finished yet"),
            vec!["E> ER_LOADING: Instance bootstrap hasn't finished yet"]
        );
    }

    #[test]
    fn test_config_serialization() {
        let config = HarnessConfig::default();
        let toml_str = toml::to_string(&config).unwrap();

        let parsed: HarnessConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.docker.replica_image, config.docker.replica_image);
        assert_eq!(parsed.coordination.port, config.coordination.port);
    }

    #[test]
    fn test_from_file_with_partial_sections() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[docker]
replica_image = "tarantool/tarantool:2.4"

[log_audit]
extra_patterns = ["flaky"]
"#
        )
        .unwrap();

        let config = HarnessConfig::from_file(&file.path().to_path_buf()).unwrap();
        assert_eq!(config.docker.replica_image, "tarantool/tarantool:2.4");
        assert_eq!(config.docker.network_prefix, "shardlab_net");
        assert_eq!(config.log_audit.extra_patterns, vec!["flaky".to_string()]);
        assert_eq!(config.timing.retry_attempts, 3);
    }

    #[test]
    fn test_from_file_rejects_bad_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[docker\nreplica_image = 1").unwrap();
        assert!(HarnessConfig::from_file(&file.path().to_path_buf()).is_err());
    }
}
