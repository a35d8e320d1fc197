//! Daemon configuration
//!
//! Read from an optional file named by `MONITOR_CONFIG_FILE`, overridden by
//! `MONITOR_*` environment variables with `__` between nested keys
//! (e.g. `MONITOR_SERVER__THRESHOLDS__CPU=90`).

use anyhow::{Context, Result};
use monitor_lib::alert::AlertThresholds;
use monitor_lib::collector::{CollectionConfig, HostSamplingConfig, MonitoringPolicy};
use monitor_lib::retention::{RetentionPolicy, DEFAULT_CRON, DEFAULT_RETENTION_DAYS};
use monitor_lib::ScheduleError;
use serde::Deserialize;
use std::time::Duration;

const CONFIG_FILE_VAR: &str = "MONITOR_CONFIG_FILE";

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Name attached to every structured log event
    #[serde(default = "default_host_name")]
    pub host_name: String,

    /// Port for the health/metrics endpoints
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// SQLite file, or `:memory:` for a process-local store
    #[serde(default = "default_database_path")]
    pub database_path: String,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub containers: ContainersConfig,
}

/// Host sampling, alerting and retention settings
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_type")]
    pub server_type: String,

    /// Host sampling interval in seconds; 0 selects the default
    #[serde(default = "default_host_refresh")]
    pub refresh_rate_secs: u64,

    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    #[serde(default = "default_cron_job")]
    pub cron_job: String,

    #[serde(default)]
    pub url_callback: String,

    #[serde(default)]
    pub token: String,

    #[serde(default = "default_alert_timeout")]
    pub alert_timeout_secs: u64,

    #[serde(default)]
    pub thresholds: ThresholdConfig,
}

/// Percentage ceilings; 0 disables the check
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ThresholdConfig {
    #[serde(default)]
    pub cpu: f64,
    #[serde(default)]
    pub memory: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContainersConfig {
    /// Container cycle interval in seconds; 0 selects the default
    #[serde(default = "default_container_refresh")]
    pub refresh_rate_secs: u64,

    #[serde(default = "default_collector_timeout")]
    pub collector_timeout_secs: u64,

    #[serde(default)]
    pub services: MonitoringPolicy,
}

fn default_host_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string())
}

fn default_api_port() -> u16 {
    3001
}

fn default_database_path() -> String {
    "monitoring.db".to_string()
}

fn default_server_type() -> String {
    "Dokploy".to_string()
}

fn default_host_refresh() -> u64 {
    10
}

fn default_retention_days() -> u32 {
    DEFAULT_RETENTION_DAYS
}

fn default_cron_job() -> String {
    DEFAULT_CRON.to_string()
}

fn default_alert_timeout() -> u64 {
    10
}

fn default_container_refresh() -> u64 {
    60
}

fn default_collector_timeout() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_type: default_server_type(),
            refresh_rate_secs: default_host_refresh(),
            retention_days: default_retention_days(),
            cron_job: default_cron_job(),
            url_callback: String::new(),
            token: String::new(),
            alert_timeout_secs: default_alert_timeout(),
            thresholds: ThresholdConfig::default(),
        }
    }
}

impl Default for ContainersConfig {
    fn default() -> Self {
        Self {
            refresh_rate_secs: default_container_refresh(),
            collector_timeout_secs: default_collector_timeout(),
            services: MonitoringPolicy::default(),
        }
    }
}

fn secs_or(value: u64, fallback: u64) -> Duration {
    Duration::from_secs(if value == 0 { fallback } else { value })
}

impl MonitorConfig {
    /// Load configuration from the optional file and the environment
    pub fn load() -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Ok(path) = std::env::var(CONFIG_FILE_VAR) {
            builder = builder.add_source(config::File::with_name(&path));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix("MONITOR")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("containers.services.include")
                    .with_list_parse_key("containers.services.exclude")
                    .try_parsing(true),
            )
            .build()
            .context("failed to read configuration sources")?;

        Self::from_config(config)
    }

    fn from_config(config: config::Config) -> Result<Self> {
        config
            .try_deserialize()
            .context("failed to parse configuration")
    }

    pub fn collection_config(&self) -> CollectionConfig {
        CollectionConfig {
            interval: secs_or(self.containers.refresh_rate_secs, default_container_refresh()),
            collector_timeout: secs_or(
                self.containers.collector_timeout_secs,
                default_collector_timeout(),
            ),
        }
    }

    pub fn host_sampling_config(&self) -> HostSamplingConfig {
        HostSamplingConfig {
            interval: secs_or(self.server.refresh_rate_secs, default_host_refresh()),
        }
    }

    pub fn alert_thresholds(&self) -> AlertThresholds {
        AlertThresholds {
            cpu: self.server.thresholds.cpu,
            memory: self.server.thresholds.memory,
            callback_url: self.server.url_callback.clone(),
            token: self.server.token.clone(),
            server_type: self.server.server_type.clone(),
        }
    }

    pub fn alert_timeout(&self) -> Duration {
        secs_or(self.server.alert_timeout_secs, default_alert_timeout())
    }

    pub fn retention_policy(&self) -> Result<RetentionPolicy, ScheduleError> {
        RetentionPolicy::new(self.server.retention_days, &self.server.cron_job)
    }

    pub fn monitoring_policy(&self) -> MonitoringPolicy {
        self.containers.services.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::{File, FileFormat};

    fn parse(toml: &str) -> MonitorConfig {
        let config = config::Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()
            .unwrap();
        MonitorConfig::from_config(config).unwrap()
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = parse("");

        assert_eq!(config.api_port, 3001);
        assert_eq!(config.database_path, "monitoring.db");
        assert_eq!(config.server.server_type, "Dokploy");
        assert_eq!(config.collection_config().interval, Duration::from_secs(60));
        assert_eq!(config.host_sampling_config().interval, Duration::from_secs(10));
        assert_eq!(config.alert_timeout(), Duration::from_secs(10));
        assert!(!config.alert_thresholds().is_enabled());
        assert_eq!(config.monitoring_policy(), MonitoringPolicy::allow_all());
        assert_eq!(config.retention_policy().unwrap().retention_days, 7);
    }

    #[test]
    fn test_nested_sections_override_defaults() {
        let config = parse(
            r#"
            host_name = "edge-01"
            database_path = ":memory:"

            [server]
            refresh_rate_secs = 0
            retention_days = 3
            cron_job = "*/5 * * * *"
            url_callback = "http://panel/api/alerts"
            token = "secret"

            [server.thresholds]
            cpu = 90
            memory = 85.5

            [containers]
            refresh_rate_secs = 15

            [containers.services]
            include = ["api", "web"]
            exclude = ["db"]
            "#,
        );

        assert_eq!(config.host_name, "edge-01");
        // Zero falls back to the default interval
        assert_eq!(config.host_sampling_config().interval, Duration::from_secs(10));
        assert_eq!(config.collection_config().interval, Duration::from_secs(15));

        let thresholds = config.alert_thresholds();
        assert_eq!(thresholds.cpu, 90.0);
        assert_eq!(thresholds.memory, 85.5);
        assert_eq!(thresholds.callback_url, "http://panel/api/alerts");
        assert_eq!(thresholds.token, "secret");

        let policy = config.monitoring_policy();
        assert!(policy.should_monitor("shop-api-1"));
        assert!(!policy.should_monitor("shop-db-1"));
        assert!(!policy.should_monitor("shop-worker-1"));

        let retention = config.retention_policy().unwrap();
        assert_eq!(retention.retention_days, 3);
        assert_eq!(retention.expression(), "*/5 * * * *");
    }

    #[test]
    fn test_invalid_cron_is_reported() {
        let config = parse(
            r#"
            [server]
            cron_job = "whenever"
            "#,
        );

        assert!(config.retention_policy().is_err());
    }
}
