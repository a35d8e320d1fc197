//! Core data models for the telemetry monitor

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

/// Current UTC time truncated to the microsecond precision metrics are stored with
pub fn utc_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// One container's instantaneous values as emitted by the stats source
///
/// Field names follow the stats tool's JSON template.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawContainerSample {
    #[serde(rename = "BlockIO", default)]
    pub block_io: String,
    #[serde(rename = "CPUPerc", default)]
    pub cpu_perc: String,
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "MemPerc", default)]
    pub mem_perc: String,
    #[serde(rename = "MemUsage", default)]
    pub mem_usage: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "NetIO", default)]
    pub net_io: String,
}

/// Memory usage of a container
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryMetric {
    pub percentage: f64,
    pub used: f64,
    pub total: f64,
    pub used_unit: String,
    pub total_unit: String,
}

/// Cumulative network traffic of a container
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkMetric {
    pub input: f64,
    pub output: f64,
    pub input_unit: String,
    pub output_unit: String,
}

/// Cumulative block device traffic of a container
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockIoMetric {
    pub read: f64,
    pub write: f64,
    pub read_unit: String,
    pub write_unit: String,
}

/// Normalized, typed container metrics ready for persistence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerMetric {
    pub timestamp: DateTime<Utc>,
    pub container_id: String,
    pub container_name: String,
    pub cpu: f64,
    pub memory: MemoryMetric,
    pub network: NetworkMetric,
    pub block_io: BlockIoMetric,
}

/// A single host-wide sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostMetric {
    pub timestamp: DateTime<Utc>,
    pub cpu: f64,
    pub cpu_model: String,
    pub cpu_cores: u32,
    pub cpu_speed_mhz: f64,
    pub os: String,
    pub distro: String,
    pub kernel: String,
    pub arch: String,
    /// Used memory as a percentage of total
    pub mem_used_percent: f64,
    pub mem_used_gb: f64,
    pub mem_total_gb: f64,
    pub uptime_secs: u64,
    pub disk_used_percent: f64,
    pub disk_total_gb: f64,
    pub network_in_mb: f64,
    pub network_out_mb: f64,
}

impl HostMetric {
    /// Empty sample stamped with `timestamp`, mostly useful as a base for tests
    pub fn empty_at(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            cpu: 0.0,
            cpu_model: String::new(),
            cpu_cores: 0,
            cpu_speed_mhz: 0.0,
            os: String::new(),
            distro: String::new(),
            kernel: String::new(),
            arch: String::new(),
            mem_used_percent: 0.0,
            mem_used_gb: 0.0,
            mem_total_gb: 0.0,
            uptime_secs: 0,
            disk_used_percent: 0.0,
            disk_total_gb: 0.0,
            network_in_mb: 0.0,
            network_out_mb: 0.0,
        }
    }
}

/// Stored row with its synthetic identity
///
/// Timestamps are not unique across rows, the id is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stored<T> {
    pub id: i64,
    pub metric: T,
}
