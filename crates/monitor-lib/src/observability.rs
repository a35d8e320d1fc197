//! Observability infrastructure for the monitoring daemon
//!
//! Provides:
//! - Prometheus metrics (cycle latency, records persisted and dropped, alerts, pruning)
//! - Structured JSON logging with tracing

use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, Encoder, Histogram,
    IntCounter, IntCounterVec, TextEncoder,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Default histogram buckets for latency measurements (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

/// Reasons a container record is not persisted
pub mod drop_reason {
    pub const PARSE: &str = "parse";
    pub const FILTERED: &str = "filtered";
    pub const DUPLICATE: &str = "duplicate";
    pub const STORE: &str = "store";
}

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<MonitorMetricsInner> = OnceLock::new();

struct MonitorMetricsInner {
    container_cycle_seconds: Histogram,
    host_sample_seconds: Histogram,
    container_metrics_persisted: IntCounter,
    host_metrics_persisted: IntCounter,
    records_dropped: IntCounterVec,
    cycles_skipped: IntCounter,
    collector_failures: IntCounter,
    alerts_dispatched: IntCounter,
    alert_failures: IntCounter,
    rows_pruned: IntCounterVec,
}

impl MonitorMetricsInner {
    fn new() -> Self {
        Self {
            container_cycle_seconds: register_histogram!(
                "monitor_container_cycle_seconds",
                "Duration of one container collection cycle",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register container_cycle_seconds"),

            host_sample_seconds: register_histogram!(
                "monitor_host_sample_seconds",
                "Duration of one host sample, persist and evaluate pass",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register host_sample_seconds"),

            container_metrics_persisted: register_int_counter!(
                "monitor_container_metrics_persisted_total",
                "Container metrics written to the store"
            )
            .expect("Failed to register container_metrics_persisted"),

            host_metrics_persisted: register_int_counter!(
                "monitor_host_metrics_persisted_total",
                "Host metrics written to the store"
            )
            .expect("Failed to register host_metrics_persisted"),

            records_dropped: register_int_counter_vec!(
                "monitor_container_records_dropped_total",
                "Container records not persisted, by reason",
                &["reason"]
            )
            .expect("Failed to register records_dropped"),

            cycles_skipped: register_int_counter!(
                "monitor_container_cycles_skipped_total",
                "Container ticks dropped because a cycle was already running"
            )
            .expect("Failed to register cycles_skipped"),

            collector_failures: register_int_counter!(
                "monitor_collector_failures_total",
                "Container collector invocations that failed or timed out"
            )
            .expect("Failed to register collector_failures"),

            alerts_dispatched: register_int_counter!(
                "monitor_alerts_dispatched_total",
                "Threshold alerts delivered to the callback"
            )
            .expect("Failed to register alerts_dispatched"),

            alert_failures: register_int_counter!(
                "monitor_alert_failures_total",
                "Threshold alerts that could not be delivered"
            )
            .expect("Failed to register alert_failures"),

            rows_pruned: register_int_counter_vec!(
                "monitor_rows_pruned_total",
                "Rows deleted by the retention sweep, by table",
                &["table"]
            )
            .expect("Failed to register rows_pruned"),
        }
    }
}

/// Daemon metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance; clones share it.
#[derive(Clone)]
pub struct MonitorMetrics {
    _private: (),
}

impl Default for MonitorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MonitorMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(MonitorMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &MonitorMetricsInner {
        GLOBAL_METRICS.get_or_init(MonitorMetricsInner::new)
    }

    pub fn observe_container_cycle(&self, duration_secs: f64) {
        self.inner().container_cycle_seconds.observe(duration_secs);
    }

    pub fn observe_host_sample(&self, duration_secs: f64) {
        self.inner().host_sample_seconds.observe(duration_secs);
    }

    pub fn add_container_persisted(&self, count: u64) {
        self.inner().container_metrics_persisted.inc_by(count);
    }

    pub fn inc_host_persisted(&self) {
        self.inner().host_metrics_persisted.inc();
    }

    /// Count `count` dropped records under one of the [`drop_reason`] labels
    pub fn add_dropped(&self, reason: &str, count: u64) {
        if count > 0 {
            self.inner()
                .records_dropped
                .with_label_values(&[reason])
                .inc_by(count);
        }
    }

    pub fn inc_cycles_skipped(&self) {
        self.inner().cycles_skipped.inc();
    }

    pub fn inc_collector_failures(&self) {
        self.inner().collector_failures.inc();
    }

    pub fn inc_alerts_dispatched(&self) {
        self.inner().alerts_dispatched.inc();
    }

    pub fn inc_alert_failures(&self) {
        self.inner().alert_failures.inc();
    }

    pub fn add_rows_pruned(&self, table: &str, count: u64) {
        self.inner()
            .rows_pruned
            .with_label_values(&[table])
            .inc_by(count);
    }

    /// Everything in the default registry, in the Prometheus text format
    pub fn encode_text(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    pub fn cycles_skipped(&self) -> u64 {
        self.inner().cycles_skipped.get()
    }

    pub fn collector_failures(&self) -> u64 {
        self.inner().collector_failures.get()
    }
}

/// Structured logger for daemon lifecycle events
///
/// Every event carries a stable `event` field and the host name.
#[derive(Clone)]
pub struct StructuredLogger {
    host_name: String,
}

impl StructuredLogger {
    pub fn new(host_name: impl Into<String>) -> Self {
        Self {
            host_name: host_name.into(),
        }
    }

    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    pub fn log_startup(&self, version: &str, database_path: &str) {
        info!(
            event = "monitor_started",
            host = %self.host_name,
            version = %version,
            database_path = %database_path,
            "Monitoring daemon started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "monitor_shutdown",
            host = %self.host_name,
            reason = %reason,
            "Monitoring daemon shutting down"
        );
    }

    /// A container tick arrived while the previous cycle was still running
    pub fn log_cycle_skipped(&self) {
        info!(
            event = "cycle_skipped",
            host = %self.host_name,
            "Container cycle still in progress, skipping tick"
        );
    }

    pub fn log_alert_fired(&self, kind: &str, value: f64, threshold: f64) {
        warn!(
            event = "alert_fired",
            host = %self.host_name,
            kind = %kind,
            value = value,
            threshold = threshold,
            "Threshold alert delivered"
        );
    }

    pub fn log_alert_failed(&self, kind: &str, error: &str) {
        warn!(
            event = "alert_failed",
            host = %self.host_name,
            kind = %kind,
            error = %error,
            "Threshold alert could not be delivered"
        );
    }

    pub fn log_retention_sweep(
        &self,
        cutoff: &str,
        containers_deleted: Option<u64>,
        hosts_deleted: Option<u64>,
    ) {
        if containers_deleted.is_some() && hosts_deleted.is_some() {
            info!(
                event = "retention_sweep",
                host = %self.host_name,
                cutoff = %cutoff,
                containers_deleted = ?containers_deleted,
                hosts_deleted = ?hosts_deleted,
                "Retention sweep complete"
            );
        } else {
            warn!(
                event = "retention_sweep",
                host = %self.host_name,
                cutoff = %cutoff,
                containers_deleted = ?containers_deleted,
                hosts_deleted = ?hosts_deleted,
                "Retention sweep finished with errors"
            );
        }
    }

    pub fn log_policy_reloaded(&self, include: usize, exclude: usize) {
        info!(
            event = "policy_reloaded",
            host = %self.host_name,
            include = include,
            exclude = exclude,
            "Monitoring policy replaced"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monitor_metrics_creation() {
        // Registration happens once per process; repeated handles share it
        let metrics = MonitorMetrics::new();
        let again = MonitorMetrics::new();

        metrics.observe_container_cycle(0.01);
        metrics.observe_host_sample(0.002);
        metrics.add_container_persisted(3);
        metrics.inc_host_persisted();
        metrics.add_dropped(drop_reason::PARSE, 1);
        metrics.add_dropped(drop_reason::DUPLICATE, 0);
        metrics.add_rows_pruned("server_metrics", 4);

        let before = again.cycles_skipped();
        metrics.inc_cycles_skipped();
        assert!(again.cycles_skipped() > before);

        let text = metrics.encode_text().unwrap();
        assert!(text.contains("monitor_container_cycles_skipped_total"));
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("test-host");
        assert_eq!(logger.host_name(), "test-host");
    }
}
