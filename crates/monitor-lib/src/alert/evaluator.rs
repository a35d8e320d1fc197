//! Threshold evaluation for host samples
//!
//! Stateless per call: every evaluation in which a metric is above its
//! ceiling fires again. There is no debounce or hysteresis.

use super::AlertDispatcher;
use crate::error::AlertError;
use crate::models::HostMetric;
use crate::observability::{MonitorMetrics, StructuredLogger};
use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Default bound on a single alert delivery
pub const DEFAULT_ALERT_TIMEOUT: Duration = Duration::from_secs(10);

/// Metric an alert is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlertKind {
    #[serde(rename = "CPU")]
    Cpu,
    #[serde(rename = "Memory")]
    Memory,
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertKind::Cpu => write!(f, "CPU"),
            AlertKind::Memory => write!(f, "Memory"),
        }
    }
}

/// Alert ceilings and where to send alerts
///
/// A ceiling of zero (or below) disables that metric.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertThresholds {
    pub cpu: f64,
    pub memory: f64,
    pub callback_url: String,
    pub token: String,
    pub server_type: String,
}

impl AlertThresholds {
    /// Whether any metric is being watched
    pub fn is_enabled(&self) -> bool {
        self.cpu > 0.0 || self.memory > 0.0
    }
}

/// Body delivered to the callback endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AlertPayload {
    pub server_type: String,
    #[serde(rename = "Type")]
    pub kind: AlertKind,
    pub value: f64,
    pub threshold: f64,
    pub message: String,
    pub timestamp: String,
    pub token: String,
}

/// Outcome of one evaluation
#[derive(Debug, Default)]
pub struct AlertReport {
    /// Alerts delivered successfully
    pub delivered: Vec<AlertKind>,
    /// Alerts that fired but could not be delivered
    pub failures: Vec<(AlertKind, AlertError)>,
}

impl AlertReport {
    pub fn fired(&self) -> usize {
        self.delivered.len() + self.failures.len()
    }

    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Compares host samples against thresholds and dispatches alerts
pub struct ThresholdEvaluator {
    thresholds: AlertThresholds,
    dispatcher: Arc<dyn AlertDispatcher>,
    timeout: Duration,
    metrics: MonitorMetrics,
    logger: Option<StructuredLogger>,
}

impl ThresholdEvaluator {
    pub fn new(thresholds: AlertThresholds, dispatcher: Arc<dyn AlertDispatcher>) -> Self {
        Self {
            thresholds,
            dispatcher,
            timeout: DEFAULT_ALERT_TIMEOUT,
            metrics: MonitorMetrics::new(),
            logger: None,
        }
    }

    /// Bound each delivery by `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn thresholds(&self) -> &AlertThresholds {
        &self.thresholds
    }

    /// Alerts `metric` would fire, without dispatching anything
    pub fn breaches(&self, metric: &HostMetric) -> Vec<AlertPayload> {
        if !self.thresholds.is_enabled() {
            return Vec::new();
        }

        [
            (AlertKind::Cpu, metric.cpu, self.thresholds.cpu),
            (AlertKind::Memory, metric.mem_used_percent, self.thresholds.memory),
        ]
        .into_iter()
        .filter(|&(_, value, threshold)| threshold > 0.0 && value > threshold)
        .map(|(kind, value, threshold)| self.payload(kind, value, threshold, metric))
        .collect()
    }

    /// Evaluate `metric` and deliver one alert per breached threshold
    ///
    /// Each metric kind is independent: a failed CPU delivery does not stop
    /// the memory check. Failures are logged and returned, never retried.
    pub async fn evaluate(&self, metric: &HostMetric) -> AlertReport {
        let mut report = AlertReport::default();

        for payload in self.breaches(metric) {
            let kind = payload.kind;
            let result = match tokio::time::timeout(self.timeout, self.dispatcher.dispatch(&payload)).await {
                Ok(result) => result,
                Err(_) => Err(AlertError::Timeout(self.timeout)),
            };

            match result {
                Ok(()) => {
                    self.metrics.inc_alerts_dispatched();
                    if let Some(logger) = &self.logger {
                        logger.log_alert_fired(&kind.to_string(), payload.value, payload.threshold);
                    }
                    report.delivered.push(kind);
                }
                Err(e) => {
                    self.metrics.inc_alert_failures();
                    if let Some(logger) = &self.logger {
                        logger.log_alert_failed(&kind.to_string(), &e.to_string());
                    }
                    report.failures.push((kind, e));
                }
            }
        }

        debug!(
            fired = report.fired(),
            failed = report.failures.len(),
            "Threshold evaluation complete"
        );
        report
    }

    fn payload(&self, kind: AlertKind, value: f64, threshold: f64, metric: &HostMetric) -> AlertPayload {
        AlertPayload {
            server_type: self.thresholds.server_type.clone(),
            kind,
            value,
            threshold,
            message: format!(
                "{} usage ({:.2}%) exceeded threshold ({:.2}%)",
                kind, value, threshold
            ),
            timestamp: metric.timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            token: self.thresholds.token.clone(),
        }
    }
}
