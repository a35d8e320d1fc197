//! Host threshold alerting
//!
//! Provides:
//! - Threshold evaluation of host samples against CPU/memory ceilings
//! - Alert payload construction
//! - Dispatch to the HTTP callback endpoint

mod evaluator;
mod webhook;

pub use evaluator::{
    AlertKind, AlertPayload, AlertReport, AlertThresholds, ThresholdEvaluator,
    DEFAULT_ALERT_TIMEOUT,
};
pub use webhook::WebhookDispatcher;

use crate::error::AlertError;
use async_trait::async_trait;

/// Delivery channel for fired alerts
#[async_trait]
pub trait AlertDispatcher: Send + Sync {
    /// Deliver one alert. No retries; the caller decides what a failure means.
    async fn dispatch(&self, payload: &AlertPayload) -> Result<(), AlertError>;
}
