//! Telemetry ingestion and alerting library
//!
//! This crate provides the core functionality for:
//! - Container and host metric collection
//! - Text normalization and per-service deduplication
//! - Threshold alerting over a webhook
//! - Metric persistence and scheduled retention
//! - Health checks and observability

pub mod alert;
pub mod collector;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod retention;
pub mod store;

pub use error::{AlertError, CollectorError, MonitorError, Result, ScheduleError, StoreError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{MonitorMetrics, StructuredLogger};
