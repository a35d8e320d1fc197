//! Error types for the telemetry monitor
//!
//! Per-record problems never surface here: the unit normalizer degrades to
//! zero and malformed sample lines are counted, not raised. These types cover
//! the per-cycle, per-alert and startup failure classes.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for monitor operations
pub type Result<T> = std::result::Result<T, MonitorError>;

/// Failure invoking the external stats source
#[derive(Error, Debug)]
pub enum CollectorError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {status}: {output}")]
    Failed {
        command: String,
        status: String,
        output: String,
    },

    #[error("stats source did not answer within {0:?}")]
    Timeout(Duration),

    #[error("host sampler failed: {0}")]
    Sampler(String),
}

/// Failure dispatching one alert to the callback endpoint
#[derive(Error, Debug)]
pub enum AlertError {
    #[error("callback URL is not set")]
    MissingCallback,

    #[error("failed to send alert: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("callback answered {status}: {body}")]
    Status { status: u16, body: String },

    #[error("callback did not answer within {0:?}")]
    Timeout(Duration),
}

/// Failure talking to the metric store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to open store at {path}: {reason}")]
    Open { path: String, reason: String },

    #[error("failed to create metric tables: {0}")]
    Migration(String),

    #[error("store query failed: {0}")]
    Query(#[from] sqlx::Error),

    #[error("invalid stored timestamp {0}")]
    Timestamp(i64),
}

/// Invalid retention schedule
#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("invalid cron expression `{expression}`: {reason}")]
    InvalidCron { expression: String, reason: String },

    #[error("cron expression `{0}` never fires")]
    NeverFires(String),
}

/// Top-level error for the monitor library
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error(transparent)]
    Collector(#[from] CollectorError),

    #[error(transparent)]
    Alert(#[from] AlertError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    #[error("invalid configuration: {0}")]
    Config(String),
}
