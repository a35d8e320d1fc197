//! Persistent metric storage
//!
//! Two logically separate append-only tables, container metrics and host
//! metrics, each keyed by timestamp plus a synthetic row id. Timestamps are
//! not unique; nothing here treats them as a key.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::error::StoreError;
use crate::models::{ContainerMetric, HostMetric, Stored};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Storage operations used by the collection loops and retention sweeper
///
/// Every query returns rows in ascending timestamp order (ties broken by id).
/// Limited queries return the most recent rows, still ascending.
#[async_trait]
pub trait MetricsStore: Send + Sync {
    async fn save_container_metric(&self, metric: &ContainerMetric) -> Result<i64, StoreError>;

    async fn save_host_metric(&self, metric: &HostMetric) -> Result<i64, StoreError>;

    /// Host rows with `start <= timestamp <= end`
    async fn host_metrics_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Stored<HostMetric>>, StoreError>;

    /// Container rows whose name starts with `name_prefix` and `start <= timestamp <= end`
    async fn container_metrics_range(
        &self,
        name_prefix: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Stored<ContainerMetric>>, StoreError>;

    /// The `n` most recent host rows
    async fn last_host_metrics(&self, n: usize) -> Result<Vec<Stored<HostMetric>>, StoreError>;

    /// Container rows whose name starts with `name_prefix`; `None` returns all of them
    async fn container_metrics_by_name(
        &self,
        name_prefix: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Stored<ContainerMetric>>, StoreError>;

    /// Delete container rows with `timestamp < cutoff`, returning the count
    async fn prune_container_metrics(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Delete host rows with `timestamp < cutoff`, returning the count
    async fn prune_host_metrics(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;
}
