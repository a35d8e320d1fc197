//! Process-local metric store

use super::MetricsStore;
use crate::error::StoreError;
use crate::models::{ContainerMetric, HostMetric, Stored};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct Tables {
    containers: Vec<Stored<ContainerMetric>>,
    hosts: Vec<Stored<HostMetric>>,
    next_id: i64,
}

impl Tables {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-memory store with the same semantics as the SQLite store
///
/// Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows in (container, host) tables
    pub async fn row_counts(&self) -> (usize, usize) {
        let tables = self.tables.read().await;
        (tables.containers.len(), tables.hosts.len())
    }
}

/// Sort ascending by (timestamp, id) and keep the last `limit` rows
fn finish<T>(
    mut rows: Vec<Stored<T>>,
    timestamp: impl Fn(&T) -> DateTime<Utc>,
    limit: Option<usize>,
) -> Vec<Stored<T>> {
    rows.sort_by(|a, b| {
        timestamp(&a.metric)
            .cmp(&timestamp(&b.metric))
            .then(a.id.cmp(&b.id))
    });
    if let Some(limit) = limit {
        let skip = rows.len().saturating_sub(limit);
        rows.drain(..skip);
    }
    rows
}

#[async_trait]
impl MetricsStore for MemoryStore {
    async fn save_container_metric(&self, metric: &ContainerMetric) -> Result<i64, StoreError> {
        let mut tables = self.tables.write().await;
        let id = tables.allocate_id();
        tables.containers.push(Stored {
            id,
            metric: metric.clone(),
        });
        Ok(id)
    }

    async fn save_host_metric(&self, metric: &HostMetric) -> Result<i64, StoreError> {
        let mut tables = self.tables.write().await;
        let id = tables.allocate_id();
        tables.hosts.push(Stored {
            id,
            metric: metric.clone(),
        });
        Ok(id)
    }

    async fn host_metrics_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Stored<HostMetric>>, StoreError> {
        let tables = self.tables.read().await;
        let rows = tables
            .hosts
            .iter()
            .filter(|row| row.metric.timestamp >= start && row.metric.timestamp <= end)
            .cloned()
            .collect();
        Ok(finish(rows, |m| m.timestamp, None))
    }

    async fn container_metrics_range(
        &self,
        name_prefix: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Stored<ContainerMetric>>, StoreError> {
        let tables = self.tables.read().await;
        let rows = tables
            .containers
            .iter()
            .filter(|row| {
                row.metric.container_name.starts_with(name_prefix)
                    && row.metric.timestamp >= start
                    && row.metric.timestamp <= end
            })
            .cloned()
            .collect();
        Ok(finish(rows, |m| m.timestamp, None))
    }

    async fn last_host_metrics(&self, n: usize) -> Result<Vec<Stored<HostMetric>>, StoreError> {
        let tables = self.tables.read().await;
        Ok(finish(tables.hosts.clone(), |m| m.timestamp, Some(n)))
    }

    async fn container_metrics_by_name(
        &self,
        name_prefix: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Stored<ContainerMetric>>, StoreError> {
        let tables = self.tables.read().await;
        let rows = tables
            .containers
            .iter()
            .filter(|row| row.metric.container_name.starts_with(name_prefix))
            .cloned()
            .collect();
        Ok(finish(rows, |m| m.timestamp, limit))
    }

    async fn prune_container_metrics(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut tables = self.tables.write().await;
        let before = tables.containers.len();
        tables.containers.retain(|row| row.metric.timestamp >= cutoff);
        Ok((before - tables.containers.len()) as u64)
    }

    async fn prune_host_metrics(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut tables = self.tables.write().await;
        let before = tables.hosts.len();
        tables.hosts.retain(|row| row.metric.timestamp >= cutoff);
        Ok((before - tables.hosts.len()) as u64)
    }
}
