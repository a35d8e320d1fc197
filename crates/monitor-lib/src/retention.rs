//! Scheduled retention sweeps
//!
//! On every firing of the cron schedule both tables are pruned of rows older
//! than `retention_days`. The two deletes are independent: one failing does
//! not stop the other.

use crate::error::{ScheduleError, StoreError};
use crate::health::{components, HealthRegistry};
use crate::observability::{MonitorMetrics, StructuredLogger};
use crate::store::MetricsStore;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use cron::Schedule;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

pub const DEFAULT_RETENTION_DAYS: u32 = 7;
pub const DEFAULT_CRON: &str = "0 0 * * *";

const CONTAINER_TABLE: &str = "container_metrics";
const HOST_TABLE: &str = "server_metrics";

/// How long to keep rows and when to prune them
#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    pub retention_days: u32,
    expression: String,
    schedule: Schedule,
}

impl RetentionPolicy {
    /// Parse `cron_expression`; classic 5-field expressions get a zero
    /// seconds field prepended
    pub fn new(retention_days: u32, cron_expression: &str) -> Result<Self, ScheduleError> {
        let expression = cron_expression.trim().to_string();
        let normalized = if expression.split_whitespace().count() == 5 {
            format!("0 {expression}")
        } else {
            expression.clone()
        };

        let schedule =
            Schedule::from_str(&normalized).map_err(|e| ScheduleError::InvalidCron {
                expression: expression.clone(),
                reason: e.to_string(),
            })?;

        if schedule.upcoming(Utc).next().is_none() {
            return Err(ScheduleError::NeverFires(expression));
        }

        Ok(Self {
            retention_days,
            expression,
            schedule,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Rows strictly older than this are deleted by a sweep at `now`
    ///
    /// A window reaching past the earliest representable time yields that
    /// time, so nothing is old enough to delete.
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        ChronoDuration::try_days(i64::from(self.retention_days))
            .and_then(|window| now.checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// First firing strictly after `now`
    pub fn next_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&now).next()
    }
}

/// Result of one sweep
#[derive(Debug)]
pub struct SweepReport {
    pub cutoff: DateTime<Utc>,
    pub containers: Result<u64, StoreError>,
    pub hosts: Result<u64, StoreError>,
}

impl SweepReport {
    pub fn is_ok(&self) -> bool {
        self.containers.is_ok() && self.hosts.is_ok()
    }

    pub fn total_deleted(&self) -> u64 {
        self.containers.as_ref().copied().unwrap_or(0) + self.hosts.as_ref().copied().unwrap_or(0)
    }
}

/// Runs retention sweeps against a store on a cron schedule
pub struct RetentionSweeper {
    store: Arc<dyn MetricsStore>,
    policy: RetentionPolicy,
    metrics: MonitorMetrics,
    health: Option<HealthRegistry>,
    logger: Option<StructuredLogger>,
}

impl RetentionSweeper {
    pub fn new(store: Arc<dyn MetricsStore>, policy: RetentionPolicy) -> Self {
        Self {
            store,
            policy,
            metrics: MonitorMetrics::new(),
            health: None,
            logger: None,
        }
    }

    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn policy(&self) -> &RetentionPolicy {
        &self.policy
    }

    /// Prune both tables of rows older than the retention window ending at `now`
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> SweepReport {
        let cutoff = self.policy.cutoff(now);

        let containers = self.store.prune_container_metrics(cutoff).await;
        if let Err(e) = &containers {
            warn!(table = CONTAINER_TABLE, error = %e, "Failed to prune rows");
        }
        let hosts = self.store.prune_host_metrics(cutoff).await;
        if let Err(e) = &hosts {
            warn!(table = HOST_TABLE, error = %e, "Failed to prune rows");
        }

        if let Ok(count) = &containers {
            self.metrics.add_rows_pruned(CONTAINER_TABLE, *count);
        }
        if let Ok(count) = &hosts {
            self.metrics.add_rows_pruned(HOST_TABLE, *count);
        }

        let report = SweepReport {
            cutoff,
            containers,
            hosts,
        };

        if let Some(logger) = &self.logger {
            logger.log_retention_sweep(
                &cutoff.to_rfc3339(),
                report.containers.as_ref().ok().copied(),
                report.hosts.as_ref().ok().copied(),
            );
        }
        if let Some(health) = &self.health {
            if report.is_ok() {
                health.set_healthy(components::RETENTION).await;
            } else {
                health
                    .set_degraded(components::RETENTION, "retention sweep failed")
                    .await;
            }
        }

        report
    }

    /// Sleep until each scheduled firing and sweep, until shutdown
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            schedule = %self.policy.expression(),
            retention_days = self.policy.retention_days,
            "Starting retention sweeper"
        );

        loop {
            let now = Utc::now();
            let Some(next) = self.policy.next_after(now) else {
                warn!(schedule = %self.policy.expression(), "Schedule has no further firings");
                break;
            };
            let wait = (next - now).to_std().unwrap_or_default();
            debug!(next = %next, "Next retention sweep scheduled");

            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    self.sweep_at(Utc::now()).await;
                }
                _ = shutdown.recv() => {
                    info!("Shutting down retention sweeper");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ContainerMetric, HostMetric, Stored};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use chrono::TimeZone;

    fn host_at(ts: DateTime<Utc>) -> HostMetric {
        HostMetric::empty_at(ts)
    }

    fn container_at(ts: DateTime<Utc>) -> ContainerMetric {
        ContainerMetric {
            timestamp: ts,
            container_id: "abc".into(),
            container_name: "web-1".into(),
            cpu: 1.0,
            memory: Default::default(),
            network: Default::default(),
            block_io: Default::default(),
        }
    }

    #[test]
    fn test_five_field_expression_is_accepted() {
        let policy = RetentionPolicy::new(7, "0 0 * * *").unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 15, 30, 0).unwrap();

        assert_eq!(
            policy.next_after(now),
            Some(Utc.with_ymd_and_hms(2024, 3, 11, 0, 0, 0).unwrap())
        );
        assert_eq!(policy.expression(), "0 0 * * *");
    }

    #[test]
    fn test_six_field_expression_is_used_as_is() {
        let policy = RetentionPolicy::new(1, "30 15 2 * * *").unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 3, 0, 0).unwrap();

        assert_eq!(
            policy.next_after(now),
            Some(Utc.with_ymd_and_hms(2024, 3, 11, 2, 15, 30).unwrap())
        );
    }

    #[test]
    fn test_invalid_expression_is_rejected() {
        let err = RetentionPolicy::new(7, "every day please").unwrap_err();
        assert!(matches!(err, ScheduleError::InvalidCron { .. }));
    }

    #[test]
    fn test_default_policy_fires_at_midnight() {
        let policy = RetentionPolicy::new(DEFAULT_RETENTION_DAYS, DEFAULT_CRON).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();

        assert_eq!(policy.retention_days, DEFAULT_RETENTION_DAYS);
        assert_eq!(
            policy.next_after(now),
            Some(Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap())
        );
    }

    #[tokio::test]
    async fn test_sweep_deletes_only_expired_rows() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc.with_ymd_and_hms(2024, 6, 20, 0, 0, 0).unwrap();

        store.save_host_metric(&host_at(now - ChronoDuration::days(10))).await.unwrap();
        store.save_host_metric(&host_at(now - ChronoDuration::days(1))).await.unwrap();
        store
            .save_container_metric(&container_at(now - ChronoDuration::days(10)))
            .await
            .unwrap();
        store
            .save_container_metric(&container_at(now - ChronoDuration::days(1)))
            .await
            .unwrap();

        let sweeper = RetentionSweeper::new(store.clone(), RetentionPolicy::new(7, "0 0 * * *").unwrap());
        let report = sweeper.sweep_at(now).await;

        assert!(report.is_ok());
        assert_eq!(report.cutoff, now - ChronoDuration::days(7));
        assert_eq!(report.containers.as_ref().unwrap(), &1);
        assert_eq!(report.hosts.as_ref().unwrap(), &1);
        assert_eq!(report.total_deleted(), 2);

        let remaining = store.last_host_metrics(10).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].metric.timestamp, now - ChronoDuration::days(1));
        assert_eq!(store.row_counts().await, (1, 1));
    }

    #[tokio::test]
    async fn test_huge_window_keeps_every_row() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc.with_ymd_and_hms(2024, 6, 20, 0, 0, 0).unwrap();
        store.save_host_metric(&host_at(now - ChronoDuration::days(3650))).await.unwrap();
        store
            .save_container_metric(&container_at(now - ChronoDuration::days(3650)))
            .await
            .unwrap();

        let policy = RetentionPolicy::new(u32::MAX, DEFAULT_CRON).unwrap();
        assert_eq!(policy.cutoff(now), DateTime::<Utc>::MIN_UTC);

        let sweeper = RetentionSweeper::new(store.clone(), policy);
        let report = sweeper.sweep_at(now).await;

        assert!(report.is_ok());
        assert_eq!(report.total_deleted(), 0);
        assert_eq!(store.row_counts().await, (1, 1));
    }

    #[tokio::test]
    async fn test_row_at_cutoff_is_kept() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc.with_ymd_and_hms(2024, 6, 20, 0, 0, 0).unwrap();
        store.save_host_metric(&host_at(now - ChronoDuration::days(7))).await.unwrap();

        let sweeper = RetentionSweeper::new(store.clone(), RetentionPolicy::new(7, DEFAULT_CRON).unwrap());
        let report = sweeper.sweep_at(now).await;

        assert_eq!(report.hosts.unwrap(), 0);
        assert_eq!(store.row_counts().await, (0, 1));
    }

    /// Container prune always fails; host prune delegates
    struct BrokenContainerTable {
        inner: MemoryStore,
    }

    #[async_trait]
    impl MetricsStore for BrokenContainerTable {
        async fn save_container_metric(&self, m: &ContainerMetric) -> Result<i64, StoreError> {
            self.inner.save_container_metric(m).await
        }
        async fn save_host_metric(&self, m: &HostMetric) -> Result<i64, StoreError> {
            self.inner.save_host_metric(m).await
        }
        async fn host_metrics_range(
            &self,
            start: DateTime<Utc>,
            end: DateTime<Utc>,
        ) -> Result<Vec<Stored<HostMetric>>, StoreError> {
            self.inner.host_metrics_range(start, end).await
        }
        async fn container_metrics_range(
            &self,
            prefix: &str,
            start: DateTime<Utc>,
            end: DateTime<Utc>,
        ) -> Result<Vec<Stored<ContainerMetric>>, StoreError> {
            self.inner.container_metrics_range(prefix, start, end).await
        }
        async fn last_host_metrics(&self, n: usize) -> Result<Vec<Stored<HostMetric>>, StoreError> {
            self.inner.last_host_metrics(n).await
        }
        async fn container_metrics_by_name(
            &self,
            prefix: &str,
            limit: Option<usize>,
        ) -> Result<Vec<Stored<ContainerMetric>>, StoreError> {
            self.inner.container_metrics_by_name(prefix, limit).await
        }
        async fn prune_container_metrics(&self, _cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
            Err(StoreError::Migration("table missing".into()))
        }
        async fn prune_host_metrics(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
            self.inner.prune_host_metrics(cutoff).await
        }
    }

    #[tokio::test]
    async fn test_one_table_failing_does_not_stop_the_other() {
        let store = Arc::new(BrokenContainerTable {
            inner: MemoryStore::new(),
        });
        let now = Utc.with_ymd_and_hms(2024, 6, 20, 0, 0, 0).unwrap();
        store.save_host_metric(&host_at(now - ChronoDuration::days(30))).await.unwrap();

        let health = HealthRegistry::new();
        let sweeper = RetentionSweeper::new(store.clone(), RetentionPolicy::new(7, DEFAULT_CRON).unwrap())
            .with_health(health.clone());
        let report = sweeper.sweep_at(now).await;

        assert!(!report.is_ok());
        assert!(report.containers.is_err());
        assert_eq!(report.hosts.unwrap(), 1);
        assert_eq!(
            health.status_of(components::RETENTION).await,
            Some(crate::health::ComponentStatus::Degraded)
        );
    }

    #[tokio::test]
    async fn test_run_exits_on_shutdown() {
        let store = Arc::new(MemoryStore::new());
        let sweeper = RetentionSweeper::new(store, RetentionPolicy::new(7, DEFAULT_CRON).unwrap());
        let (tx, rx) = broadcast::channel(1);

        let handle = tokio::spawn(sweeper.run(rx));
        tx.send(()).unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
