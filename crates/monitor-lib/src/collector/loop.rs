//! Collection cycle drivers
//!
//! Two independent periodic loops: the container loop, whose cycles are
//! single-flight (a tick arriving while a cycle runs is dropped, never
//! queued), and the host loop, which samples, persists and evaluates
//! thresholds inline on every tick.

use super::{
    normalize, parse_snapshot, resolve_service_name, HostSampler, PolicyHandle, SampleSource,
};
use crate::alert::{AlertReport, ThresholdEvaluator};
use crate::error::{CollectorError, MonitorError, StoreError};
use crate::health::{components, HealthRegistry};
use crate::models::utc_now;
use crate::observability::{drop_reason, MonitorMetrics, StructuredLogger};
use crate::store::MetricsStore;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Configuration for the container collection loop
#[derive(Debug, Clone)]
pub struct CollectionConfig {
    /// Tick interval (default: 60 seconds)
    pub interval: Duration,
    /// Upper bound on one stats source invocation (default: 30 seconds)
    pub collector_timeout: Duration,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            collector_timeout: Duration::from_secs(30),
        }
    }
}

/// Configuration for the host sampling loop
#[derive(Debug, Clone)]
pub struct HostSamplingConfig {
    /// Tick interval (default: 10 seconds)
    pub interval: Duration,
}

impl Default for HostSamplingConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
        }
    }
}

/// Per-record accounting for one completed container cycle
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub persisted: usize,
    pub parse_failures: usize,
    pub filtered: usize,
    pub duplicates: usize,
    pub store_failures: usize,
}

/// What happened when a container cycle was triggered
#[derive(Debug)]
pub enum CycleOutcome {
    /// Another cycle was running; this trigger was dropped
    Skipped,
    /// The stats source failed or timed out; nothing was persisted
    Failed(CollectorError),
    Completed(CycleReport),
}

impl CycleOutcome {
    pub fn is_skipped(&self) -> bool {
        matches!(self, CycleOutcome::Skipped)
    }

    pub fn report(&self) -> Option<&CycleReport> {
        match self {
            CycleOutcome::Completed(report) => Some(report),
            _ => None,
        }
    }
}

/// Releases the busy flag on every exit path, unwinding included
struct InFlightGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// One container collection pass: stats source -> resolver -> normalizer -> store
pub struct ContainerCycle {
    source: Arc<dyn SampleSource>,
    store: Arc<dyn MetricsStore>,
    policy: PolicyHandle,
    collector_timeout: Duration,
    busy: AtomicBool,
    metrics: MonitorMetrics,
    health: Option<HealthRegistry>,
    logger: Option<StructuredLogger>,
}

impl ContainerCycle {
    pub fn new(
        source: Arc<dyn SampleSource>,
        store: Arc<dyn MetricsStore>,
        policy: PolicyHandle,
        collector_timeout: Duration,
    ) -> Self {
        Self {
            source,
            store,
            policy,
            collector_timeout,
            busy: AtomicBool::new(false),
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

    /// Whether a cycle currently holds the busy flag
    pub fn is_running(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Run one cycle unless another one is in flight
    pub async fn run_once(&self) -> CycleOutcome {
        let Some(_guard) = InFlightGuard::acquire(&self.busy) else {
            self.metrics.inc_cycles_skipped();
            match &self.logger {
                Some(logger) => logger.log_cycle_skipped(),
                None => info!("Container cycle still in progress, skipping tick"),
            }
            return CycleOutcome::Skipped;
        };

        let start = Instant::now();
        // One policy snapshot per cycle; a reload applies from the next cycle
        let policy = self.policy.snapshot();

        let text = match tokio::time::timeout(self.collector_timeout, self.source.snapshot()).await
        {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => return self.fail(e).await,
            Err(_) => return self.fail(CollectorError::Timeout(self.collector_timeout)).await,
        };

        let parsed = parse_snapshot(&text);
        let mut report = CycleReport {
            parse_failures: parsed.malformed,
            ..CycleReport::default()
        };
        let timestamp = utc_now();
        let mut seen = HashSet::new();

        for sample in &parsed.samples {
            if !policy.should_monitor(&sample.name) {
                report.filtered += 1;
                continue;
            }

            let service = resolve_service_name(&sample.name);
            if !seen.insert(service) {
                debug!(container = %sample.name, "Service already collected this cycle");
                report.duplicates += 1;
                continue;
            }

            let metric = normalize(sample, timestamp);
            match self.store.save_container_metric(&metric).await {
                Ok(_) => report.persisted += 1,
                Err(e) => {
                    warn!(container = %sample.name, error = %e, "Failed to persist container metric");
                    report.store_failures += 1;
                }
            }
        }

        self.record(&report, start.elapsed()).await;
        CycleOutcome::Completed(report)
    }

    async fn fail(&self, error: CollectorError) -> CycleOutcome {
        warn!(error = %error, "Container collection cycle failed");
        self.metrics.inc_collector_failures();
        if let Some(health) = &self.health {
            health
                .set_degraded(components::CONTAINER_COLLECTOR, error.to_string())
                .await;
        }
        CycleOutcome::Failed(error)
    }

    async fn record(&self, report: &CycleReport, elapsed: Duration) {
        self.metrics.observe_container_cycle(elapsed.as_secs_f64());
        self.metrics.add_container_persisted(report.persisted as u64);
        self.metrics.add_dropped(drop_reason::PARSE, report.parse_failures as u64);
        self.metrics.add_dropped(drop_reason::FILTERED, report.filtered as u64);
        self.metrics.add_dropped(drop_reason::DUPLICATE, report.duplicates as u64);
        self.metrics.add_dropped(drop_reason::STORE, report.store_failures as u64);

        if report.parse_failures > 0 {
            warn!(malformed = report.parse_failures, "Dropped malformed stats records");
        }

        debug!(
            persisted = report.persisted,
            filtered = report.filtered,
            duplicates = report.duplicates,
            elapsed_ms = elapsed.as_millis() as u64,
            "Container collection cycle complete"
        );

        if let Some(health) = &self.health {
            health.set_healthy(components::CONTAINER_COLLECTOR).await;
            if report.store_failures > 0 {
                health
                    .set_degraded(components::STORE, "failed to persist container metrics")
                    .await;
            } else if report.persisted > 0 {
                health.set_healthy(components::STORE).await;
            }
        }
    }
}

/// Periodic driver for [`ContainerCycle`]
pub struct ContainerCollectionLoop {
    cycle: Arc<ContainerCycle>,
    config: CollectionConfig,
}

impl ContainerCollectionLoop {
    pub fn new(cycle: Arc<ContainerCycle>, config: CollectionConfig) -> Self {
        Self { cycle, config }
    }

    pub fn cycle(&self) -> Arc<ContainerCycle> {
        self.cycle.clone()
    }

    /// Tick until shutdown
    ///
    /// Each tick runs its cycle on a separate task so a slow stats source
    /// never delays the ticker; the busy flag turns overlapping ticks into
    /// skips. On shutdown the in-flight cycle is awaited, not aborted.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            timeout_secs = self.config.collector_timeout.as_secs(),
            "Starting container collection loop"
        );

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // Every spawned trigger is tracked; only one of them can hold the busy flag
        let mut cycles: JoinSet<CycleOutcome> = JoinSet::new();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let cycle = self.cycle.clone();
                    cycles.spawn(async move { cycle.run_once().await });
                }
                Some(finished) = cycles.join_next(), if !cycles.is_empty() => {
                    if let Err(e) = finished {
                        warn!(error = %e, "Container cycle task did not complete cleanly");
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down container collection loop");
                    break;
                }
            }
        }

        while let Some(finished) = cycles.join_next().await {
            if let Err(e) = finished {
                warn!(error = %e, "Container cycle task did not complete cleanly");
            }
        }
    }
}

/// Result of one host tick
#[derive(Debug)]
pub struct HostTick {
    /// Row id of the persisted sample, or why it was not written
    pub saved: Result<i64, StoreError>,
    pub alerts: AlertReport,
}

/// Periodic host sampler: sample -> persist -> evaluate thresholds
pub struct HostCollectionLoop {
    sampler: Arc<dyn HostSampler>,
    store: Arc<dyn MetricsStore>,
    evaluator: Option<Arc<ThresholdEvaluator>>,
    config: HostSamplingConfig,
    metrics: MonitorMetrics,
    health: Option<HealthRegistry>,
}

impl HostCollectionLoop {
    pub fn new(
        sampler: Arc<dyn HostSampler>,
        store: Arc<dyn MetricsStore>,
        config: HostSamplingConfig,
    ) -> Self {
        Self {
            sampler,
            store,
            evaluator: None,
            config,
            metrics: MonitorMetrics::new(),
            health: None,
        }
    }

    pub fn with_evaluator(mut self, evaluator: Arc<ThresholdEvaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    /// One host tick
    ///
    /// The sample is taken on the blocking pool. A failed write is logged and
    /// returned, but thresholds are still evaluated against the sample.
    pub async fn run_once(&self) -> Result<HostTick, CollectorError> {
        let start = Instant::now();
        let sampler = self.sampler.clone();
        let metric = match tokio::task::spawn_blocking(move || sampler.sample()).await {
            Ok(metric) => metric,
            Err(e) => {
                warn!(error = %e, "Host sampler did not return a sample");
                if let Some(health) = &self.health {
                    health
                        .set_degraded(components::HOST_SAMPLER, e.to_string())
                        .await;
                }
                return Err(CollectorError::Sampler(e.to_string()));
            }
        };

        let saved = self.store.save_host_metric(&metric).await;
        match &saved {
            Ok(_) => self.metrics.inc_host_persisted(),
            Err(e) => warn!(error = %e, "Failed to persist host metric"),
        }

        let alerts = match &self.evaluator {
            Some(evaluator) => evaluator.evaluate(&metric).await,
            None => AlertReport::default(),
        };

        self.metrics.observe_host_sample(start.elapsed().as_secs_f64());

        if let Some(health) = &self.health {
            health.set_healthy(components::HOST_SAMPLER).await;
            match &saved {
                Ok(_) => health.set_healthy(components::STORE).await,
                Err(e) => health.set_degraded(components::STORE, e.to_string()).await,
            }
            if alerts.is_ok() {
                health.set_healthy(components::ALERTING).await;
            } else {
                health
                    .set_degraded(components::ALERTING, "alert delivery failed")
                    .await;
            }
        }

        Ok(HostTick { saved, alerts })
    }

    /// Tick until shutdown; the current tick always completes first
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            alerts = self.evaluator.is_some(),
            "Starting host sampling loop"
        );

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let _ = self.run_once().await;
                }
                _ = shutdown.recv() => {
                    info!("Shutting down host sampling loop");
                    break;
                }
            }
        }
    }
}

/// Builder for the container collection loop
pub struct CollectionLoopBuilder {
    source: Option<Arc<dyn SampleSource>>,
    store: Option<Arc<dyn MetricsStore>>,
    policy: PolicyHandle,
    config: CollectionConfig,
    health: Option<HealthRegistry>,
    logger: Option<StructuredLogger>,
}

impl CollectionLoopBuilder {
    pub fn new() -> Self {
        Self {
            source: None,
            store: None,
            policy: PolicyHandle::default(),
            config: CollectionConfig::default(),
            health: None,
            logger: None,
        }
    }

    /// Set the stats source
    pub fn source(mut self, source: Arc<dyn SampleSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Set the metric store
    pub fn store(mut self, store: Arc<dyn MetricsStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Share a policy handle so reloads reach the loop
    pub fn policy(mut self, policy: PolicyHandle) -> Self {
        self.policy = policy;
        self
    }

    pub fn config(mut self, config: CollectionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    pub fn collector_timeout(mut self, timeout: Duration) -> Self {
        self.config.collector_timeout = timeout;
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn build(self) -> Result<ContainerCollectionLoop, MonitorError> {
        let source = self
            .source
            .ok_or_else(|| MonitorError::Config("sample source is required".into()))?;
        let store = self
            .store
            .ok_or_else(|| MonitorError::Config("metric store is required".into()))?;
        if self.config.interval.is_zero() {
            return Err(MonitorError::Config(
                "container interval must be positive".into(),
            ));
        }

        let mut cycle = ContainerCycle::new(source, store, self.policy, self.config.collector_timeout);
        if let Some(health) = self.health {
            cycle = cycle.with_health(health);
        }
        if let Some(logger) = self.logger {
            cycle = cycle.with_logger(logger);
        }

        Ok(ContainerCollectionLoop::new(Arc::new(cycle), self.config))
    }
}

impl Default for CollectionLoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use async_trait::async_trait;

    struct EmptySource;

    #[async_trait]
    impl SampleSource for EmptySource {
        async fn snapshot(&self) -> Result<String, CollectorError> {
            Ok(String::new())
        }
    }

    #[test]
    fn test_config_defaults() {
        assert_eq!(CollectionConfig::default().interval, Duration::from_secs(60));
        assert_eq!(
            CollectionConfig::default().collector_timeout,
            Duration::from_secs(30)
        );
        assert_eq!(HostSamplingConfig::default().interval, Duration::from_secs(10));
    }

    #[test]
    fn test_guard_releases_flag_on_drop() {
        let flag = AtomicBool::new(false);
        {
            let _guard = InFlightGuard::acquire(&flag).unwrap();
            assert!(flag.load(Ordering::Acquire));
            assert!(InFlightGuard::acquire(&flag).is_none());
        }
        assert!(!flag.load(Ordering::Acquire));
        assert!(InFlightGuard::acquire(&flag).is_some());
    }

    #[test]
    fn test_guard_released_when_holder_panics() {
        let flag = AtomicBool::new(false);
        let result = std::panic::catch_unwind(|| {
            let _guard = InFlightGuard::acquire(&flag).unwrap();
            panic!("cycle blew up");
        });

        assert!(result.is_err());
        assert!(!flag.load(Ordering::Acquire));
    }

    #[test]
    fn test_builder_missing_source() {
        let result = CollectionLoopBuilder::new()
            .store(Arc::new(MemoryStore::new()))
            .build();

        assert!(matches!(result, Err(MonitorError::Config(_))));
    }

    #[test]
    fn test_builder_missing_store() {
        let result = CollectionLoopBuilder::new()
            .source(Arc::new(EmptySource))
            .build();

        assert!(result.is_err());
    }

    #[test]
    fn test_builder_rejects_zero_interval() {
        let result = CollectionLoopBuilder::new()
            .source(Arc::new(EmptySource))
            .store(Arc::new(MemoryStore::new()))
            .interval(Duration::ZERO)
            .build();

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_empty_snapshot_completes_with_nothing_persisted() {
        let collection_loop = CollectionLoopBuilder::new()
            .source(Arc::new(EmptySource))
            .store(Arc::new(MemoryStore::new()))
            .build()
            .unwrap();

        let outcome = collection_loop.cycle().run_once().await;

        assert_eq!(outcome.report(), Some(&CycleReport::default()));
        assert!(!collection_loop.cycle().is_running());
    }
}
