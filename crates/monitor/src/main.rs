//! Monitor Agent - telemetry ingestion and alerting daemon
//!
//! Samples container stats and host metrics on independent intervals,
//! persists them, fires threshold alerts and prunes old rows on a cron
//! schedule.

use anyhow::{Context, Result};
use monitor_lib::{
    alert::{ThresholdEvaluator, WebhookDispatcher},
    collector::{
        CollectionLoopBuilder, DockerStatsSource, HostCollectionLoop, PolicyHandle,
        SysinfoHostSampler,
    },
    health::HealthRegistry,
    observability::{MonitorMetrics, StructuredLogger},
    retention::RetentionSweeper,
    store::{MemoryStore, MetricsStore, SqliteStore},
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

use config::MonitorConfig;

const MONITOR_VERSION: &str = env!("CARGO_PKG_VERSION");
const IN_MEMORY: &str = ":memory:";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let config = MonitorConfig::load()?;
    info!(host = %config.host_name, database_path = %config.database_path, "Monitor configured");

    let health_registry = HealthRegistry::new();
    health_registry.register_all().await;

    let metrics = MonitorMetrics::new();
    let logger = StructuredLogger::new(&config.host_name);
    logger.log_startup(MONITOR_VERSION, &config.database_path);

    // Nothing runs against a half-initialized store
    let store: Arc<dyn MetricsStore> = if config.database_path == IN_MEMORY {
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(
            SqliteStore::open(&config.database_path)
                .await
                .context("failed to initialize metric store")?,
        )
    };
    let retention_policy = config
        .retention_policy()
        .context("invalid retention schedule")?;
    health_registry.set_ready(true).await;

    let (shutdown_tx, _) = broadcast::channel::<()>(4);
    let policy = PolicyHandle::new(config.monitoring_policy());

    let container_loop = CollectionLoopBuilder::new()
        .source(Arc::new(DockerStatsSource::new()))
        .store(store.clone())
        .policy(policy.clone())
        .config(config.collection_config())
        .health(health_registry.clone())
        .logger(logger.clone())
        .build()?;

    let mut host_loop = HostCollectionLoop::new(
        Arc::new(SysinfoHostSampler::new()),
        store.clone(),
        config.host_sampling_config(),
    )
    .with_health(health_registry.clone());

    let thresholds = config.alert_thresholds();
    if thresholds.is_enabled() {
        let dispatcher = Arc::new(WebhookDispatcher::new(thresholds.callback_url.clone()));
        let evaluator = ThresholdEvaluator::new(thresholds, dispatcher)
            .with_timeout(config.alert_timeout())
            .with_logger(logger.clone());
        host_loop = host_loop.with_evaluator(Arc::new(evaluator));
    } else {
        info!("No alert thresholds configured, alerting disabled");
    }

    let sweeper = RetentionSweeper::new(store.clone(), retention_policy)
        .with_health(health_registry.clone())
        .with_logger(logger.clone());

    let app_state = Arc::new(api::AppState::new(health_registry.clone(), metrics));

    let mut tasks = vec![
        tokio::spawn(container_loop.run(shutdown_tx.subscribe())),
        tokio::spawn(host_loop.run(shutdown_tx.subscribe())),
        tokio::spawn(sweeper.run(shutdown_tx.subscribe())),
    ];
    #[cfg(unix)]
    tasks.push(tokio::spawn(reload_policy_on_hangup(
        policy,
        logger.clone(),
        shutdown_tx.subscribe(),
    )));

    let api_handle = tokio::spawn(api::serve(
        config.api_port,
        app_state,
        shutdown_tx.subscribe(),
    ));

    let reason = wait_for_shutdown().await;
    logger.log_shutdown(reason);
    health_registry.set_ready(false).await;
    // Receivers may already be gone if a loop exited early
    let _ = shutdown_tx.send(());

    for task in tasks {
        if let Err(e) = task.await {
            warn!(error = %e, "Background task ended abnormally");
        }
    }
    match api_handle.await {
        Ok(Err(e)) => warn!(error = %e, "API server failed"),
        Err(e) => warn!(error = %e, "API server task ended abnormally"),
        Ok(Ok(())) => {}
    }

    info!("Shutdown complete");
    Ok(())
}

/// Resolves on SIGINT, or SIGTERM on unix
async fn wait_for_shutdown() -> &'static str {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => "SIGINT received",
                    _ = terminate.recv() => "SIGTERM received",
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                "SIGINT received"
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        "SIGINT received"
    }
}

/// Re-read configuration on SIGHUP and swap in the new monitoring policy
///
/// Only the include/exclude lists are reloaded; every other setting needs a
/// restart.
#[cfg(unix)]
async fn reload_policy_on_hangup(
    policy: PolicyHandle,
    logger: StructuredLogger,
    mut shutdown: broadcast::Receiver<()>,
) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(hangup) => hangup,
        Err(e) => {
            warn!(error = %e, "Failed to install SIGHUP handler, policy reload disabled");
            return;
        }
    };

    loop {
        tokio::select! {
            received = hangup.recv() => {
                if received.is_none() {
                    break;
                }
                match MonitorConfig::load() {
                    Ok(config) => {
                        let next = config.monitoring_policy();
                        logger.log_policy_reloaded(next.include.len(), next.exclude.len());
                        policy.replace(next);
                    }
                    Err(e) => warn!(error = %e, "Failed to reload configuration, keeping current policy"),
                }
            }
            _ = shutdown.recv() => break,
        }
    }
}
