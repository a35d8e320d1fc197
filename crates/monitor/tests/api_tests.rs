//! Integration tests for the health and metrics endpoints

#[path = "../src/api.rs"]
#[allow(dead_code)]
mod api;

use api::{create_router, AppState};
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use monitor_lib::{
    health::{components, HealthRegistry},
    observability::MonitorMetrics,
};
use std::sync::Arc;
use tower::ServiceExt;

async fn setup_test_app() -> (Router, Arc<AppState>) {
    let health_registry = HealthRegistry::new();
    health_registry.register_all().await;

    let state = Arc::new(AppState::new(health_registry, MonitorMetrics::new()));
    let router = create_router(state.clone());

    (router, state)
}

async fn get(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

#[tokio::test]
async fn test_healthz_returns_ok_when_healthy() {
    let (app, _state) = setup_test_app().await;

    let (status, body) = get(app, "/healthz").await;

    assert_eq!(status, StatusCode::OK);
    let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "healthy");
}

#[tokio::test]
async fn test_healthz_returns_ok_when_collector_degraded() {
    let (app, state) = setup_test_app().await;
    state
        .health_registry
        .set_degraded(components::CONTAINER_COLLECTOR, "docker stats exited 1")
        .await;

    let (status, body) = get(app, "/healthz").await;

    assert_eq!(status, StatusCode::OK);
    let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "degraded");
    assert_eq!(
        health["components"][components::CONTAINER_COLLECTOR]["message"],
        "docker stats exited 1"
    );
}

#[tokio::test]
async fn test_healthz_returns_503_when_unhealthy() {
    let (app, state) = setup_test_app().await;
    state
        .health_registry
        .set_unhealthy(components::STORE, "database is locked")
        .await;

    let (status, _) = get(app, "/healthz").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_readyz_returns_503_before_store_ready() {
    let (app, _state) = setup_test_app().await;

    let (status, body) = get(app, "/readyz").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let readiness: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(readiness["ready"], false);
    assert!(readiness["reason"].is_string());
}

#[tokio::test]
async fn test_readyz_returns_ok_when_ready() {
    let (app, state) = setup_test_app().await;
    state.health_registry.set_ready(true).await;

    let (status, body) = get(app, "/readyz").await;

    assert_eq!(status, StatusCode::OK);
    let readiness: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(readiness["ready"], true);
    assert!(readiness.get("reason").is_none());
}

#[tokio::test]
async fn test_readyz_returns_503_when_ready_but_unhealthy() {
    let (app, state) = setup_test_app().await;
    state.health_registry.set_ready(true).await;
    state
        .health_registry
        .set_unhealthy(components::STORE, "disk full")
        .await;

    let (status, _) = get(app, "/readyz").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_metrics_endpoint_returns_prometheus_format() {
    let (app, state) = setup_test_app().await;
    state.metrics.inc_cycles_skipped();
    state.metrics.observe_container_cycle(0.2);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()["content-type"].to_str().unwrap();
    assert!(content_type.starts_with("text/plain"));

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("# TYPE monitor_container_cycles_skipped_total counter"));
    assert!(text.contains("monitor_container_cycle_seconds_bucket"));
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let (app, _state) = setup_test_app().await;

    let (status, _) = get(app, "/api/metrics").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}
