//! Operational endpoints of the scorer
//!
//! - `/healthz` reports the source, forecaster, sink and orchestrator
//!   components. A degraded run (some partitions failed) still answers 200.
//! - `/readyz` answers 200 once a scoring run has loaded its on-demand and
//!   advisory reference data, and drops back to 503 while any component is
//!   unhealthy.
//! - `/metrics` exposes the `spot_scorer_*` Prometheus families.

use anyhow::Context;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use scoring_lib::{
    health::{ComponentStatus, HealthRegistry},
    observability::ScoringMetrics,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

pub const HEALTH_PATH: &str = "/healthz";
pub const READY_PATH: &str = "/readyz";
pub const METRICS_PATH: &str = "/metrics";

/// State shared with the handlers
///
/// The registry is the one the orchestrator reports into; the metrics
/// handle keeps the scorer's families registered with the default registry.
#[derive(Clone)]
pub struct ScorerState {
    pub health: HealthRegistry,
    pub metrics: ScoringMetrics,
}

impl ScorerState {
    pub fn new(health: HealthRegistry, metrics: ScoringMetrics) -> Self {
        Self { health, metrics }
    }
}

async fn healthz(State(state): State<Arc<ScorerState>>) -> impl IntoResponse {
    let health = state.health.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

async fn readyz(State(state): State<Arc<ScorerState>>) -> impl IntoResponse {
    let readiness = state.health.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Text exposition of every registered family; an encoding failure is a 500
async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let content_type = [(header::CONTENT_TYPE, encoder.format_type().to_string())];
    let mut buffer = Vec::new();

    match encoder.encode(&prometheus::gather(), &mut buffer) {
        Ok(()) => (StatusCode::OK, content_type, buffer),
        Err(e) => {
            error!(error = %e, "Failed to encode scorer metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, content_type, Vec::new())
        }
    }
}

pub fn create_router(state: Arc<ScorerState>) -> Router {
    Router::new()
        .route(HEALTH_PATH, get(healthz))
        .route(READY_PATH, get(readyz))
        .route(METRICS_PATH, get(metrics))
        .with_state(state)
}

/// Serve the operational endpoints on all interfaces until aborted
pub async fn serve(port: u16, state: Arc<ScorerState>) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind scorer API on {}", addr))?;
    info!(addr = %addr, "Scorer API listening");

    axum::serve(listener, create_router(state))
        .await
        .context("Scorer API stopped")?;
    Ok(())
}
