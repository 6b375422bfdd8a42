//! Metrics endpoints for monitoring.

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;
use tally_common::metrics::MetricsSnapshot;

use crate::middleware::AppState;

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

async fn get_metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}

/// Liveness only; store health shows up as 503s on the real endpoints.
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(get_metrics))
        .route("/health", get(health_check))
}
