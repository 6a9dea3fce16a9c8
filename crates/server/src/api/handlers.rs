use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use magnetstream_core::Config;
use serde::Serialize;
use std::sync::Arc;

use crate::metrics::encode_metrics;
use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub active_streams: usize,
    pub max_concurrent_streams: usize,
    pub available_slots: usize,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

/// GET /api/v1/health
///
/// Reports `shutting_down` once stream admission is closed.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let relay = state.relay();
    let status = if relay.is_shutting_down() {
        "shutting_down"
    } else {
        "ok"
    };
    Json(HealthResponse {
        status: status.to_string(),
        active_streams: relay.active_sessions().await,
        max_concurrent_streams: relay.max_concurrent_streams(),
        available_slots: relay.available_slots(),
    })
}

/// GET /api/v1/config
pub async fn get_config(State(state): State<Arc<AppState>>) -> Json<Config> {
    Json(state.config().clone())
}

/// GET /metrics
///
/// Prometheus text exposition format.
pub async fn metrics() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
        encode_metrics(),
    )
}
