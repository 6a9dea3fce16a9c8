//! Active stream session endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use magnetstream_core::{RelayError, SessionInfo};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use super::handlers::ErrorResponse;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct StreamListResponse {
    pub streams: Vec<SessionInfo>,
    pub count: usize,
}

/// GET /api/v1/streams
pub async fn list_streams(State(state): State<Arc<AppState>>) -> Json<StreamListResponse> {
    let streams = state.relay().sessions().await;
    let count = streams.len();
    Json(StreamListResponse { streams, count })
}

/// DELETE /api/v1/streams/{id}
///
/// Terminates the helper; the client's response body ends early.
pub async fn cancel_stream(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, (StatusCode, Json<ErrorResponse>)> {
    match state.relay().cancel_session(&id).await {
        Ok(()) => {
            info!(session_id = %id, "Stream cancelled via API");
            Ok(StatusCode::NO_CONTENT)
        }
        Err(e @ RelayError::SessionNotFound(_)) => Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new(e.to_string())),
        )),
        Err(e) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new(e.to_string())),
        )),
    }
}
