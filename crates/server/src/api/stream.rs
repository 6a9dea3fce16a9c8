//! Magnet streaming endpoint.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use magnetstream_core::{RelayError, DEFAULT_FILE_INDEX};
use serde::Deserialize;
use tracing::error;

use super::handlers::ErrorResponse;
use crate::state::AppState;

/// Media type announced for every relayed stream.
pub const VIDEO_CONTENT_TYPE: &str = "video/mp4";

/// Response header carrying the session id, usable with `DELETE /api/v1/streams/{id}`.
pub const STREAM_ID_HEADER: &str = "x-stream-id";

#[derive(Debug, Deserialize)]
pub struct StreamParams {
    pub magnet: String,
}

/// GET /stream?magnet=<uri>
///
/// Spawns the helper for the first file of the torrent and streams its
/// stdout as the response body. Failures before the helper is running map to
/// an empty-bodied 5xx; failures afterwards truncate the body.
pub async fn stream_magnet(
    State(state): State<Arc<AppState>>,
    Query(params): Query<StreamParams>,
) -> Response {
    if params.magnet.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("magnet must not be empty")),
        )
            .into_response();
    }

    let stream = match state
        .relay()
        .start_session(&params.magnet, DEFAULT_FILE_INDEX)
        .await
    {
        Ok(stream) => stream,
        Err(e) => return start_error_status(&e).into_response(),
    };

    let session_id = stream.session_id().to_string();
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, VIDEO_CONTENT_TYPE)
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CACHE_CONTROL, "no-store")
        .header(STREAM_ID_HEADER, session_id.as_str())
        .body(Body::from_stream(stream))
        .unwrap_or_else(|e| {
            error!(session_id = %session_id, error = %e, "Failed to build stream response");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        })
}

/// Status for a session that never started streaming.
///
/// Helper launch failures are server errors; a full or draining relay is
/// temporarily unavailable.
pub fn start_error_status(err: &RelayError) -> StatusCode {
    match err {
        e if e.is_start_error() => StatusCode::INTERNAL_SERVER_ERROR,
        RelayError::AtCapacity { .. } | RelayError::ShuttingDown => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
