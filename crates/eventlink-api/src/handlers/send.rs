//! /send handler — dispatch an application event to peers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use eventlink_services::{SendError, SendTarget};

use super::ApiState;

#[derive(Deserialize)]
pub struct SendRequest {
    #[serde(default)]
    pub target: SendTarget,
    /// Application event name, e.g. "ping".
    pub event: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

#[derive(Serialize)]
pub struct SendResponse {
    pub queued: usize,
}

pub async fn handle_send(
    State(state): State<ApiState>,
    Json(req): Json<SendRequest>,
) -> Result<Json<SendResponse>, (StatusCode, String)> {
    if req.event.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "event name is required".into()));
    }
    match state.manager.send_event(&req.target, &req.event, req.data) {
        Ok(queued) => Ok(Json(SendResponse { queued })),
        Err(e @ SendError::UnknownTarget(_)) => Err((StatusCode::NOT_FOUND, e.to_string())),
        Err(e @ SendError::NoTargets) => Err((StatusCode::BAD_REQUEST, e.to_string())),
        Err(e) => {
            tracing::warn!(error = %e, "send failed");
            Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}
