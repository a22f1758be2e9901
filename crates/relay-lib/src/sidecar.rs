// ============================
// crates/relay-lib/src/sidecar.rs
// ============================
//! HTTP sidecar endpoints.
//!
//! The web backend records focus scores to its own database and then pushes
//! them into the relay's broadcast path with a one-shot `POST
//! /broadcast-focus`, without holding a WebSocket connection. The call
//! converges on the same clamp + upsert + teacher fan-out logic as the
//! in-band `focus_update` message. Broadcasting into a meeting with no room
//! (nobody connected) is a silent no-op, not an error.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::RelayError;
use crate::handlers;
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastFocusRequest {
    pub meeting_id: Option<i64>,
    pub student_id: Option<i64>,
    pub focus_score: Option<f64>,
    pub user_name: Option<String>,
    /// Milliseconds since the Unix epoch; stamped by the relay when absent.
    pub timestamp: Option<i64>,
}

/// `POST /broadcast-focus`
pub async fn broadcast_focus(
    State(state): State<Arc<AppState>>,
    body: Result<Json<BroadcastFocusRequest>, JsonRejection>,
) -> Result<Json<Value>, RelayError> {
    let Json(req) = body.map_err(|rejection| RelayError::BadRequest(rejection.body_text()))?;
    let meeting_id = req.meeting_id.ok_or(RelayError::MissingField("meetingId"))?;
    let student_id = req.student_id.ok_or(RelayError::MissingField("studentId"))?;
    let focus_score = req
        .focus_score
        .ok_or(RelayError::MissingField("focusScore"))?;

    metrics::counter!(crate::metrics::SIDECAR_FOCUS).increment(1);
    tracing::debug!(meeting_id, student_id, focus_score, "sidecar focus update");

    handlers::handle_focus_update(
        &state,
        None,
        meeting_id,
        student_id,
        req.user_name.as_deref(),
        focus_score,
        req.timestamp,
    );

    Ok(Json(json!({ "status": "success" })))
}

/// `GET /health`
pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "OK",
        "uptime": state.uptime_secs(),
    }))
}
