//! API route definitions

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};

use super::shared::{SharedStateHandle, StatusResponse};
use super::websocket::ws_handler;
use crate::tracking::{Command, TrackingEvent};

/// Create the API router with all endpoints
pub fn create_router(state: SharedStateHandle) -> Router {
    Router::new()
        .route("/", get(|| async { "Gaze tracking server running" }))
        .route("/api/status", get(status_handler))
        .route("/api/devices", get(devices_handler))
        .route("/api/commands", post(command_handler))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

async fn status_handler(State(state): State<SharedStateHandle>) -> Json<StatusResponse> {
    Json(state.status())
}

async fn devices_handler(State(state): State<SharedStateHandle>) -> Json<TrackingEvent> {
    Json(state.device_list_event())
}

/// Queue a command; results arrive as events on `/ws`
async fn command_handler(
    State(state): State<SharedStateHandle>,
    Json(cmd): Json<Command>,
) -> (StatusCode, Json<serde_json::Value>) {
    let name = cmd.name();
    match state.send_command(cmd) {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "message": "Command queued", "command": name })),
        ),
        Err(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "error": "Control loop is not running" })),
        ),
    }
}
