//! Health and status endpoints.

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::AppState;

/// `GET /health`
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

/// `GET /status`: operational counters.
pub async fn server_status(State(state): State<AppState>) -> Json<Value> {
    let snapshot = state.status.snapshot();
    Json(json!({
        "status": "running",
        "pipeline_active": snapshot.running,
        "connected_clients": state.events.client_count(),
        "model_path": state.model_path,
        "draft_recording": state.store.is_some(),
        "counters": snapshot,
    }))
}
