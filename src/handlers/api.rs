use axum::{Json, extract::State};
use serde_json::{Value, json};
use std::sync::Arc;

use crate::state::AppState;

/// Health check handler
pub async fn health_check() -> Json<Value> {
    Json(json!({ "status": "OK" }))
}

/// Current relay session counts
pub async fn relay_stats(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "active_sessions": state.ws_connection_count(),
        "max_sessions": state.config.max_websocket_connections,
        "max_sessions_per_ip": state.config.max_connections_per_ip,
    }))
}
