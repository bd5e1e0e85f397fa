use axum::Router;
use std::sync::Arc;

use crate::state::AppState;

pub mod api;
pub mod relay;

/// Combine the public API and relay routes around `state`.
///
/// Cross-cutting layers (CORS, security headers) are added by the binary.
pub fn create_app(state: Arc<AppState>) -> Router {
    let relay_path = state.config.relay_path.clone();

    api::create_api_router()
        .merge(relay::create_relay_router(&relay_path, state.clone()))
        .with_state(state)
}
