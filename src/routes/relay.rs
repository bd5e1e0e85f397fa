//! Relay WebSocket route configuration

use axum::{Router, middleware, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::relay::relay_handler;
use crate::middleware::connection_limit_middleware;
use crate::state::AppState;
use std::sync::Arc;

/// Create the relay WebSocket router
///
/// # Endpoint
///
/// `GET {path}` - WebSocket upgrade for the duplex relay
///
/// # Example
///
/// ```json
/// // Client opens the upstream session
/// {"type": "connect", "data": {"voice": "alloy"}}
///
/// // Client streams audio
/// {"type": "append_audio", "data": "<base64 pcm16>"}
///
/// // Server wraps every upstream event
/// {"type": "realtime.event", "event": {"type": "session.created", ...}}
/// ```
///
/// Connection limits are enforced on the upgrade request; the handler
/// releases the slot when the session ends.
pub fn create_relay_router(path: &str, state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route(path, get(relay_handler))
        .layer(middleware::from_fn_with_state(
            state,
            connection_limit_middleware,
        ))
        .layer(TraceLayer::new_for_http())
}
