use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::api;
use crate::state::AppState;
use std::sync::Arc;

pub const HEALTH_PATH: &str = "/";
pub const STATS_PATH: &str = "/stats";

/// Paths owned by the HTTP API; the relay endpoint may not reuse them.
pub const RESERVED_PATHS: &[&str] = &[HEALTH_PATH, STATS_PATH];

/// Create the public HTTP API router
pub fn create_api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route(HEALTH_PATH, get(api::health_check))
        .route(STATS_PATH, get(api::relay_stats))
        .layer(TraceLayer::new_for_http())
}
