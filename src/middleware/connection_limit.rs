//! Session admission for the relay endpoint.
//!
//! Every relay WebSocket holds one slot in the [`AppState`] counters from the
//! upgrade request until its session ends. The slot is taken here and handed
//! to the handler as a [`ClientIp`] extension; the handler gives it back.
//! Plain HTTP requests on the same router are never counted.
//!
//! Refusals carry an `error` envelope body so a browser that inspects the
//! failed upgrade sees the same shape as an in-session error.

use axum::{
    Json,
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use crate::core::envelope::ServerEnvelope;
use crate::state::{AppState, ConnectionLimitError};

/// Address whose slot the relay handler must release.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClientIp(pub IpAddr);

/// Admit or refuse a relay upgrade.
///
/// Global cap reached: 503 with code `server_at_capacity`. Per-IP cap
/// reached: 429 with code `too_many_sessions`.
pub async fn connection_limit_middleware(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    if !is_websocket_upgrade(&request) {
        return next.run(request).await;
    }

    let ip = addr.ip();
    if let Err(limit) = state.try_acquire_connection(ip) {
        return refuse(&state, ip, limit);
    }

    tracing::debug!(ip = %ip, active = state.ws_connection_count(), "Relay slot reserved");
    request.extensions_mut().insert(ClientIp(ip));
    next.run(request).await
}

fn refuse(state: &AppState, ip: IpAddr, limit: ConnectionLimitError) -> Response {
    let (status, code, message) = match limit {
        ConnectionLimitError::GlobalLimitReached => (
            StatusCode::SERVICE_UNAVAILABLE,
            "server_at_capacity",
            "Relay is at capacity. Please try again later.".to_string(),
        ),
        ConnectionLimitError::PerIpLimitReached => (
            StatusCode::TOO_MANY_REQUESTS,
            "too_many_sessions",
            format!(
                "At most {} relay sessions are allowed per address.",
                state.config.max_connections_per_ip
            ),
        ),
    };

    tracing::warn!(
        ip = %ip,
        active = state.ws_connection_count(),
        code,
        "Refusing relay session"
    );
    (status, Json(ServerEnvelope::error(code, message))).into_response()
}

fn is_websocket_upgrade(request: &Request<Body>) -> bool {
    request
        .headers()
        .get("upgrade")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
}
