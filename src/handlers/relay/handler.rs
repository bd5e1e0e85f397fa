//! Relay WebSocket handler
//!
//! Upgrades browser connections and runs one [`RelaySession`] per socket,
//! bridging it to the upstream realtime provider.

use axum::{
    Extension,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant, sleep_until, timeout};
use tracing::{debug, error, info, warn};

use crate::core::envelope::ServerEnvelope;
use crate::middleware::ClientIp;
use crate::state::AppState;

use super::messages::RelayMessageRoute;
use super::session::{RelaySession, SessionFlow};

/// Buffer between the session and the socket writer
const CHANNEL_BUFFER_SIZE: usize = 1024;

/// Maximum WebSocket frame size (10 MB)
const MAX_WS_FRAME_SIZE: usize = 10 * 1024 * 1024;

/// Maximum WebSocket message size (10 MB)
const MAX_WS_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// How long the writer gets to flush the final frames
const SENDER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Returns the connection slot taken by the connection limit middleware.
struct ConnectionRelease {
    state: Arc<AppState>,
    ip: Option<ClientIp>,
}

impl Drop for ConnectionRelease {
    fn drop(&mut self) {
        if let Some(ClientIp(ip)) = self.ip {
            self.state.release_connection(ip);
        }
    }
}

/// Relay WebSocket handler
///
/// Upgrades the HTTP connection to the duplex relay protocol. The upstream
/// credential never comes from the client; it is read from server config.
///
/// # Arguments
/// * `ws` - The WebSocket upgrade request from Axum
/// * `state` - Application state containing configuration and the upstream factory
/// * `client_ip` - Set by the connection limit middleware when it reserved a slot
pub async fn relay_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    client_ip: Option<Extension<ClientIp>>,
) -> Response {
    let release = ConnectionRelease {
        state: state.clone(),
        ip: client_ip.map(|Extension(ip)| ip),
    };

    info!(ip = ?release.ip.map(|ClientIp(ip)| ip), "Relay WebSocket upgrade requested");

    ws.max_frame_size(MAX_WS_FRAME_SIZE)
        .max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_relay_socket(socket, state, release))
}

async fn handle_relay_socket(socket: WebSocket, app_state: Arc<AppState>, release: ConnectionRelease) {
    let (mut sender, mut receiver) = socket.split();
    let (message_tx, mut message_rx) = mpsc::channel::<RelayMessageRoute>(CHANNEL_BUFFER_SIZE);

    // Sender task for outgoing messages
    let mut sender_task = tokio::spawn(async move {
        while let Some(route) = message_rx.recv().await {
            let should_close = matches!(route, RelayMessageRoute::Close);

            let result = match route {
                RelayMessageRoute::Outgoing(envelope) => match serde_json::to_string(&envelope) {
                    Ok(json_str) => sender.send(Message::Text(json_str.into())).await,
                    Err(e) => {
                        error!("Failed to serialize outgoing envelope: {}", e);
                        continue;
                    }
                },
                RelayMessageRoute::Close => sender.send(Message::Close(None)).await,
            };

            if let Err(e) = result {
                debug!("Failed to send relay WebSocket message: {}", e);
                break;
            }

            if should_close {
                break;
            }
        }
    });

    let (mut session, mut upstream_rx) = RelaySession::new(
        app_state.realtime_factory.clone(),
        app_state.realtime_config(),
        app_state.config.queue_limit,
        message_tx.clone(),
    );
    let session_id = session.id();
    info!(session_id = %session_id, "Relay session accepted");

    let idle_timeout = app_state.config.idle_timeout();
    let mut last_activity = Instant::now();

    loop {
        let flow = tokio::select! {
            msg_result = receiver.next() => {
                last_activity = Instant::now();

                match msg_result {
                    Some(Ok(Message::Text(text))) => session.handle_client_text(&text).await,
                    Some(Ok(Message::Binary(data))) => session.handle_client_audio(&data).await,
                    // axum answers pings itself
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => SessionFlow::Continue,
                    Some(Ok(Message::Close(_))) | None => {
                        info!(session_id = %session_id, "Relay client disconnected");
                        SessionFlow::Close
                    }
                    Some(Err(e)) => {
                        warn!(session_id = %session_id, "Relay WebSocket error: {}", e);
                        SessionFlow::Close
                    }
                }
            }
            Some(event) = upstream_rx.recv() => session.handle_upstream_event(event).await,
            result = session.wait_connect() => session.on_upstream_connected(result).await,
            _ = sleep_until(last_activity + idle_timeout) => {
                warn!(
                    session_id = %session_id,
                    idle_secs = idle_timeout.as_secs(),
                    "Relay session idle, closing"
                );
                let _ = message_tx
                    .send(RelayMessageRoute::Outgoing(ServerEnvelope::error(
                        "idle_timeout",
                        "Connection closed due to inactivity",
                    )))
                    .await;
                SessionFlow::Close
            }
        };

        if flow == SessionFlow::Close {
            break;
        }
    }

    session.teardown().await;

    let _ = message_tx.send(RelayMessageRoute::Close).await;
    drop(message_tx);
    drop(session);

    if timeout(SENDER_DRAIN_TIMEOUT, &mut sender_task).await.is_err() {
        debug!(session_id = %session_id, "Relay writer did not drain in time");
        sender_task.abort();
    }

    drop(release);
    info!(session_id = %session_id, "Relay session closed");
}
