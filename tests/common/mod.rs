//! Shared helpers for the integration tests: a mock upstream Realtime
//! server and a relay server bound to a random port.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, accept_hdr_async, connect_async};

use waav_relay::{ServerConfig, routes, state::AppState};

pub type ClientSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Find an available port for testing
pub fn find_available_port() -> u16 {
    let listener =
        std::net::TcpListener::bind("127.0.0.1:0").expect("Failed to bind to random port");
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

// =============================================================================
// Mock upstream
// =============================================================================

/// A stand-in for the OpenAI Realtime endpoint.
///
/// Every accepted connection is greeted with `session.created`. Events the
/// relay sends are collected on `received`; the test pushes events back
/// through [`MockUpstream::send`], which targets the latest connection.
pub struct MockUpstream {
    pub addr: SocketAddr,
    pub connections: Arc<AtomicUsize>,
    pub disconnects: Arc<AtomicUsize>,
    pub authorization: Arc<Mutex<Vec<String>>>,
    received: mpsc::UnboundedReceiver<Value>,
    outbound: Arc<Mutex<Option<mpsc::UnboundedSender<Option<String>>>>>,
}

impl MockUpstream {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let connections = Arc::new(AtomicUsize::new(0));
        let disconnects = Arc::new(AtomicUsize::new(0));
        let authorization = Arc::new(Mutex::new(Vec::new()));
        let outbound = Arc::new(Mutex::new(None));
        let (received_tx, received) = mpsc::unbounded_channel();

        let accept_connections = connections.clone();
        let accept_disconnects = disconnects.clone();
        let accept_authorization = authorization.clone();
        let accept_outbound = outbound.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let n = accept_connections.fetch_add(1, Ordering::SeqCst) + 1;
                let (tx, rx) = mpsc::unbounded_channel();
                *accept_outbound.lock() = Some(tx);
                let disconnects = accept_disconnects.clone();
                let serve = serve_upstream(
                    stream,
                    n,
                    accept_authorization.clone(),
                    received_tx.clone(),
                    rx,
                );
                tokio::spawn(async move {
                    serve.await;
                    disconnects.fetch_add(1, Ordering::SeqCst);
                });
            }
        });

        Self {
            addr,
            connections,
            disconnects,
            authorization,
            received,
            outbound,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}/v1/realtime", self.addr)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    /// Send a raw event to the latest connection.
    pub fn send(&self, event: Value) {
        if let Some(tx) = self.outbound.lock().as_ref() {
            let _ = tx.send(Some(event.to_string()));
        }
    }

    /// Close the latest connection from the server side.
    pub fn close(&self) {
        if let Some(tx) = self.outbound.lock().take() {
            let _ = tx.send(None);
        }
    }

    /// Next event the relay sent upstream.
    pub async fn recv(&mut self) -> Value {
        timeout(RECV_TIMEOUT, self.received.recv())
            .await
            .expect("timed out waiting for upstream event")
            .expect("mock upstream stopped")
    }

    /// Next event of the given type, skipping others.
    pub async fn recv_type(&mut self, kind: &str) -> Value {
        loop {
            let event = self.recv().await;
            if event["type"] == kind {
                return event;
            }
        }
    }
}

async fn serve_upstream(
    stream: TcpStream,
    n: usize,
    authorization: Arc<Mutex<Vec<String>>>,
    received: mpsc::UnboundedSender<Value>,
    mut outbound: mpsc::UnboundedReceiver<Option<String>>,
) {
    let record_auth = authorization.clone();
    let callback = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        if let Some(value) = request
            .headers()
            .get("authorization")
            .and_then(|v| v.to_str().ok())
        {
            record_auth.lock().push(value.to_string());
        }
        Ok(response)
    };

    let Ok(ws) = accept_hdr_async(stream, callback).await else {
        return;
    };
    let (mut write, mut read) = ws.split();

    let created = json!({
        "type": "session.created",
        "event_id": format!("evt_created_{n}"),
        "session": { "id": format!("sess_{n}"), "model": "gpt-4o-realtime-preview" }
    });
    if write.send(Message::Text(created.to_string().into())).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if let Ok(value) = serde_json::from_str::<Value>(&text) {
                        let _ = received.send(value);
                    }
                }
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
            out = outbound.recv() => match out {
                Some(Some(text)) => {
                    if write.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Some(None) | None => {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
            },
        }
    }
}

// =============================================================================
// Relay server
// =============================================================================

pub fn relay_config(upstream_url: &str) -> ServerConfig {
    let mut config = ServerConfig::default();
    config.host = "127.0.0.1".to_string();
    config.port = 0;
    config.openai_api_key = Some("sk-relay-test".to_string());
    config.upstream_url = upstream_url.to_string();
    config
}

/// Serve the relay on a random port.
pub async fn spawn_relay(config: ServerConfig) -> (SocketAddr, Arc<AppState>) {
    let state = AppState::new(config).await;
    let app = routes::create_app(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let _ = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await;
    });

    (addr, state)
}

pub fn relay_url(addr: SocketAddr) -> String {
    format!("ws://{addr}/relay")
}

pub async fn connect_client(addr: SocketAddr) -> ClientSocket {
    let (ws, _) = connect_async(relay_url(addr)).await.unwrap();
    ws
}

pub async fn send_json(ws: &mut ClientSocket, value: Value) {
    ws.send(Message::Text(value.to_string().into())).await.unwrap();
}

/// Next JSON envelope from the relay, skipping control frames.
pub async fn next_envelope(ws: &mut ClientSocket) -> Value {
    loop {
        let msg = timeout(RECV_TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for relay envelope")
            .expect("relay closed the socket")
            .expect("relay socket error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

/// Next envelope of the given type, skipping others.
pub async fn next_of_type(ws: &mut ClientSocket, kind: &str) -> Value {
    loop {
        let envelope = next_envelope(ws).await;
        if envelope["type"] == kind {
            return envelope;
        }
    }
}

/// Wait until the relay closes the socket.
pub async fn expect_closed(ws: &mut ClientSocket) {
    loop {
        match timeout(RECV_TIMEOUT, ws.next()).await {
            Ok(Some(Ok(Message::Close(_)))) | Ok(None) | Ok(Some(Err(_))) => return,
            Ok(Some(Ok(_))) => continue,
            Err(_) => panic!("relay did not close the socket"),
        }
    }
}

/// Poll until `check` passes or the timeout elapses.
pub async fn eventually<F: Fn() -> bool>(check: F) -> bool {
    let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}
