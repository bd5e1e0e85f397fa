//! OpenAI Realtime API client implementation.
//!
//! This module provides the OpenAI Realtime client that implements the `BaseRealtime` trait
//! using OpenAI's WebSocket-based Realtime API.
//!
//! # API Reference
//!
//! - Endpoint: `wss://api.openai.com/v1/realtime?model=<model>`
//! - Protocol: WebSocket with JSON events
//! - Audio: PCM 16-bit, 24kHz, mono, little-endian, base64 encoded
//!
//! Every server event is reported as [`UpstreamEvent::Event`] in arrival
//! order. Conversation changes, interruptions and completed function calls
//! are reported in addition, right after the raw event they came from.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_tungstenite::tungstenite::{
    Message,
    client::IntoClientRequest,
    http::{HeaderValue, header::AUTHORIZATION},
};

use super::config::{OPENAI_REALTIME_SAMPLE_RATE, build_ws_url, samples_to_ms};
use super::messages::{ClientEvent, ConversationItem, ServerEvent, SessionConfig, ToolDef};
use crate::core::audio;
use crate::core::envelope::{SessionData, ToolSpec, UserContent};
use crate::core::realtime::base::{
    BaseRealtime, BoxedRealtime, ConnectionState, FunctionCallRequest, RealtimeConfig,
    RealtimeError, RealtimeFactory, RealtimeResult, UpstreamEvent, UpstreamEventSender,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Channel capacity for WebSocket message sending.
const WS_CHANNEL_CAPACITY: usize = 256;

/// Upper bound on the WebSocket handshake.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// How long `disconnect` waits for the close handshake before aborting.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

// =============================================================================
// Event interpretation
// =============================================================================

/// Turns raw server frames into [`UpstreamEvent`]s.
///
/// Function names only appear on `response.output_item.added`, so they are
/// remembered by call id until the matching arguments arrive.
#[derive(Debug, Default)]
pub struct EventInterpreter {
    pending_function_calls: HashMap<String, String>,
}

impl EventInterpreter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interpret one text frame.
    pub fn interpret(&mut self, text: &str) -> Vec<UpstreamEvent> {
        let raw: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("Failed to parse server event: {}", e);
                return Vec::new();
            }
        };

        // Known types with unexpected shapes are still forwarded verbatim
        let event = serde_json::from_str::<ServerEvent>(text).unwrap_or(ServerEvent::Other);

        match &event {
            ServerEvent::AudioDelta { delta } => {
                if let Err(e) = audio::decode_samples(delta).and_then(|s| audio::validate(&s)) {
                    tracing::warn!("Dropping corrupt audio delta: {}", e);
                    return vec![UpstreamEvent::Error(RealtimeError::InvalidAudio(e))];
                }
            }
            ServerEvent::Error { error } => {
                tracing::error!(
                    "OpenAI Realtime error: {} - {}",
                    error.error_type,
                    error.message
                );
            }
            ServerEvent::SessionCreated { session } => {
                tracing::info!("OpenAI Realtime session created: {}", session.id);
            }
            ServerEvent::SpeechStarted { audio_start_ms, .. } => {
                tracing::debug!("Speech started at {}ms", audio_start_ms);
            }
            ServerEvent::OutputItemAdded { item } => {
                if item.item_type == "function_call"
                    && let (Some(call_id), Some(name)) = (&item.call_id, &item.name)
                {
                    tracing::debug!("Tracking function call: call_id={}, name={}", call_id, name);
                    self.pending_function_calls
                        .insert(call_id.clone(), name.clone());
                }
            }
            _ => {}
        }

        let mut out = Vec::with_capacity(3);
        let updates_conversation = event.updates_conversation();

        if updates_conversation {
            out.push(UpstreamEvent::Event(raw.clone()));
            out.push(UpstreamEvent::ConversationUpdated(raw));
        } else {
            out.push(UpstreamEvent::Event(raw));
        }

        match event {
            ServerEvent::SpeechStarted { .. } => out.push(UpstreamEvent::Interrupted),
            ServerEvent::FunctionCallArgumentsDone {
                call_id,
                name,
                arguments,
            } => {
                let tracked = self.pending_function_calls.remove(&call_id);
                match name.or(tracked) {
                    Some(name) => {
                        tracing::debug!("Function call complete: name={}, call_id={}", name, call_id);
                        out.push(UpstreamEvent::FunctionCall(FunctionCallRequest {
                            call_id,
                            name,
                            arguments,
                        }));
                    }
                    None => {
                        tracing::warn!(
                            "Function name not found for call_id: {}. This may indicate a protocol issue.",
                            call_id
                        );
                    }
                }
            }
            _ => {}
        }

        out
    }
}

// =============================================================================
// OpenAI Realtime Client
// =============================================================================

/// OpenAI Realtime API client implementation.
///
/// One instance serves one relay session. It does not reconnect: an upstream
/// drop is reported as [`UpstreamEvent::Closed`] and the session is torn down.
pub struct OpenAIRealtime {
    /// Configuration
    config: RealtimeConfig,
    /// Event channel to the owning session
    events: UpstreamEventSender,
    /// Connection state
    state: Arc<RwLock<ConnectionState>>,
    /// Connected flag for fast checks (shared with connection task)
    connected: Arc<AtomicBool>,
    /// Set before a local disconnect so the connection task stays quiet
    intentional_disconnect: Arc<AtomicBool>,
    /// WebSocket sender channel
    ws_sender: Option<mpsc::Sender<ClientEvent>>,
    /// Connection task handle
    connection_handle: Option<JoinHandle<()>>,
    /// Tools announced to the model
    tools: Vec<ToolSpec>,
}

impl OpenAIRealtime {
    pub fn new(config: RealtimeConfig, events: UpstreamEventSender) -> RealtimeResult<Self> {
        if config.api_key.is_empty() {
            return Err(RealtimeError::AuthenticationFailed(
                "API key is required".to_string(),
            ));
        }

        // Fail early on a bad endpoint rather than on first connect
        build_ws_url(&config.url, &config.model)?;

        let tools = config.tools.clone();
        Ok(Self {
            config,
            events,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            connected: Arc::new(AtomicBool::new(false)),
            intentional_disconnect: Arc::new(AtomicBool::new(false)),
            ws_sender: None,
            connection_handle: None,
            tools,
        })
    }

    /// Registered tool names, in announcement order.
    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name.as_str()).collect()
    }

    /// Send an event to the WebSocket.
    async fn send_event(&self, event: ClientEvent) -> RealtimeResult<()> {
        if !self.is_ready() {
            return Err(RealtimeError::NotConnected);
        }
        let Some(sender) = self.ws_sender.as_ref() else {
            return Err(RealtimeError::NotConnected);
        };
        tracing::trace!("Sending {}", event.kind());
        sender
            .send(event)
            .await
            .map_err(|e| RealtimeError::WebSocketError(e.to_string()))
    }

    /// Build a session update carrying every registered tool.
    fn session_with_tools(&self, data: SessionData) -> RealtimeResult<SessionConfig> {
        let mut session: SessionConfig = serde_json::from_value(Value::Object(data))
            .map_err(|e| RealtimeError::InvalidConfiguration(e.to_string()))?;
        session.merge_tools(&self.tools);
        Ok(session)
    }

    async fn run_connection(
        ws_stream: WsStream,
        mut rx: mpsc::Receiver<ClientEvent>,
        events: UpstreamEventSender,
        connected: Arc<AtomicBool>,
        intentional_disconnect: Arc<AtomicBool>,
        state: Arc<RwLock<ConnectionState>>,
    ) {
        let (mut ws_sink, mut ws_stream) = ws_stream.split();
        let mut interpreter = EventInterpreter::new();
        let mut reason: Option<String> = None;

        loop {
            tokio::select! {
                outgoing = rx.recv() => {
                    let Some(event) = outgoing else {
                        // Sender dropped by disconnect(): close politely
                        let _ = ws_sink.send(Message::Close(None)).await;
                        let _ = ws_sink.close().await;
                        break;
                    };

                    let json = match serde_json::to_string(&event) {
                        Ok(j) => j,
                        Err(e) => {
                            tracing::error!("Failed to serialize event: {}", e);
                            continue;
                        }
                    };

                    if let Err(e) = ws_sink.send(Message::Text(json.into())).await {
                        tracing::error!("Failed to send WebSocket message: {}", e);
                        reason = Some(e.to_string());
                        break;
                    }
                }

                incoming = ws_stream.next() => {
                    match incoming {
                        Some(Ok(Message::Text(text))) => {
                            for event in interpreter.interpret(&text) {
                                if events.send(event).await.is_err() {
                                    tracing::debug!("Session dropped its event receiver");
                                    break;
                                }
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            tracing::info!("WebSocket closed by server");
                            reason = frame.map(|f| f.reason.as_str().to_string());
                            break;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            if let Err(e) = ws_sink.send(Message::Pong(data)).await {
                                tracing::error!("Failed to send pong: {}", e);
                            }
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            tracing::error!("WebSocket error: {}", e);
                            reason = Some(e.to_string());
                            break;
                        }
                        None => {
                            reason = Some("connection ended".to_string());
                            break;
                        }
                    }
                }
            }
        }

        connected.store(false, Ordering::SeqCst);
        *state.write() = ConnectionState::Disconnected;

        if !intentional_disconnect.load(Ordering::SeqCst) {
            let _ = events.send(UpstreamEvent::Closed { reason }).await;
        }
        tracing::info!("OpenAI Realtime connection task ended");
    }
}

#[async_trait]
impl BaseRealtime for OpenAIRealtime {
    async fn connect(&mut self) -> RealtimeResult<()> {
        if self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }

        self.intentional_disconnect.store(false, Ordering::SeqCst);
        *self.state.write() = ConnectionState::Connecting;

        let url = build_ws_url(&self.config.url, &self.config.model)?;

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| RealtimeError::ConnectionFailed(e.to_string()))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.config.api_key))
            .map_err(|e| RealtimeError::AuthenticationFailed(e.to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);
        request
            .headers_mut()
            .insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

        let connect = tokio_tungstenite::connect_async(request);
        let (ws_stream, _response) = match tokio::time::timeout(CONNECT_TIMEOUT, connect).await {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => {
                *self.state.write() = ConnectionState::Failed;
                return Err(RealtimeError::ConnectionFailed(e.to_string()));
            }
            Err(_) => {
                *self.state.write() = ConnectionState::Failed;
                return Err(RealtimeError::Timeout(format!(
                    "handshake with {} exceeded {}s",
                    url.host_str().unwrap_or("upstream"),
                    CONNECT_TIMEOUT.as_secs()
                )));
            }
        };

        tracing::info!("Connected to OpenAI Realtime API");

        let (tx, rx) = mpsc::channel::<ClientEvent>(WS_CHANNEL_CAPACITY);
        self.ws_sender = Some(tx);

        self.connected.store(true, Ordering::SeqCst);
        *self.state.write() = ConnectionState::Connected;

        self.connection_handle = Some(tokio::spawn(Self::run_connection(
            ws_stream,
            rx,
            self.events.clone(),
            self.connected.clone(),
            self.intentional_disconnect.clone(),
            self.state.clone(),
        )));

        // Initial session configuration, including tools known up front
        if let Some(data) = self.config.session.clone() {
            let session = self.session_with_tools(data)?;
            self.send_event(ClientEvent::SessionUpdate { session }).await?;
        } else if !self.tools.is_empty() {
            let session = self.session_with_tools(SessionData::new())?;
            self.send_event(ClientEvent::SessionUpdate { session }).await?;
        }

        Ok(())
    }

    async fn disconnect(&mut self) -> RealtimeResult<()> {
        self.intentional_disconnect.store(true, Ordering::SeqCst);

        // Dropping the sender lets the connection task send a close frame
        self.ws_sender = None;

        if let Some(mut handle) = self.connection_handle.take()
            && tokio::time::timeout(CLOSE_GRACE, &mut handle).await.is_err()
        {
            tracing::warn!("Upstream close handshake timed out, aborting connection task");
            handle.abort();
        }

        self.connected.store(false, Ordering::SeqCst);
        *self.state.write() = ConnectionState::Disconnected;

        tracing::info!("Disconnected from OpenAI Realtime API");
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn get_connection_state(&self) -> ConnectionState {
        *self.state.read()
    }

    async fn update_session(&mut self, session: SessionData) -> RealtimeResult<()> {
        if !self.is_ready() {
            return Err(RealtimeError::NotConnected);
        }
        let session = self.session_with_tools(session)?;
        self.send_event(ClientEvent::SessionUpdate { session }).await
    }

    async fn send_audio(&mut self, samples: &[i16]) -> RealtimeResult<()> {
        self.send_event(ClientEvent::audio_append(samples)).await
    }

    async fn send_user_message(&mut self, content: UserContent) -> RealtimeResult<()> {
        let item = ConversationItem::user_message(content)?;
        self.send_event(ClientEvent::ConversationItemCreate {
            item,
            previous_item_id: None,
        })
        .await
    }

    async fn create_response(&mut self) -> RealtimeResult<()> {
        self.send_event(ClientEvent::ResponseCreate).await
    }

    async fn cancel_response(&mut self, item_id: &str, sample_offset: u64) -> RealtimeResult<()> {
        self.send_event(ClientEvent::ResponseCancel).await?;
        self.send_event(ClientEvent::ConversationItemTruncate {
            item_id: item_id.to_string(),
            content_index: 0,
            audio_end_ms: samples_to_ms(sample_offset),
        })
        .await
    }

    async fn add_tool(&mut self, tool: ToolSpec) -> RealtimeResult<()> {
        if !self.is_ready() {
            return Err(RealtimeError::NotConnected);
        }

        match self.tools.iter_mut().find(|t| t.name == tool.name) {
            Some(existing) => {
                tracing::warn!("Replacing upstream tool definition: {}", tool.name);
                *existing = tool;
            }
            None => self.tools.push(tool),
        }

        let session = SessionConfig {
            tools: Some(self.tools.iter().map(ToolDef::from).collect()),
            ..Default::default()
        };
        self.send_event(ClientEvent::SessionUpdate { session }).await
    }

    async fn submit_function_result(&mut self, call_id: &str, output: &str) -> RealtimeResult<()> {
        self.send_event(ClientEvent::ConversationItemCreate {
            item: ConversationItem::function_call_output(call_id, output),
            previous_item_id: None,
        })
        .await
    }

    fn get_provider_info(&self) -> Value {
        serde_json::json!({
            "provider": "openai",
            "api_type": "WebSocket Realtime",
            "endpoint": self.config.url,
            "model": self.config.model,
            "default_sample_rate": OPENAI_REALTIME_SAMPLE_RATE,
            "tools": self.tool_names(),
        })
    }
}

impl Drop for OpenAIRealtime {
    fn drop(&mut self) {
        // Dropped without disconnect(), e.g. a cancelled connect: stop the task
        self.intentional_disconnect.store(true, Ordering::SeqCst);
        if let Some(handle) = self.connection_handle.take() {
            handle.abort();
        }
    }
}

// =============================================================================
// Factory
// =============================================================================

/// Creates [`OpenAIRealtime`] providers.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenAIRealtimeFactory;

impl RealtimeFactory for OpenAIRealtimeFactory {
    fn create(
        &self,
        config: RealtimeConfig,
        events: UpstreamEventSender,
    ) -> RealtimeResult<BoxedRealtime> {
        Ok(Box::new(OpenAIRealtime::new(config, events)?))
    }
}

// =============================================================================
// Tests
// =============================================================================
