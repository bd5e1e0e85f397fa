//! Per-connection relay session.
//!
//! A [`RelaySession`] is owned by exactly one handler loop. It holds the
//! upstream provider, the commands received before the upstream was ready,
//! and the table of tool calls waiting for the client.

use std::fmt;
use std::sync::Arc;

use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::core::audio;
use crate::core::envelope::{
    AudioPayload, ClientEnvelope, EnvelopeError, ServerEnvelope, SessionData,
};
use crate::core::queue::CommandQueue;
use crate::core::realtime::{
    BaseRealtime, BoxedRealtime, FunctionCallRequest, RealtimeConfig, RealtimeError,
    RealtimeFactory, RealtimeResult, UpstreamEvent,
};
use crate::core::tools::PendingToolCalls;

use super::messages::RelayMessageRoute;

/// Capacity of the upstream event channel.
const UPSTREAM_EVENT_BUFFER: usize = 1024;

/// Output reported upstream when a second call for a busy tool arrives.
const IN_FLIGHT_OUTPUT: &str = "tool call already in flight";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Client socket open, no upstream yet
    Accepted,
    UpstreamConnecting,
    /// Both sockets open and events flowing
    Bridging,
    Closing,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Accepted => write!(f, "accepted"),
            SessionState::UpstreamConnecting => write!(f, "upstream_connecting"),
            SessionState::Bridging => write!(f, "bridging"),
            SessionState::Closing => write!(f, "closing"),
            SessionState::Closed => write!(f, "closed"),
        }
    }
}

/// What the handler loop should do after an input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionFlow {
    Continue,
    Close,
}

/// A per-envelope failure reported to the client as an `error` envelope.
struct Rejection {
    code: &'static str,
    message: String,
}

impl Rejection {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<RealtimeError> for Rejection {
    fn from(e: RealtimeError) -> Self {
        let code = match e {
            RealtimeError::InvalidAudio(_) => "invalid_audio",
            RealtimeError::InvalidConfiguration(_) => "invalid_session",
            _ => "upstream_error",
        };
        Rejection::new(code, e.to_string())
    }
}

pub struct RelaySession {
    id: Uuid,
    state: SessionState,
    factory: Arc<dyn RealtimeFactory>,
    base_config: RealtimeConfig,
    upstream: Option<BoxedRealtime>,
    connect_task: Option<JoinHandle<RealtimeResult<BoxedRealtime>>>,
    upstream_tx: mpsc::Sender<UpstreamEvent>,
    pending: CommandQueue<ClientEnvelope>,
    tool_calls: PendingToolCalls,
    client_tx: mpsc::Sender<RelayMessageRoute>,
}

impl RelaySession {
    /// Create a session in the `Accepted` state.
    ///
    /// The returned receiver carries the upstream provider's events and must
    /// be polled by the owner alongside the client socket.
    pub fn new(
        factory: Arc<dyn RealtimeFactory>,
        base_config: RealtimeConfig,
        queue_limit: usize,
        client_tx: mpsc::Sender<RelayMessageRoute>,
    ) -> (Self, mpsc::Receiver<UpstreamEvent>) {
        let (upstream_tx, upstream_rx) = mpsc::channel(UPSTREAM_EVENT_BUFFER);
        let session = Self {
            id: Uuid::new_v4(),
            state: SessionState::Accepted,
            factory,
            base_config,
            upstream: None,
            connect_task: None,
            upstream_tx,
            pending: CommandQueue::new(queue_limit),
            tool_calls: PendingToolCalls::new(),
            client_tx,
        };
        (session, upstream_rx)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Commands waiting for the upstream.
    pub fn queued(&self) -> usize {
        self.pending.len()
    }

    pub fn pending_tool_calls(&self) -> usize {
        self.tool_calls.len()
    }

    // =========================================================================
    // Client -> upstream
    // =========================================================================

    /// Handle one text frame from the client.
    pub async fn handle_client_text(&mut self, text: &str) -> SessionFlow {
        let envelope = match ClientEnvelope::parse(text) {
            Ok(envelope) => envelope,
            Err(EnvelopeError::UnknownType(kind)) => {
                tracing::debug!(session_id = %self.id, kind = %kind, "Ignoring unknown envelope type");
                return SessionFlow::Continue;
            }
            Err(e) => {
                tracing::warn!(session_id = %self.id, "Rejecting client message: {}", e);
                return self.send_error("invalid_message", e.to_string()).await;
            }
        };

        if let Err(e) = envelope.validate() {
            tracing::warn!(session_id = %self.id, kind = envelope.kind(), "Validation failed: {}", e);
            return self.send_error("validation_error", e.to_string()).await;
        }

        self.handle_envelope(envelope).await
    }

    /// Handle a binary frame: raw PCM16 little-endian input audio.
    pub async fn handle_client_audio(&mut self, bytes: &[u8]) -> SessionFlow {
        match audio::samples_from_le_bytes(bytes) {
            Ok(samples) => {
                let envelope = ClientEnvelope::AppendAudio {
                    data: AudioPayload::from_samples(&samples),
                };
                self.handle_envelope(envelope).await
            }
            Err(e) => self.send_error("invalid_audio", e.to_string()).await,
        }
    }

    /// Route a validated envelope according to the session state.
    pub async fn handle_envelope(&mut self, envelope: ClientEnvelope) -> SessionFlow {
        match envelope {
            ClientEnvelope::Disconnect => {
                tracing::info!(session_id = %self.id, "Client requested disconnect");
                SessionFlow::Close
            }
            ClientEnvelope::Connect { data } => self.begin_connect(data).await,
            other => match self.state {
                SessionState::Accepted | SessionState::UpstreamConnecting => {
                    self.enqueue(other).await
                }
                SessionState::Bridging => self.forward(other).await,
                SessionState::Closing | SessionState::Closed => SessionFlow::Close,
            },
        }
    }

    async fn begin_connect(&mut self, session: Option<SessionData>) -> SessionFlow {
        if self.state != SessionState::Accepted {
            tracing::warn!(session_id = %self.id, state = %self.state, "Duplicate connect");
            return self
                .send_error("already_connected", "Session is already connected")
                .await;
        }

        let config = RealtimeConfig {
            session,
            ..self.base_config.clone()
        };

        let mut provider = match self.factory.create(config, self.upstream_tx.clone()) {
            Ok(provider) => provider,
            Err(e) => {
                tracing::error!(session_id = %self.id, "Failed to create upstream provider: {}", e);
                self.state = SessionState::Closing;
                let _ = self
                    .send_error("upstream_connect_failed", format!("Failed to connect upstream: {e}"))
                    .await;
                return SessionFlow::Close;
            }
        };

        tracing::info!(session_id = %self.id, "Connecting upstream");
        self.state = SessionState::UpstreamConnecting;
        self.connect_task = Some(tokio::spawn(async move {
            provider.connect().await?;
            Ok(provider)
        }));
        SessionFlow::Continue
    }

    async fn enqueue(&mut self, envelope: ClientEnvelope) -> SessionFlow {
        let kind = envelope.kind();
        match self.pending.enqueue(envelope) {
            Ok(()) => {
                tracing::trace!(session_id = %self.id, kind, queued = self.pending.len(), "Queued command");
                SessionFlow::Continue
            }
            Err(e) => {
                tracing::warn!(session_id = %self.id, kind, "{}", e);
                self.send_error("queue_full", e.to_string()).await
            }
        }
    }

    /// Resolves when the pending upstream connect finishes. Never resolves
    /// while no connect is in progress.
    pub async fn wait_connect(&mut self) -> RealtimeResult<BoxedRealtime> {
        let Some(task) = self.connect_task.as_mut() else {
            return std::future::pending().await;
        };
        let result = task.await;
        self.connect_task = None;
        match result {
            Ok(result) => result,
            Err(e) => Err(RealtimeError::ConnectionFailed(e.to_string())),
        }
    }

    /// Finish the upstream connect started by `connect`.
    pub async fn on_upstream_connected(
        &mut self,
        result: RealtimeResult<BoxedRealtime>,
    ) -> SessionFlow {
        let provider = match result {
            Ok(provider) => provider,
            Err(e) => {
                tracing::error!(session_id = %self.id, "Upstream connect failed: {}", e);
                self.state = SessionState::Closing;
                let _ = self
                    .send_error("upstream_connect_failed", format!("Failed to connect upstream: {e}"))
                    .await;
                return SessionFlow::Close;
            }
        };

        tracing::info!(
            session_id = %self.id,
            provider = %provider.get_provider_info(),
            queued = self.pending.len(),
            "Upstream connected"
        );
        self.upstream = Some(provider);
        self.state = SessionState::Bridging;
        self.flush_pending().await
    }

    async fn flush_pending(&mut self) -> SessionFlow {
        loop {
            let batch = self.pending.drain();
            if batch.is_empty() {
                return SessionFlow::Continue;
            }
            for envelope in batch {
                if self.forward(envelope).await == SessionFlow::Close {
                    return SessionFlow::Close;
                }
            }
        }
    }

    async fn forward(&mut self, envelope: ClientEnvelope) -> SessionFlow {
        let kind = envelope.kind();
        let Some(upstream) = self.upstream.as_deref_mut() else {
            return self.enqueue(envelope).await;
        };

        match apply(upstream, &mut self.tool_calls, envelope).await {
            Ok(()) => {
                tracing::trace!(session_id = %self.id, kind, "Forwarded command");
                SessionFlow::Continue
            }
            Err(rejection) => {
                tracing::warn!(session_id = %self.id, kind, "{}", rejection.message);
                self.send_error(rejection.code, rejection.message).await
            }
        }
    }

    // =========================================================================
    // Upstream -> client
    // =========================================================================

    pub async fn handle_upstream_event(&mut self, event: UpstreamEvent) -> SessionFlow {
        match event {
            UpstreamEvent::Event(event) => self.send(ServerEnvelope::RealtimeEvent { event }).await,
            UpstreamEvent::ConversationUpdated(event) => {
                self.send(ServerEnvelope::ConversationUpdated { event }).await
            }
            UpstreamEvent::Interrupted => self.send(ServerEnvelope::ConversationInterrupted).await,
            UpstreamEvent::FunctionCall(call) => self.relay_function_call(call).await,
            UpstreamEvent::Error(e) => {
                let rejection = Rejection::from(e);
                self.send_error(rejection.code, rejection.message).await
            }
            UpstreamEvent::Closed { reason } => {
                tracing::info!(session_id = %self.id, reason = ?reason, "Upstream closed");
                self.state = SessionState::Closing;
                let _ = self
                    .send_error("upstream_closed", "Upstream session closed")
                    .await;
                SessionFlow::Close
            }
        }
    }

    async fn relay_function_call(&mut self, call: FunctionCallRequest) -> SessionFlow {
        if let Err(e) = self.tool_calls.begin(&call.name, &call.call_id) {
            tracing::warn!(session_id = %self.id, tool = %call.name, call_id = %call.call_id, "{}", e);
            if let Some(upstream) = self.upstream.as_deref_mut() {
                let output = json!({ "error": IN_FLIGHT_OUTPUT }).to_string();
                if let Err(e) = upstream.submit_function_result(&call.call_id, &output).await {
                    tracing::warn!(session_id = %self.id, "Failed to refuse tool call: {}", e);
                }
            }
            return self.send_error("tool_call_in_flight", e.to_string()).await;
        }

        tracing::debug!(session_id = %self.id, tool = %call.name, call_id = %call.call_id, "Relaying tool call");
        let params = call.params();
        self.send(ServerEnvelope::ToolCall {
            tool: call.name,
            params,
        })
        .await
    }

    async fn send(&self, envelope: ServerEnvelope) -> SessionFlow {
        match self
            .client_tx
            .send(RelayMessageRoute::Outgoing(envelope))
            .await
        {
            Ok(()) => SessionFlow::Continue,
            Err(_) => {
                tracing::debug!(session_id = %self.id, "Client writer gone");
                SessionFlow::Close
            }
        }
    }

    async fn send_error(&self, code: &str, message: impl Into<String>) -> SessionFlow {
        self.send(ServerEnvelope::error(code, message)).await
    }

    // =========================================================================
    // Teardown
    // =========================================================================

    /// Release the upstream, queued commands and pending tool calls.
    pub async fn teardown(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Closing;

        if let Some(task) = self.connect_task.take() {
            task.abort();
        }

        if let Some(mut upstream) = self.upstream.take()
            && let Err(e) = upstream.disconnect().await
        {
            tracing::error!(session_id = %self.id, "Failed to disconnect upstream: {}", e);
        }

        let dropped = self.pending.clear();
        if dropped > 0 {
            tracing::debug!(session_id = %self.id, dropped, "Discarded queued commands");
        }
        for (tool, call) in self.tool_calls.clear() {
            tracing::debug!(
                session_id = %self.id,
                tool = %tool,
                call_id = %call.call_id,
                waited_ms = call.elapsed().as_millis() as u64,
                "Abandoned pending tool call"
            );
        }

        self.state = SessionState::Closed;
    }
}

/// Translate one client command into upstream calls.
async fn apply(
    upstream: &mut dyn BaseRealtime,
    tool_calls: &mut PendingToolCalls,
    envelope: ClientEnvelope,
) -> Result<(), Rejection> {
    match envelope {
        ClientEnvelope::UpdateSession { data } => upstream.update_session(data).await?,
        ClientEnvelope::AppendAudio { data } => {
            let samples = data
                .to_samples()
                .map_err(|e| Rejection::new("invalid_audio", e.to_string()))?;
            upstream.send_audio(&samples).await?
        }
        ClientEnvelope::CreateResponse => upstream.create_response().await?,
        ClientEnvelope::CancelResponse { id, offset } => {
            upstream.cancel_response(&id, offset).await?
        }
        ClientEnvelope::UserMessage { data } => {
            upstream.send_user_message(data).await?;
            upstream.create_response().await?
        }
        ClientEnvelope::AddTool { tool } => upstream.add_tool(tool).await?,
        ClientEnvelope::ToolResponse { tool, result } => {
            let call = tool_calls
                .resolve(&tool)
                .map_err(|e| Rejection::new("no_pending_call", e.to_string()))?;
            upstream
                .submit_function_result(&call.call_id, &tool_output(result))
                .await?;
            upstream.create_response().await?
        }
        ClientEnvelope::Error {
            error,
            tool: Some(tool),
        } if tool_calls.is_pending(&tool) => {
            let call = tool_calls
                .resolve(&tool)
                .map_err(|e| Rejection::new("no_pending_call", e.to_string()))?;
            let output = json!({ "error": error }).to_string();
            upstream.submit_function_result(&call.call_id, &output).await?;
            upstream.create_response().await?
        }
        ClientEnvelope::Error { error, tool } => {
            tracing::warn!(tool = ?tool, "Client reported error: {}", error);
        }
        // Handled before forwarding
        ClientEnvelope::Connect { .. } | ClientEnvelope::Disconnect => {}
    }
    Ok(())
}

/// Function outputs are strings upstream; plain strings pass through.
fn tool_output(result: Value) -> String {
    match result {
        Value::String(s) => s,
        other => other.to_string(),
    }
}
