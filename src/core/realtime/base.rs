//! Base traits and types for upstream realtime providers.
//!
//! A provider owns one upstream conversational session. Outbound calls go
//! through [`BaseRealtime`]; everything the provider receives is pushed onto
//! a typed [`UpstreamEvent`] channel handed to it at construction.
//!
//! # Audio Format
//!
//! All providers use PCM 16-bit signed little-endian at 24kHz sample rate.

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::core::audio::AudioCodecError;
use crate::core::envelope::{SessionData, ToolSpec, UserContent};

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during realtime operations.
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// Connection to the provider failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Provider-specific error
    #[error("Provider error: {0}")]
    ProviderError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Audio payload failed to decode or validate
    #[error("Invalid audio: {0}")]
    InvalidAudio(#[from] AudioCodecError),

    /// Operation timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Not connected
    #[error("Not connected")]
    NotConnected,
}

/// Result type for realtime operations.
pub type RealtimeResult<T> = Result<T, RealtimeError>;

// =============================================================================
// Configuration Types
// =============================================================================

/// Configuration for one upstream session.
#[derive(Clone, Default)]
pub struct RealtimeConfig {
    /// Server-held credential; never taken from the client
    pub api_key: String,

    /// Provider endpoint (e.g., "wss://api.openai.com/v1/realtime")
    pub url: String,

    /// Model to use (e.g., "gpt-4o-realtime-preview")
    pub model: String,

    /// Initial session configuration applied right after connecting
    pub session: Option<SessionData>,

    /// Tools registered before the session was opened
    pub tools: Vec<ToolSpec>,
}

impl fmt::Debug for RealtimeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealtimeConfig")
            .field("api_key", &"<redacted>")
            .field("url", &self.url)
            .field("model", &self.model)
            .field("session", &self.session)
            .field("tools", &self.tools.len())
            .finish()
    }
}

// =============================================================================
// State and Events
// =============================================================================

/// Connection state for realtime providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Not connected to the provider
    #[default]
    Disconnected,
    /// Connection in progress
    Connecting,
    /// Connected and ready
    Connected,
    /// Connection failed
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Failed => write!(f, "Failed"),
        }
    }
}

/// A completed function call requested by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCallRequest {
    /// Call ID for the function call
    pub call_id: String,
    /// Function name
    pub name: String,
    /// Raw JSON arguments as sent by the provider
    pub arguments: String,
}

impl FunctionCallRequest {
    /// Parse the arguments, keeping unparseable input as a string.
    pub fn params(&self) -> Value {
        if self.arguments.trim().is_empty() {
            return Value::Object(Default::default());
        }
        serde_json::from_str(&self.arguments)
            .unwrap_or_else(|_| Value::String(self.arguments.clone()))
    }
}

/// Events a provider emits, in the order they were received upstream.
#[derive(Debug)]
pub enum UpstreamEvent {
    /// Any upstream event, unmodified
    Event(Value),
    /// An upstream event that changed the conversation
    ConversationUpdated(Value),
    /// The user started speaking
    Interrupted,
    /// The model finished describing a function call
    FunctionCall(FunctionCallRequest),
    /// An upstream payload was rejected and not forwarded
    Error(RealtimeError),
    /// The upstream connection ended without a local disconnect
    Closed { reason: Option<String> },
}

/// Event sender handed to providers.
pub type UpstreamEventSender = mpsc::Sender<UpstreamEvent>;

// =============================================================================
// Base Trait
// =============================================================================

/// Base trait for realtime audio-to-audio providers.
///
/// All methods other than `connect` require an open session and return
/// [`RealtimeError::NotConnected`] otherwise.
#[async_trait]
pub trait BaseRealtime: Send + Sync {
    /// Open the upstream session. Returns once the socket handshake is done.
    async fn connect(&mut self) -> RealtimeResult<()>;

    /// Close the upstream session. Idempotent.
    async fn disconnect(&mut self) -> RealtimeResult<()>;

    /// Check if the provider is ready to accept commands.
    fn is_ready(&self) -> bool;

    /// Get the current connection state.
    fn get_connection_state(&self) -> ConnectionState;

    /// Apply a session configuration change.
    async fn update_session(&mut self, session: SessionData) -> RealtimeResult<()>;

    /// Append PCM16 input audio.
    async fn send_audio(&mut self, samples: &[i16]) -> RealtimeResult<()>;

    /// Add a user message to the conversation.
    async fn send_user_message(&mut self, content: UserContent) -> RealtimeResult<()>;

    /// Request a model response.
    async fn create_response(&mut self) -> RealtimeResult<()>;

    /// Cancel the active response and truncate `item_id` at `sample_offset`.
    async fn cancel_response(&mut self, item_id: &str, sample_offset: u64) -> RealtimeResult<()>;

    /// Make a tool available to the model.
    async fn add_tool(&mut self, tool: ToolSpec) -> RealtimeResult<()>;

    /// Answer a function call.
    async fn submit_function_result(&mut self, call_id: &str, output: &str) -> RealtimeResult<()>;

    /// Provider metadata for logging.
    fn get_provider_info(&self) -> Value;
}

/// Boxed realtime provider for dynamic dispatch.
pub type BoxedRealtime = Box<dyn BaseRealtime>;

/// Creates one provider per relay session.
pub trait RealtimeFactory: Send + Sync {
    /// Create a provider that reports its events on `events`.
    fn create(
        &self,
        config: RealtimeConfig,
        events: UpstreamEventSender,
    ) -> RealtimeResult<BoxedRealtime>;
}
