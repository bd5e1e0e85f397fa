//! OpenAI Realtime API module.
//!
//! Upstream side of the relay: one WebSocket per relay session, speaking
//! OpenAI's Realtime event protocol.
//!
//! # Audio Format
//!
//! Input and output audio is PCM 16-bit signed little-endian at 24kHz,
//! base64 encoded inside JSON events.

mod client;
mod config;
mod messages;

pub use client::{EventInterpreter, OpenAIRealtime, OpenAIRealtimeFactory};
pub use config::{
    DEFAULT_AUDIO_FORMAT, DEFAULT_REALTIME_MODEL, OPENAI_REALTIME_SAMPLE_RATE, OPENAI_REALTIME_URL,
    build_ws_url, samples_to_ms,
};
pub use messages::{
    ApiError, ClientEvent, ContentPart, ConversationItem, ServerEvent, Session, SessionConfig,
    ToolDef,
};
