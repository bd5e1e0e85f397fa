//! Browser-facing relay WebSocket
//!
//! Each connection gets a [`RelaySession`] that forwards envelopes to an
//! upstream realtime provider and wraps upstream events for the client.
//!
//! # Protocol
//!
//! ## Client → Server
//!
//! - **connect**: Open the upstream session, optionally with initial session data
//! - **disconnect**: Close the relay
//! - **update_session**: Patch upstream session settings
//! - **append_audio**: Base64 PCM16 audio (binary frames carry raw PCM16 LE)
//! - **create_response** / **cancel_response**
//! - **user_message**: Add a user message and request a response
//! - **add_tool**: Register a tool the client can answer
//! - **tool_response** / **error**: Answer a pending `tool_call`
//!
//! ## Server → Client
//!
//! - **realtime.event**: Raw upstream event
//! - **conversation.updated**: Upstream event that changed the conversation
//! - **conversation.interrupted**: The user started speaking
//! - **tool_call**: The model invoked a client tool
//! - **error**: Relay or upstream failure with a stable `code`

mod handler;
pub mod messages;
pub mod session;

pub use handler::relay_handler;
pub use messages::RelayMessageRoute;
pub use session::{RelaySession, SessionFlow, SessionState};
