//! Wire envelopes exchanged over the duplex channel.
//!
//! Every frame is a JSON object whose `type` field selects exactly one
//! variant. Client envelopes flow browser → relay, server envelopes flow
//! relay → browser. Both sides validate at the boundary: unknown types are
//! reported separately from known types with the wrong shape so callers can
//! ignore the former and reject the latter.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use super::audio::{self, AudioCodecError};

/// Maximum allowed size for session instructions (100 KB)
pub const MAX_INSTRUCTIONS_SIZE: usize = 100 * 1024;

/// Maximum allowed size for user message text (50 KB)
pub const MAX_TEXT_SIZE: usize = 50 * 1024;

/// Maximum allowed size for a serialized tool result (100 KB)
pub const MAX_TOOL_RESULT_SIZE: usize = 100 * 1024;

/// Maximum allowed length for a tool name
pub const MAX_TOOL_NAME_LEN: usize = 64;

/// Envelope types accepted from clients.
pub const CLIENT_ENVELOPE_TYPES: &[&str] = &[
    "connect",
    "disconnect",
    "update_session",
    "append_audio",
    "create_response",
    "cancel_response",
    "user_message",
    "add_tool",
    "tool_response",
    "error",
];

/// Envelope types emitted by the relay.
pub const SERVER_ENVELOPE_TYPES: &[&str] = &[
    "realtime.event",
    "conversation.updated",
    "conversation.interrupted",
    "tool_call",
    "error",
];

/// Session configuration object, passed through to the upstream provider.
pub type SessionData = Map<String, Value>;

// =============================================================================
// Errors
// =============================================================================

/// Errors raised while parsing or validating an envelope.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EnvelopeError {
    /// The frame is not a JSON object with a string `type`
    #[error("Malformed envelope: {0}")]
    Malformed(String),

    /// The `type` is not one this side understands
    #[error("Unknown envelope type: {0}")]
    UnknownType(String),

    /// The `type` is known but the payload does not match it
    #[error("Invalid '{kind}' envelope: {reason}")]
    InvalidShape { kind: String, reason: String },

    /// A field exceeds its size limit
    #[error("Field '{field}' too large: {size} bytes (max: {max} bytes)")]
    TooLarge {
        field: &'static str,
        size: usize,
        max: usize,
    },

    /// A field has an unacceptable value
    #[error("Invalid field '{field}': {reason}")]
    InvalidField { field: &'static str, reason: String },

    /// Audio payload failed to decode or validate
    #[error(transparent)]
    Audio(#[from] AudioCodecError),
}

// =============================================================================
// Payload types
// =============================================================================

/// Audio carried by `append_audio`: either raw sample integers or base64 PCM16.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AudioPayload {
    /// Sample values. Every value outside the PCM16 range is clamped to
    /// `i16::MIN`/`i16::MAX`, wherever it sits in the buffer
    Samples(Vec<i64>),
    /// Base64-encoded little-endian PCM16
    Base64(String),
}

impl AudioPayload {
    /// Build a payload from PCM16 samples using the base64 encoding.
    pub fn from_samples(samples: &[i16]) -> Self {
        Self::Base64(audio::encode_samples(samples))
    }

    /// Decode and validate into PCM16 samples.
    pub fn to_samples(&self) -> Result<Vec<i16>, AudioCodecError> {
        match self {
            Self::Samples(values) => Ok(audio::samples_from_wide(values)),
            Self::Base64(text) => {
                let samples = audio::decode_samples(text)?;
                audio::validate(&samples)?;
                Ok(samples)
            }
        }
    }
}

/// Tool description announced with `add_tool`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON schema for the tool parameters
    #[serde(default = "default_tool_parameters")]
    pub parameters: Value,
}

fn default_tool_parameters() -> Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// Content of a `user_message`: plain text or a list of content parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserContent {
    Text(String),
    Parts(Vec<UserContentPart>),
}

/// A single part of a multi-part user message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum UserContentPart {
    #[serde(rename = "input_text")]
    InputText { text: String },

    #[serde(rename = "input_audio")]
    InputAudio { audio: AudioPayload },
}

impl UserContent {
    /// Total text bytes across all parts.
    fn text_len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Parts(parts) => parts
                .iter()
                .map(|p| match p {
                    UserContentPart::InputText { text } => text.len(),
                    UserContentPart::InputAudio { .. } => 0,
                })
                .sum(),
        }
    }
}

// =============================================================================
// Client -> Relay
// =============================================================================

/// Envelopes sent by the browser client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEnvelope {
    /// Open the upstream session, optionally with an initial configuration
    #[serde(rename = "connect")]
    Connect {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<SessionData>,
    },

    /// Close the session
    #[serde(rename = "disconnect")]
    Disconnect,

    /// Change session configuration
    #[serde(rename = "update_session")]
    UpdateSession { data: SessionData },

    /// Append input audio
    #[serde(rename = "append_audio")]
    AppendAudio { data: AudioPayload },

    /// Ask the model to respond
    #[serde(rename = "create_response")]
    CreateResponse,

    /// Cancel the in-progress response, truncating item `id` at `offset` samples
    #[serde(rename = "cancel_response")]
    CancelResponse { id: String, offset: u64 },

    /// Add a user message to the conversation
    #[serde(rename = "user_message")]
    UserMessage { data: UserContent },

    /// Make a client-side tool available to the model
    #[serde(rename = "add_tool")]
    AddTool { tool: ToolSpec },

    /// Result of a `tool_call`
    #[serde(rename = "tool_response")]
    ToolResponse { tool: String, result: Value },

    /// Client-side failure, optionally tied to a tool call
    #[serde(rename = "error")]
    Error {
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool: Option<String>,
    },
}

impl ClientEnvelope {
    /// Parse a text frame, distinguishing unknown types from bad shapes.
    pub fn parse(text: &str) -> Result<Self, EnvelopeError> {
        parse_tagged(text, CLIENT_ENVELOPE_TYPES)
    }

    /// Wire name of this envelope's `type`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "connect",
            Self::Disconnect => "disconnect",
            Self::UpdateSession { .. } => "update_session",
            Self::AppendAudio { .. } => "append_audio",
            Self::CreateResponse => "create_response",
            Self::CancelResponse { .. } => "cancel_response",
            Self::UserMessage { .. } => "user_message",
            Self::AddTool { .. } => "add_tool",
            Self::ToolResponse { .. } => "tool_response",
            Self::Error { .. } => "error",
        }
    }

    /// Validates field sizes and values to prevent resource exhaustion.
    pub fn validate(&self) -> Result<(), EnvelopeError> {
        match self {
            Self::Connect { data: Some(data) } | Self::UpdateSession { data } => {
                validate_session(data)
            }
            Self::UserMessage { data } => {
                let size = data.text_len();
                if size > MAX_TEXT_SIZE {
                    return Err(EnvelopeError::TooLarge {
                        field: "data",
                        size,
                        max: MAX_TEXT_SIZE,
                    });
                }
                Ok(())
            }
            Self::AddTool { tool } => validate_tool_name(&tool.name),
            Self::ToolResponse { tool, result } => {
                validate_tool_name(tool)?;
                let size = result.to_string().len();
                if size > MAX_TOOL_RESULT_SIZE {
                    return Err(EnvelopeError::TooLarge {
                        field: "result",
                        size,
                        max: MAX_TOOL_RESULT_SIZE,
                    });
                }
                Ok(())
            }
            Self::CancelResponse { id, .. } if id.is_empty() => Err(EnvelopeError::InvalidField {
                field: "id",
                reason: "must not be empty".to_string(),
            }),
            _ => Ok(()),
        }
    }
}

fn validate_session(data: &SessionData) -> Result<(), EnvelopeError> {
    if let Some(instructions) = data.get("instructions").and_then(Value::as_str) {
        let size = instructions.len();
        if size > MAX_INSTRUCTIONS_SIZE {
            return Err(EnvelopeError::TooLarge {
                field: "instructions",
                size,
                max: MAX_INSTRUCTIONS_SIZE,
            });
        }
    }
    Ok(())
}

fn validate_tool_name(name: &str) -> Result<(), EnvelopeError> {
    if name.is_empty() || name.len() > MAX_TOOL_NAME_LEN {
        return Err(EnvelopeError::InvalidField {
            field: "tool",
            reason: format!("name must be 1-{MAX_TOOL_NAME_LEN} characters"),
        });
    }
    Ok(())
}

// =============================================================================
// Relay -> Client
// =============================================================================

/// Envelopes sent by the relay to the browser client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEnvelope {
    /// Any upstream event, passed through untouched
    #[serde(rename = "realtime.event")]
    RealtimeEvent { event: Value },

    /// An upstream event that changed the conversation
    #[serde(rename = "conversation.updated")]
    ConversationUpdated { event: Value },

    /// The user started speaking over the assistant
    #[serde(rename = "conversation.interrupted")]
    ConversationInterrupted,

    /// The model wants a client-side tool invoked
    #[serde(rename = "tool_call")]
    ToolCall { tool: String, params: Value },

    /// Failure attributable to a specific cause
    #[serde(rename = "error")]
    Error {
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
}

impl ServerEnvelope {
    /// Parse a text frame received from the relay.
    pub fn parse(text: &str) -> Result<Self, EnvelopeError> {
        parse_tagged(text, SERVER_ENVELOPE_TYPES)
    }

    /// Convenience constructor for coded errors.
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
            code: Some(code.to_string()),
        }
    }
}

fn parse_tagged<T: serde::de::DeserializeOwned>(
    text: &str,
    known: &[&str],
) -> Result<T, EnvelopeError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| EnvelopeError::Malformed(e.to_string()))?;

    let kind = match value.get("type") {
        Some(Value::String(kind)) => kind.clone(),
        Some(_) => return Err(EnvelopeError::Malformed("'type' must be a string".to_string())),
        None => return Err(EnvelopeError::Malformed("missing 'type' field".to_string())),
    };

    if !known.contains(&kind.as_str()) {
        return Err(EnvelopeError::UnknownType(kind));
    }

    serde_json::from_value(value).map_err(|e| EnvelopeError::InvalidShape {
        kind,
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_connect_without_data() {
        let msg = ClientEnvelope::parse(r#"{"type":"connect"}"#).expect("Should parse");
        assert_eq!(msg, ClientEnvelope::Connect { data: None });
    }

    #[test]
    fn test_connect_with_data() {
        let msg = ClientEnvelope::parse(r#"{"type":"connect","data":{"voice":"alloy"}}"#)
            .expect("Should parse");
        match msg {
            ClientEnvelope::Connect { data: Some(data) } => {
                assert_eq!(data.get("voice"), Some(&json!("alloy")));
            }
            _ => panic!("Expected Connect with data"),
        }
    }

    #[test]
    fn test_append_audio_numeric_and_base64() {
        let numeric = ClientEnvelope::parse(r#"{"type":"append_audio","data":[0,1,-1]}"#)
            .expect("Should parse");
        match numeric {
            ClientEnvelope::AppendAudio { data } => {
                assert_eq!(data.to_samples().unwrap(), vec![0, 1, -1]);
            }
            _ => panic!("Expected AppendAudio"),
        }

        let encoded = audio::encode_samples(&[5, -5]);
        let text = json!({"type": "append_audio", "data": encoded}).to_string();
        match ClientEnvelope::parse(&text).expect("Should parse") {
            ClientEnvelope::AppendAudio { data } => {
                assert_eq!(data.to_samples().unwrap(), vec![5, -5]);
            }
            _ => panic!("Expected AppendAudio"),
        }
    }

    #[test]
    fn test_audio_payload_clamps_sample_arrays_everywhere() {
        let mut values = vec![0i64; 2048];
        values[1] = 70_000;
        values[2047] = -70_000;

        let samples = AudioPayload::Samples(values).to_samples().unwrap();
        assert_eq!(samples.len(), 2048);
        assert_eq!(samples[1], i16::MAX);
        assert_eq!(samples[2047], i16::MIN);
    }

    #[test]
    fn test_cancel_response_requires_both_fields() {
        let ok = ClientEnvelope::parse(r#"{"type":"cancel_response","id":"item_1","offset":4800}"#)
            .expect("Should parse");
        assert_eq!(
            ok,
            ClientEnvelope::CancelResponse {
                id: "item_1".to_string(),
                offset: 4800
            }
        );

        let missing = ClientEnvelope::parse(r#"{"type":"cancel_response","id":"item_1"}"#);
        match missing {
            Err(EnvelopeError::InvalidShape { kind, .. }) => assert_eq!(kind, "cancel_response"),
            other => panic!("Expected InvalidShape, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_type_is_distinct_from_bad_shape() {
        assert_eq!(
            ClientEnvelope::parse(r#"{"type":"future_feature","x":1}"#),
            Err(EnvelopeError::UnknownType("future_feature".to_string()))
        );
        assert!(matches!(
            ClientEnvelope::parse(r#"{"type":"update_session","data":"nope"}"#),
            Err(EnvelopeError::InvalidShape { .. })
        ));
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            ClientEnvelope::parse("not json"),
            Err(EnvelopeError::Malformed(_))
        ));
        assert!(matches!(
            ClientEnvelope::parse(r#"{"data":1}"#),
            Err(EnvelopeError::Malformed(_))
        ));
        assert!(matches!(
            ClientEnvelope::parse(r#"{"type":5}"#),
            Err(EnvelopeError::Malformed(_))
        ));
    }

    #[test]
    fn test_user_message_text_and_parts() {
        let text = ClientEnvelope::parse(r#"{"type":"user_message","data":"hello"}"#)
            .expect("Should parse");
        assert_eq!(
            text,
            ClientEnvelope::UserMessage {
                data: UserContent::Text("hello".to_string())
            }
        );

        let parts = ClientEnvelope::parse(
            r#"{"type":"user_message","data":[{"type":"input_text","text":"hi"}]}"#,
        )
        .expect("Should parse");
        match parts {
            ClientEnvelope::UserMessage {
                data: UserContent::Parts(parts),
            } => assert_eq!(parts.len(), 1),
            _ => panic!("Expected multi-part UserMessage"),
        }
    }

    #[test]
    fn test_add_tool_defaults() {
        let msg = ClientEnvelope::parse(r#"{"type":"add_tool","tool":{"name":"echo"}}"#)
            .expect("Should parse");
        match msg {
            ClientEnvelope::AddTool { tool } => {
                assert_eq!(tool.name, "echo");
                assert!(tool.description.is_empty());
                assert_eq!(tool.parameters["type"], "object");
            }
            _ => panic!("Expected AddTool"),
        }
    }

    #[test]
    fn test_validate_sizes() {
        let long_text = ClientEnvelope::UserMessage {
            data: UserContent::Text("a".repeat(MAX_TEXT_SIZE + 1)),
        };
        assert!(matches!(
            long_text.validate(),
            Err(EnvelopeError::TooLarge { field: "data", .. })
        ));

        let mut data = SessionData::new();
        data.insert(
            "instructions".to_string(),
            json!("x".repeat(MAX_INSTRUCTIONS_SIZE + 1)),
        );
        assert!(ClientEnvelope::UpdateSession { data }.validate().is_err());

        let unnamed = ClientEnvelope::AddTool {
            tool: ToolSpec::new("", "", json!({})),
        };
        assert!(matches!(
            unnamed.validate(),
            Err(EnvelopeError::InvalidField { field: "tool", .. })
        ));

        assert!(ClientEnvelope::CreateResponse.validate().is_ok());
    }

    #[test]
    fn test_server_envelope_serialization() {
        let call = ServerEnvelope::ToolCall {
            tool: "echo".to_string(),
            params: json!({"x": 1}),
        };
        let json = serde_json::to_value(&call).unwrap();
        assert_eq!(json, json!({"type": "tool_call", "tool": "echo", "params": {"x": 1}}));

        let interrupted = serde_json::to_string(&ServerEnvelope::ConversationInterrupted).unwrap();
        assert_eq!(interrupted, r#"{"type":"conversation.interrupted"}"#);

        let error = serde_json::to_value(ServerEnvelope::Error {
            error: "boom".to_string(),
            code: None,
        })
        .unwrap();
        assert_eq!(error, json!({"type": "error", "error": "boom"}));
    }

    #[test]
    fn test_server_envelope_parse() {
        let parsed =
            ServerEnvelope::parse(r#"{"type":"realtime.event","event":{"type":"session.created"}}"#)
                .expect("Should parse");
        match parsed {
            ServerEnvelope::RealtimeEvent { event } => assert_eq!(event["type"], "session.created"),
            _ => panic!("Expected RealtimeEvent"),
        }
    }

    #[test]
    fn test_kind_matches_wire_name() {
        let msg = ClientEnvelope::ToolResponse {
            tool: "echo".to_string(),
            result: json!(null),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], msg.kind());
    }
}
