//! OpenAI Realtime API WebSocket message types.
//!
//! This module defines the client and server event types for the OpenAI Realtime API.
//! All events are JSON-encoded and sent over WebSocket.
//!
//! # Protocol Overview
//!
//! Client events (sent to server):
//! - session.update - Update session configuration
//! - input_audio_buffer.append - Append audio to buffer
//! - conversation.item.create - Add item to conversation
//! - conversation.item.truncate - Truncate assistant audio after an interruption
//! - response.create - Generate a response
//! - response.cancel - Cancel current response
//!
//! Server events are only partially typed: the relay forwards every event
//! verbatim and only interprets the ones listed in [`ServerEvent`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::audio;
use crate::core::envelope::{AudioPayload, ToolSpec, UserContent, UserContentPart};
use crate::core::realtime::base::RealtimeResult;

// =============================================================================
// Session Configuration
// =============================================================================

/// Session configuration for OpenAI Realtime API.
///
/// Fields the relay needs to inspect are typed; everything else the client
/// sends is carried through in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Response modalities (text, audio)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modalities: Option<Vec<String>>,

    /// System instructions for the assistant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    /// Voice for audio output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,

    /// Input audio format
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_audio_format: Option<String>,

    /// Output audio format
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_audio_format: Option<String>,

    /// Tools available to the model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDef>>,

    /// Tool choice strategy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,

    /// Temperature for response generation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Any other session fields, passed through untouched
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SessionConfig {
    /// Add `tools` that the session does not already define by name.
    pub fn merge_tools(&mut self, tools: &[ToolSpec]) {
        if tools.is_empty() {
            return;
        }
        let defs = self.tools.get_or_insert_with(Vec::new);
        for tool in tools {
            if !defs.iter().any(|d| d.name == tool.name) {
                defs.push(ToolDef::from(tool));
            }
        }
    }
}

/// Tool definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDef {
    /// Tool type (always "function")
    #[serde(rename = "type", default = "function_type")]
    pub tool_type: String,
    /// Function name
    pub name: String,
    /// Function description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Function parameters JSON schema
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

fn function_type() -> String {
    "function".to_string()
}

impl From<&ToolSpec> for ToolDef {
    fn from(spec: &ToolSpec) -> Self {
        Self {
            tool_type: function_type(),
            name: spec.name.clone(),
            description: Some(spec.description.clone()),
            parameters: Some(spec.parameters.clone()),
        }
    }
}

// =============================================================================
// Conversation Items
// =============================================================================

/// Conversation item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationItem {
    /// Item ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Item type
    #[serde(rename = "type")]
    pub item_type: String,
    /// Item role (user, assistant, system)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Content parts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Vec<ContentPart>>,
    /// Call ID for function call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    /// Function name for function call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Function arguments for function call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
    /// Function output for function call result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl ConversationItem {
    /// A user message built from client content.
    pub fn user_message(content: UserContent) -> RealtimeResult<Self> {
        let parts = match content {
            UserContent::Text(text) => vec![ContentPart::input_text(text)],
            UserContent::Parts(parts) => parts
                .into_iter()
                .map(ContentPart::try_from)
                .collect::<RealtimeResult<Vec<_>>>()?,
        };

        Ok(Self {
            item_type: "message".to_string(),
            role: Some("user".to_string()),
            content: Some(parts),
            ..Default::default()
        })
    }

    /// Output for a completed function call.
    pub fn function_call_output(call_id: &str, output: &str) -> Self {
        Self {
            item_type: "function_call_output".to_string(),
            call_id: Some(call_id.to_string()),
            output: Some(output.to_string()),
            ..Default::default()
        }
    }
}

/// Content part within a conversation item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentPart {
    /// Content type (input_text, input_audio, text, audio)
    #[serde(rename = "type")]
    pub content_type: String,
    /// Text content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Audio content (base64 encoded)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<String>,
}

impl ContentPart {
    pub fn input_text(text: String) -> Self {
        Self {
            content_type: "input_text".to_string(),
            text: Some(text),
            audio: None,
        }
    }
}

impl TryFrom<UserContentPart> for ContentPart {
    type Error = crate::core::realtime::base::RealtimeError;

    fn try_from(part: UserContentPart) -> Result<Self, Self::Error> {
        match part {
            UserContentPart::InputText { text } => Ok(Self::input_text(text)),
            UserContentPart::InputAudio { audio } => {
                // Re-encode so numeric payloads reach upstream as base64 PCM16
                let samples = audio.to_samples()?;
                Ok(Self {
                    content_type: "input_audio".to_string(),
                    text: None,
                    audio: Some(audio::encode_samples(&samples)),
                })
            }
        }
    }
}

// =============================================================================
// Client Events (sent to server)
// =============================================================================

/// Client events sent to the OpenAI Realtime API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Update session configuration
    #[serde(rename = "session.update")]
    SessionUpdate {
        /// Session configuration
        session: SessionConfig,
    },

    /// Append audio to input buffer
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend {
        /// Base64-encoded audio data
        audio: String,
    },

    /// Create a conversation item
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate {
        /// Item to create
        item: ConversationItem,
        /// Previous item ID to insert after
        #[serde(default, skip_serializing_if = "Option::is_none")]
        previous_item_id: Option<String>,
    },

    /// Truncate a conversation item
    #[serde(rename = "conversation.item.truncate")]
    ConversationItemTruncate {
        /// Item ID
        item_id: String,
        /// Content index
        content_index: u32,
        /// Audio end in ms
        audio_end_ms: u64,
    },

    /// Create a response
    #[serde(rename = "response.create")]
    ResponseCreate,

    /// Cancel the current response
    #[serde(rename = "response.cancel")]
    ResponseCancel,
}

impl ClientEvent {
    /// Create an audio append event from PCM16 samples.
    pub fn audio_append(samples: &[i16]) -> Self {
        ClientEvent::InputAudioBufferAppend {
            audio: audio::encode_samples(samples),
        }
    }

    /// Event type name, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SessionUpdate { .. } => "session.update",
            Self::InputAudioBufferAppend { .. } => "input_audio_buffer.append",
            Self::ConversationItemCreate { .. } => "conversation.item.create",
            Self::ConversationItemTruncate { .. } => "conversation.item.truncate",
            Self::ResponseCreate => "response.create",
            Self::ResponseCancel => "response.cancel",
        }
    }
}

// =============================================================================
// Server Events (received from server)
// =============================================================================

/// Server events the relay interprets. Anything else is `Other`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Error event
    #[serde(rename = "error")]
    Error {
        /// Error details
        error: ApiError,
    },

    /// Session created
    #[serde(rename = "session.created")]
    SessionCreated {
        /// Session details
        session: Session,
    },

    /// Speech started in the input buffer
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted {
        #[serde(default)]
        audio_start_ms: u64,
        #[serde(default)]
        item_id: Option<String>,
    },

    #[serde(rename = "conversation.item.created")]
    ConversationItemCreated,

    #[serde(rename = "conversation.item.truncated")]
    ConversationItemTruncated,

    #[serde(rename = "conversation.item.deleted")]
    ConversationItemDeleted,

    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    TranscriptionCompleted,

    /// Output item added; carries function name for later arguments events
    #[serde(rename = "response.output_item.added")]
    OutputItemAdded {
        item: ConversationItem,
    },

    #[serde(rename = "response.output_item.done")]
    OutputItemDone,

    #[serde(rename = "response.text.delta")]
    TextDelta,

    #[serde(rename = "response.audio_transcript.delta")]
    AudioTranscriptDelta,

    /// Audio chunk
    #[serde(rename = "response.audio.delta")]
    AudioDelta {
        /// Base64-encoded PCM16
        delta: String,
    },

    #[serde(rename = "response.function_call_arguments.delta")]
    FunctionCallArgumentsDelta,

    /// Function call arguments complete
    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone {
        call_id: String,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        arguments: String,
    },

    /// Every other event type
    #[serde(other)]
    Other,
}

impl ServerEvent {
    /// Whether this event changes the conversation the client renders.
    pub fn updates_conversation(&self) -> bool {
        matches!(
            self,
            Self::ConversationItemCreated
                | Self::ConversationItemTruncated
                | Self::ConversationItemDeleted
                | Self::TranscriptionCompleted
                | Self::OutputItemAdded { .. }
                | Self::OutputItemDone
                | Self::TextDelta
                | Self::AudioTranscriptDelta
                | Self::AudioDelta { .. }
                | Self::FunctionCallArgumentsDelta
                | Self::FunctionCallArgumentsDone { .. }
        )
    }
}

/// API error details.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiError {
    /// Error type
    #[serde(rename = "type", default)]
    pub error_type: String,
    /// Error code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Error message
    #[serde(default)]
    pub message: String,
}

/// Session details.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Session {
    /// Session ID
    #[serde(default)]
    pub id: String,
    /// Model
    #[serde(default)]
    pub model: String,
}

// =============================================================================
// Tests
// =============================================================================
