pub mod audio;
pub mod envelope;
pub mod queue;
pub mod realtime;
pub mod tools;

// Re-export commonly used types for convenience
pub use audio::AudioCodecError;

pub use envelope::{
    AudioPayload, ClientEnvelope, EnvelopeError, ServerEnvelope, SessionData, ToolSpec,
    UserContent, UserContentPart,
};

pub use queue::{CommandQueue, DEFAULT_QUEUE_LIMIT, QueueError};

pub use realtime::{
    BaseRealtime, BoxedRealtime, ConnectionState, FunctionCallRequest, OpenAIRealtime,
    OpenAIRealtimeFactory, RealtimeConfig, RealtimeError, RealtimeFactory, RealtimeResult,
    UpstreamEvent,
};

pub use tools::{PendingCall, PendingToolCalls, ToolError};
