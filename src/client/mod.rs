//! Client side of the relay: a reconnecting duplex transport and the tool
//! bridge that answers `tool_call`s over it.

pub mod reconnect;
pub mod tools;
pub mod transport;

pub use reconnect::ReconnectionConfig;
pub use tools::{ToolBridge, ToolCallback, ToolFuture, tool_callback};
pub use transport::{
    ReconnectingTransport, TransportConfig, TransportError, TransportEvent, TransportHandle,
    TransportState, TransportStatus,
};
