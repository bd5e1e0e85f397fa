//! Routing between the relay session and the client socket writer.

use crate::core::envelope::ServerEnvelope;

/// Work item for the client socket writer task.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayMessageRoute {
    /// JSON text envelope
    Outgoing(ServerEnvelope),
    /// Send a close frame and stop writing
    Close,
}
