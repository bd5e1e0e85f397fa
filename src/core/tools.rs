//! Tool-call correlation.
//!
//! Calls are correlated by tool name, so at most one call per name may be in
//! flight at a time. Calls to different tools are independent.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ToolError {
    /// No callback registered under this name
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// A call for this tool is still waiting for its response
    #[error("Tool call already in flight for '{0}'")]
    AlreadyInFlight(String),

    /// A response arrived for a tool with no outstanding call
    #[error("No pending call for tool '{0}'")]
    NoPendingCall(String),

    /// The local callback failed
    #[error("Tool '{tool}' failed: {message}")]
    CallbackFailed { tool: String, message: String },
}

/// An upstream call waiting for the client's `tool_response`.
#[derive(Debug, Clone)]
pub struct PendingCall {
    pub call_id: String,
    pub started_at: Instant,
}

impl PendingCall {
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// Pending-call table keyed by tool name.
///
/// Owned by a single session; every lookup and resolution happens on that
/// session's dispatch loop.
#[derive(Debug, Default)]
pub struct PendingToolCalls {
    calls: HashMap<String, PendingCall>,
}

impl PendingToolCalls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new upstream call. Refused if the tool already has one.
    pub fn begin(&mut self, tool: &str, call_id: &str) -> Result<(), ToolError> {
        if self.calls.contains_key(tool) {
            return Err(ToolError::AlreadyInFlight(tool.to_string()));
        }
        self.calls.insert(
            tool.to_string(),
            PendingCall {
                call_id: call_id.to_string(),
                started_at: Instant::now(),
            },
        );
        Ok(())
    }

    /// Take the pending call for `tool`.
    pub fn resolve(&mut self, tool: &str) -> Result<PendingCall, ToolError> {
        self.calls
            .remove(tool)
            .ok_or_else(|| ToolError::NoPendingCall(tool.to_string()))
    }

    pub fn is_pending(&self, tool: &str) -> bool {
        self.calls.contains_key(tool)
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Drop every outstanding call, returning them for reporting.
    pub fn clear(&mut self) -> Vec<(String, PendingCall)> {
        self.calls.drain().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_and_resolve() {
        let mut pending = PendingToolCalls::new();
        pending.begin("echo", "call_1").unwrap();
        assert!(pending.is_pending("echo"));

        let call = pending.resolve("echo").unwrap();
        assert_eq!(call.call_id, "call_1");
        assert!(!pending.is_pending("echo"));
    }

    #[test]
    fn test_same_tool_refused_while_in_flight() {
        let mut pending = PendingToolCalls::new();
        pending.begin("echo", "call_1").unwrap();
        assert_eq!(
            pending.begin("echo", "call_2"),
            Err(ToolError::AlreadyInFlight("echo".to_string()))
        );

        // The original call is untouched
        assert_eq!(pending.resolve("echo").unwrap().call_id, "call_1");
    }

    #[test]
    fn test_different_tools_are_independent() {
        let mut pending = PendingToolCalls::new();
        pending.begin("echo", "call_1").unwrap();
        pending.begin("weather", "call_2").unwrap();
        assert_eq!(pending.len(), 2);

        assert_eq!(pending.resolve("weather").unwrap().call_id, "call_2");
        assert_eq!(pending.resolve("echo").unwrap().call_id, "call_1");
    }

    #[test]
    fn test_resolve_without_call() {
        let mut pending = PendingToolCalls::new();
        assert_eq!(
            pending.resolve("echo").unwrap_err(),
            ToolError::NoPendingCall("echo".to_string())
        );
    }

    #[test]
    fn test_clear() {
        let mut pending = PendingToolCalls::new();
        pending.begin("a", "1").unwrap();
        pending.begin("b", "2").unwrap();
        assert_eq!(pending.clear().len(), 2);
        assert!(pending.is_empty());
    }
}
