//! Client-side tool registry.
//!
//! A [`ToolBridge`] answers the relay's `tool_call` envelopes by running the
//! registered callback and sending exactly one `tool_response` (or an
//! `error` envelope naming the tool when nothing is registered under it).

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::transport::{TransportError, TransportEvent, TransportHandle};
use crate::core::envelope::{ClientEnvelope, ServerEnvelope, ToolSpec};
use crate::core::tools::ToolError;

/// Events buffered between [`ToolBridge::pump`] and its receiver.
const PUMP_BUFFER: usize = 256;

/// Future returned by a tool callback.
pub type ToolFuture = Pin<Box<dyn Future<Output = Result<Value, String>> + Send>>;

/// Tool implementation. `Err` carries a message reported back to the model.
pub type ToolCallback = Arc<dyn Fn(Value) -> ToolFuture + Send + Sync>;

/// Wrap an async closure as a [`ToolCallback`].
pub fn tool_callback<F, Fut>(f: F) -> ToolCallback
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, String>> + Send + 'static,
{
    Arc::new(move |params| Box::pin(f(params)))
}

struct RegisteredTool {
    spec: ToolSpec,
    callback: ToolCallback,
}

#[derive(Clone)]
pub struct ToolBridge {
    transport: TransportHandle,
    tools: Arc<RwLock<HashMap<String, RegisteredTool>>>,
}

impl ToolBridge {
    pub fn new(transport: TransportHandle) -> Self {
        Self {
            transport,
            tools: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register `callback` under `spec.name` and announce it to the relay.
    ///
    /// Returns the definition this registration replaced, if any.
    pub async fn register(
        &self,
        spec: ToolSpec,
        callback: ToolCallback,
    ) -> Result<Option<ToolSpec>, TransportError> {
        let previous = self
            .tools
            .write()
            .insert(
                spec.name.clone(),
                RegisteredTool {
                    spec: spec.clone(),
                    callback,
                },
            )
            .map(|old| old.spec);

        if previous.is_some() {
            tracing::warn!(tool = %spec.name, "Overwriting registered tool");
        }

        self.transport.send(ClientEnvelope::AddTool { tool: spec }).await?;
        Ok(previous)
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.tools.read().contains_key(name)
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.read().keys().cloned().collect()
    }

    /// Run the callback for `tool` on its own task and report the outcome.
    pub fn dispatch(&self, tool: String, params: Value) -> JoinHandle<()> {
        let callback = self.tools.read().get(&tool).map(|t| t.callback.clone());
        let transport = self.transport.clone();

        tokio::spawn(async move {
            let envelope = match callback {
                None => {
                    let error = ToolError::UnknownTool(tool.clone());
                    tracing::warn!(tool = %tool, "{}", error);
                    ClientEnvelope::Error {
                        error: error.to_string(),
                        tool: Some(tool),
                    }
                }
                Some(callback) => match callback(params).await {
                    Ok(result) => ClientEnvelope::ToolResponse { tool, result },
                    Err(message) => {
                        let error = ToolError::CallbackFailed {
                            tool: tool.clone(),
                            message: message.clone(),
                        };
                        tracing::warn!("{}", error);
                        ClientEnvelope::ToolResponse {
                            tool,
                            result: json!({ "error": message }),
                        }
                    }
                },
            };

            if let Err(e) = transport.send(envelope).await {
                tracing::warn!("Failed to report tool result: {}", e);
            }
        })
    }

    /// React to a transport event.
    ///
    /// Tool calls are dispatched; a reconnect re-announces every tool since the
    /// relay session behind the new socket knows none of them.
    pub async fn handle_event(&self, event: &TransportEvent) -> Option<JoinHandle<()>> {
        match event {
            TransportEvent::Message(ServerEnvelope::ToolCall { tool, params }) => {
                tracing::debug!(tool = %tool, "Dispatching tool call");
                Some(self.dispatch(tool.clone(), params.clone()))
            }
            TransportEvent::Open { reconnected: true } => {
                self.announce_all().await;
                None
            }
            _ => None,
        }
    }

    async fn announce_all(&self) {
        let specs: Vec<ToolSpec> = self.tools.read().values().map(|t| t.spec.clone()).collect();
        for tool in specs {
            let name = tool.name.clone();
            if let Err(e) = self.transport.send(ClientEnvelope::AddTool { tool }).await {
                tracing::warn!(tool = %name, "Failed to re-announce tool: {}", e);
            }
        }
    }

    /// Handle tool traffic on `events` in the background and pass every
    /// event through to the returned receiver.
    ///
    /// Dropping the receiver is fine: tools are still served. Holding it
    /// without reading is not. Once its buffer fills, forwarding waits, and
    /// so do the transport's own event sends.
    pub fn pump(self, mut events: mpsc::Receiver<TransportEvent>) -> mpsc::Receiver<TransportEvent> {
        let (tx, rx) = mpsc::channel(PUMP_BUFFER);
        tokio::spawn(async move {
            let mut forwarding = true;
            while let Some(event) = events.recv().await {
                self.handle_event(&event).await;
                if forwarding && tx.send(event).await.is_err() {
                    tracing::debug!("Transport event receiver dropped; serving tools only");
                    forwarding = false;
                }
            }
        });
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::transport::{ReconnectingTransport, TransportConfig};

    fn bridge() -> ToolBridge {
        let (handle, _events) =
            ReconnectingTransport::spawn(TransportConfig::new("ws://127.0.0.1:9/relay"));
        ToolBridge::new(handle)
    }

    #[tokio::test]
    async fn test_register_returns_previous_definition() {
        let bridge = bridge();
        let echo = ToolSpec::new("echo", "v1", json!({}));
        let cb = tool_callback(|params| async move { Ok(params) });

        assert_eq!(bridge.register(echo.clone(), cb.clone()).await.unwrap(), None);
        let replaced = bridge
            .register(ToolSpec::new("echo", "v2", json!({})), cb)
            .await
            .unwrap();
        assert_eq!(replaced, Some(echo));
        assert!(bridge.is_registered("echo"));
        assert_eq!(bridge.tool_names(), vec!["echo".to_string()]);
    }

    #[tokio::test]
    async fn test_callback_wrapper() {
        let cb = tool_callback(|params| async move {
            match params.get("fail") {
                Some(_) => Err("boom".to_string()),
                None => Ok(json!({"ok": true})),
            }
        });
        assert_eq!(cb(json!({})).await, Ok(json!({"ok": true})));
        assert_eq!(cb(json!({"fail": 1})).await, Err("boom".to_string()));
    }
}
