//! HTTP and WebSocket request handlers
//!
//! - `api` - Health check and session statistics
//! - `relay` - Duplex relay WebSocket between browsers and the upstream provider

pub mod api;
pub mod relay;

// Re-export commonly used handlers for convenient access
pub use relay::relay_handler;
