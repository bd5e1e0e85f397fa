//! Upstream realtime providers.
//!
//! The relay talks to its upstream through [`BaseRealtime`]. Sessions get a
//! fresh provider from a [`RealtimeFactory`] so tests can substitute their own.

mod base;
pub mod openai;

pub use base::{
    BaseRealtime, BoxedRealtime, ConnectionState, FunctionCallRequest, RealtimeConfig,
    RealtimeError, RealtimeFactory, RealtimeResult, UpstreamEvent, UpstreamEventSender,
};
pub use openai::{OpenAIRealtime, OpenAIRealtimeFactory};
