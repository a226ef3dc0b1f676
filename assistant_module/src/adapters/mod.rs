//! Inbound adapters for messaging platforms.

pub mod line;

pub use line::{
    EventSource, InboundEvent, JoinEvent, LineInboundAdapter, Mention, MessageEvent, SourceKind,
};

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("failed to parse webhook payload: {0}")]
    ParseError(String),
}
