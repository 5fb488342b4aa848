//! Error types for the node runtime.

use spore_proto::ProtoError;
use spore_transport::TransportError;
use thiserror::Error;

/// Errors that can occur while running a node.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtoError),

    #[error("expected {expected} reply, got {actual}")]
    UnexpectedReply {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("system clock error: {0}")]
    Clock(String),
}

impl NodeError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, NodeError::Transport(e) if e.is_cancelled())
    }
}

pub type Result<T> = std::result::Result<T, NodeError>;
