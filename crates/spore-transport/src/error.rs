//! Error types for the transport layer.

use std::io;

use spore_proto::FrameError;
use thiserror::Error;

use crate::stream::SendFailure;

/// Errors that can occur in the transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("endpoint error: {0}")]
    Endpoint(String),

    #[error("TLS configuration error: {0}")]
    TlsConfig(String),

    #[error("connect error: {0}")]
    Connect(#[from] quinn::ConnectError),

    #[error("connection failed: {0}")]
    Connection(#[from] quinn::ConnectionError),

    #[error("failed to extract peer identity: {0}")]
    PeerIdentity(String),

    #[error("no trusted record or address for peer {0}")]
    UnknownPeer(String),

    #[error("dialed {expected} but the channel authenticated {actual}")]
    ChannelIdentityMismatch { expected: String, actual: String },

    #[error("stream closed")]
    StreamClosed,

    #[error("send failed ({failure:?}): {source}")]
    Send {
        failure: SendFailure,
        #[source]
        source: io::Error,
    },

    #[error("close failed: {0}")]
    Close(#[source] io::Error),

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("operation cancelled")]
    Cancelled,

    #[error("{0} timed out")]
    TimedOut(&'static str),

    #[error("transport is shut down")]
    Shutdown,

    #[error("protocol error: {0}")]
    Protocol(#[from] spore_proto::ProtoError),
}

impl TransportError {
    /// True when the caller abandoned the operation, as opposed to it failing.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TransportError::Cancelled)
    }

    /// True when the peer finished its side of the stream between frames.
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, TransportError::Frame(FrameError::EndOfStream))
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
