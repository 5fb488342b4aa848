//! Error types for the Spore protocol crate.
//!
//! Trust failures get their own enums ([`VerificationError`],
//! [`AdmissionError`]) because callers react to them differently from
//! malformed input: a rejected record is dropped and processing continues.
//! Framing failures ([`FrameError`]) are shared with the transport crate,
//! which drives the async half of the codec.

use thiserror::Error;

use crate::identity::PeerId;

/// Errors that can occur within the `spore-proto` crate.
#[derive(Debug, Error)]
pub enum ProtoError {
    // --- Identity ---
    #[error("failed to generate Ed25519 keypair: {0}")]
    KeyGeneration(String),

    #[error("invalid peer id: {0}")]
    InvalidPeerId(String),

    #[error("failed to generate X.509 certificate: {0}")]
    CertificateGeneration(String),

    // --- TLS / Verification ---
    #[error("certificate verification failed: {0}")]
    CertificateVerification(String),

    #[error("TLS configuration error: {0}")]
    TlsConfiguration(String),

    // --- Serialization ---
    #[error("protobuf decode error: {0}")]
    ProtobufDecode(#[from] prost::DecodeError),

    #[error("wire envelope carries no message")]
    EmptyEnvelope,
}

/// Result type alias using [`ProtoError`].
pub type Result<T> = std::result::Result<T, ProtoError>;

/// Why a [`TrustedPeerRecord`](crate::record::TrustedPeerRecord) failed
/// verification. Variants are listed in the order the checks run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerificationError {
    #[error("malformed public key: {0}")]
    MalformedKey(String),

    #[error("peer id mismatch: record claims {claimed}, key derives {derived}")]
    IdentityMismatch { claimed: String, derived: String },

    #[error("peer record signature is invalid")]
    SignatureInvalid,
}

/// Why a trust store refused a record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionError {
    #[error(transparent)]
    Verification(#[from] VerificationError),

    #[error("peer {0} is denied")]
    Denied(PeerId),
}

/// Errors from reading or writing length-prefixed frames.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame of {len} bytes exceeds maximum of {max}")]
    TooLarge { len: usize, max: usize },

    #[error("short read: expected {expected} bytes, source ended after {received}")]
    ShortRead { expected: usize, received: usize },

    #[error("end of stream")]
    EndOfStream,

    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),
}
