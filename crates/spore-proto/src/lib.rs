//! Spore protocol definitions.
//!
//! Shared protocol layer used by `spore-transport` and `spore-node`:
//!
//! - Node identity: Ed25519 keypair, PeerId, self-signed certificates
//! - Signed peer records and their verification
//! - Trust store of verified peers
//! - Wire message schema (prost)
//! - Length-prefixed frame codec
//! - TLS configuration for QUIC

pub mod codec;
pub mod error;
pub mod identity;
pub mod record;
pub mod tls;
pub mod trust;
pub mod wire;

pub use error::{AdmissionError, FrameError, ProtoError, VerificationError};
pub use identity::{derive_identity, Keypair, PeerId};
pub use record::TrustedPeerRecord;
pub use trust::{ChannelPolicy, MemoryTrustStore, TrustStore};
pub use wire::WireMessage;
