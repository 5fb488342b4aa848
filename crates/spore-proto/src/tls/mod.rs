//! TLS material for the QUIC channel.
//!
//! - Peer identity from X.509 DER (Ed25519 key → PeerId)
//! - Custom rustls verifiers applying the [`ChannelPolicy`](crate::trust::ChannelPolicy)
//! - TLS config builders (accepting and dialing side)

pub mod cert_extract;
pub mod config;
pub mod verifier;
