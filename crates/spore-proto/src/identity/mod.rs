//! Node identity primitives: Ed25519 keypair, PeerId, X.509 certificates.
//!
//! The PeerId is the lowercase hex SHA-256 of the Ed25519 public key.

pub mod certificate;
pub mod keypair;
pub mod peer_id;

pub use certificate::Certificate;
pub use keypair::Keypair;
pub use peer_id::{derive_identity, PeerId};
