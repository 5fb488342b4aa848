//! Ed25519 node keypair.
//!
//! Reference implementation: `ed25519-dalek` (MIT/Apache-2.0)
//! <https://github.com/dalek-cryptography/curve25519-dalek>
//!
//! The same key signs the node's [`TrustedPeerRecord`](crate::record::TrustedPeerRecord)
//! and backs its self-signed TLS certificate, so the PeerId seen at the QUIC
//! layer and the one carried in the record agree.

use ed25519_dalek::{pkcs8::EncodePrivateKey, Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;

use crate::error::{ProtoError, Result};
use crate::identity::PeerId;

/// Size in bytes of an Ed25519 public key.
pub const PUBLIC_KEY_LEN: usize = ed25519_dalek::PUBLIC_KEY_LENGTH;

/// Size in bytes of an Ed25519 signature.
pub const SIGNATURE_LEN: usize = ed25519_dalek::SIGNATURE_LENGTH;

/// An Ed25519 identity keypair for a Spore node.
///
/// The inner [`SigningKey`] is zeroized on drop.
pub struct Keypair {
    signing_key: SigningKey,
}

impl Keypair {
    /// Generate a new random keypair using the OS CSPRNG.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Reconstruct a keypair from a 32-byte secret key.
    pub fn from_secret_bytes(bytes: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(bytes),
        }
    }

    /// Returns the 32-byte secret key.
    ///
    /// **Security:** the caller is responsible for storing this securely.
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Returns the raw 32-byte public key.
    pub fn public_key_bytes(&self) -> [u8; PUBLIC_KEY_LEN] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// The PeerId derived from this keypair's public key.
    pub fn peer_id(&self) -> PeerId {
        PeerId::from_public_key(&self.public_key_bytes())
    }

    /// Sign `message`, returning the 64-byte signature.
    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_LEN] {
        self.signing_key.sign(message).to_bytes()
    }

    /// Returns the PKCS#8 DER encoding of the keypair, as required by
    /// `rcgen` and rustls.
    pub fn to_pkcs8_der(&self) -> Result<Vec<u8>> {
        let doc = self
            .signing_key
            .to_pkcs8_der()
            .map_err(|e| ProtoError::KeyGeneration(e.to_string()))?;
        Ok(doc.as_bytes().to_vec())
    }
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keypair")
            .field("peer_id", &self.peer_id())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signature, Verifier};

    #[test]
    fn secret_bytes_roundtrip() {
        let kp1 = Keypair::generate();
        let kp2 = Keypair::from_secret_bytes(&kp1.secret_bytes());
        assert_eq!(kp1.public_key_bytes(), kp2.public_key_bytes());
        assert_eq!(kp1.peer_id(), kp2.peer_id());
    }

    #[test]
    fn signature_verifies_with_public_key() {
        let kp = Keypair::generate();
        let sig = Signature::from_bytes(&kp.sign(b"hello"));
        assert!(kp.verifying_key().verify(b"hello", &sig).is_ok());
        assert!(kp.verifying_key().verify(b"hellp", &sig).is_err());
    }

    #[test]
    fn pkcs8_der_is_nonempty() {
        let kp = Keypair::generate();
        let der = kp.to_pkcs8_der().expect("PKCS#8 export should succeed");
        assert!(!der.is_empty());
    }

    #[test]
    fn debug_does_not_leak_secret() {
        let kp = Keypair::generate();
        let rendered = format!("{kp:?}");
        assert!(rendered.contains("peer_id"));
        assert!(!rendered.contains(&format!("{:?}", kp.secret_bytes())));
    }
}
