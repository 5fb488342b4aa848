//! PeerId: the stable pseudonymous identity of a Spore node.
//!
//! PeerId = SHA-256(public key bytes). The canonical text form is the
//! lowercase hex encoding of the full 32-byte digest (64 characters); this is
//! the `id` carried in every [`TrustedPeerRecord`](crate::record::TrustedPeerRecord)
//! and the key used by the transport's connection pool.
//!
//! SHA-256 reference: `sha2` crate (RustCrypto, MIT/Apache-2.0)
//! Hex reference: `data-encoding` crate (MIT/Apache-2.0)

use data_encoding::HEXLOWER;
use sha2::{Digest, Sha256};

use crate::error::{ProtoError, Result};

/// Length of the hex text form.
const HEX_LEN: usize = 64;

/// Number of hex characters shown by [`PeerId::short_id`].
const SHORT_LEN: usize = 12;

/// Derive the canonical identifier string for a public key.
///
/// Accepts any byte slice so received records can be checked before their
/// key length is known to be valid.
pub fn derive_identity(public_key: &[u8]) -> String {
    PeerId::from_public_key(public_key).to_hex()
}

/// A PeerId uniquely identifies a Spore node.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId {
    hash: [u8; 32],
}

impl PeerId {
    /// Derive a PeerId from public key bytes.
    pub fn from_public_key(public_key: &[u8]) -> Self {
        let hash: [u8; 32] = Sha256::digest(public_key).into();
        Self { hash }
    }

    /// Construct a PeerId from a raw 32-byte digest.
    pub fn from_hash(hash: [u8; 32]) -> Self {
        Self { hash }
    }

    /// Parse the canonical lowercase hex form.
    ///
    /// Uppercase input is rejected: identifiers are compared as strings on the
    /// wire, so only the canonical form is accepted.
    pub fn from_hex(s: &str) -> Result<Self> {
        if s.len() != HEX_LEN {
            return Err(ProtoError::InvalidPeerId(format!(
                "expected {HEX_LEN} hex characters, got {}",
                s.len()
            )));
        }
        let decoded = HEXLOWER
            .decode(s.as_bytes())
            .map_err(|e| ProtoError::InvalidPeerId(format!("hex decode: {e}")))?;

        let mut hash = [0u8; 32];
        hash.copy_from_slice(&decoded);
        Ok(Self { hash })
    }

    /// Returns the full 32-byte digest.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.hash
    }

    /// Returns the canonical lowercase hex string.
    pub fn to_hex(&self) -> String {
        HEXLOWER.encode(&self.hash)
    }

    /// Returns a shortened hex prefix for log lines.
    pub fn short_id(&self) -> String {
        let mut hex = self.to_hex();
        hex.truncate(SHORT_LEN);
        hex
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl std::fmt::Debug for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PeerId({})", self.short_id())
    }
}

impl std::str::FromStr for PeerId {
    type Err = ProtoError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_public_key() -> [u8; 32] {
        [
            0xd7, 0x5a, 0x98, 0x01, 0x82, 0xb1, 0x0a, 0xb7, 0xd5, 0x4b, 0xfe, 0xd3, 0xc9, 0x64,
            0x07, 0x3a, 0x0e, 0xe1, 0x72, 0xf3, 0xda, 0xa3, 0x23, 0x25, 0x44, 0x85, 0x16, 0x89,
            0xc6, 0x07, 0xfd, 0x54,
        ]
    }

    #[test]
    fn deterministic_derivation() {
        let a = PeerId::from_public_key(&test_public_key());
        let b = PeerId::from_public_key(&test_public_key());
        assert_eq!(a, b);
        assert_eq!(derive_identity(&test_public_key()), a.to_hex());
    }

    #[test]
    fn matches_known_sha256_vector() {
        // SHA-256 of the empty string.
        assert_eq!(
            derive_identity(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn hex_is_lowercase_and_full_length() {
        let id = derive_identity(&test_public_key());
        assert_eq!(id.len(), 64);
        assert!(id.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[test]
    fn hex_roundtrip() {
        let id = PeerId::from_public_key(&test_public_key());
        let parsed = PeerId::from_hex(&id.to_hex()).expect("should parse own hex output");
        assert_eq!(parsed, id);
    }

    #[test]
    fn rejects_uppercase_and_wrong_length() {
        let upper = derive_identity(&test_public_key()).to_uppercase();
        assert!(PeerId::from_hex(&upper).is_err());
        assert!(PeerId::from_hex("abcd").is_err());
        assert!(PeerId::from_hex("").is_err());
    }

    #[test]
    fn different_keys_produce_different_ids() {
        assert_ne!(derive_identity(&[1u8; 32]), derive_identity(&[2u8; 32]));
    }

    #[test]
    fn short_id_is_hex_prefix() {
        let id = PeerId::from_public_key(&test_public_key());
        assert!(id.to_hex().starts_with(&id.short_id()));
        assert_eq!(id.short_id().len(), 12);
    }
}
