//! Signing and verification of [`TrustedPeerRecord`]s.
//!
//! A record is signed once by its owner over the *signable projection*: the
//! protobuf encoding of the record with `signature` cleared. Signer and
//! verifier both go through [`signable_projection`], so the two can never
//! disagree about which bytes were signed.
//!
//! Verification runs three checks in a fixed order, cheapest first:
//!
//! 1. the public key is exactly 32 bytes ([`VerificationError::MalformedKey`]);
//! 2. `id` equals the identity derived from the key
//!    ([`VerificationError::IdentityMismatch`]);
//! 3. the Ed25519 signature matches the projection
//!    ([`VerificationError::SignatureInvalid`]).

use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use prost::Message;

use crate::error::VerificationError;
use crate::identity::keypair::PUBLIC_KEY_LEN;
use crate::identity::{Keypair, PeerId};

pub use crate::wire::TrustedPeerRecord;

/// The exact bytes that are signed and verified for `record`.
pub fn signable_projection(record: &TrustedPeerRecord) -> Vec<u8> {
    let mut unsigned = record.clone();
    unsigned.signature.clear();
    unsigned.encode_to_vec()
}

/// Return a copy of `record` signed by `keypair`.
///
/// Only the signature is touched; the caller is responsible for `id` and
/// `public_key` matching the keypair (see [`TrustedPeerRecord::unsigned`]).
pub fn sign(record: &TrustedPeerRecord, keypair: &Keypair) -> TrustedPeerRecord {
    let mut signed = record.clone();
    signed.signature = keypair.sign(&signable_projection(record)).to_vec();
    signed
}

/// Verify a received record, returning the peer's id on success.
pub fn verify(record: &TrustedPeerRecord) -> Result<PeerId, VerificationError> {
    let key_bytes: [u8; PUBLIC_KEY_LEN] = record
        .public_key
        .as_slice()
        .try_into()
        .map_err(|_| {
            VerificationError::MalformedKey(format!(
                "expected {PUBLIC_KEY_LEN}-byte Ed25519 key, got {} bytes",
                record.public_key.len()
            ))
        })?;

    let peer_id = PeerId::from_public_key(&key_bytes);
    let derived = peer_id.to_hex();
    if record.id != derived {
        return Err(VerificationError::IdentityMismatch {
            claimed: record.id.clone(),
            derived,
        });
    }

    let verifying_key = VerifyingKey::from_bytes(&key_bytes)
        .map_err(|e| VerificationError::MalformedKey(format!("not a curve point: {e}")))?;
    let signature = Signature::from_slice(&record.signature)
        .map_err(|_| VerificationError::SignatureInvalid)?;

    verifying_key
        .verify(&signable_projection(record), &signature)
        .map_err(|_| VerificationError::SignatureInvalid)?;

    Ok(peer_id)
}

impl TrustedPeerRecord {
    /// Build an unsigned record owned by `keypair`, with `id` and
    /// `public_key` filled in from the key.
    pub fn unsigned(
        keypair: &Keypair,
        address: impl Into<String>,
        capabilities: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        let public_key = keypair.public_key_bytes();
        Self {
            id: PeerId::from_public_key(&public_key).to_hex(),
            address: address.into(),
            public_key: public_key.to_vec(),
            capabilities: capabilities.into_iter().map(Into::into).collect(),
            signature: Vec::new(),
        }
    }

    /// Build and sign a record in one step.
    pub fn signed(
        keypair: &Keypair,
        address: impl Into<String>,
        capabilities: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        sign(&Self::unsigned(keypair, address, capabilities), keypair)
    }

    pub fn verify(&self) -> Result<PeerId, VerificationError> {
        verify(self)
    }
}
