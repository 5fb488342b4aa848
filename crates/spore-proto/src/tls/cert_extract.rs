//! Peer identity from a presented X.509 certificate.
//!
//! After the QUIC handshake, the leaf certificate carries the peer's Ed25519
//! identity key. Deriving the [`PeerId`] from it lets the transport label the
//! channel and compare it with the id a signed record claims.
//!
//! Reference: `x509-parser` crate (rusticata, MIT/Apache-2.0)

use oid_registry::Oid;
use x509_parser::prelude::*;

use crate::error::{ProtoError, Result};
use crate::identity::keypair::PUBLIC_KEY_LEN;
use crate::identity::PeerId;

/// id-Ed25519, RFC 8410.
const ED25519_OID: &[u64] = &[1, 3, 101, 112];

/// Extract the raw Ed25519 public key from a DER certificate.
pub fn extract_ed25519_public_key(cert_der: &[u8]) -> Result<[u8; PUBLIC_KEY_LEN]> {
    let (_, cert) = X509Certificate::from_der(cert_der)
        .map_err(|e| ProtoError::CertificateVerification(format!("X.509 parse error: {e}")))?;

    let ed25519 = Oid::from(ED25519_OID)
        .map_err(|e| ProtoError::CertificateVerification(format!("Ed25519 OID: {e:?}")))?;

    let spki = cert.public_key();
    if spki.algorithm.algorithm != ed25519 {
        return Err(ProtoError::CertificateVerification(format!(
            "certificate key is not Ed25519 (algorithm {})",
            spki.algorithm.algorithm
        )));
    }

    let raw_key: &[u8] = spki.subject_public_key.as_ref();
    raw_key.try_into().map_err(|_| {
        ProtoError::CertificateVerification(format!(
            "Ed25519 key must be {PUBLIC_KEY_LEN} bytes, got {}",
            raw_key.len()
        ))
    })
}

/// Derive the channel-level [`PeerId`] of a certificate's holder.
pub fn peer_id_from_certificate(cert_der: &[u8]) -> Result<PeerId> {
    extract_ed25519_public_key(cert_der).map(|key| PeerId::from_public_key(&key))
}
