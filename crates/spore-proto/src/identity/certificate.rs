//! Self-signed X.509 certificates for the QUIC channel.
//!
//! Each node wraps its Ed25519 identity key in a short-lived self-signed
//! certificate. The certificate only carries the key into the TLS handshake;
//! trust in a peer comes from its signed peer record, not from the
//! certificate chain.
//!
//! Reference: `rcgen` crate (rustls team, MIT/Apache-2.0)
//! <https://github.com/rustls/rcgen>

use rcgen::{CertificateParams, KeyPair as RcgenKeyPair, PKCS_ED25519};
use rustls_pki_types::PrivatePkcs8KeyDer;
use time::OffsetDateTime;

use crate::error::{ProtoError, Result};
use crate::identity::keypair::Keypair;

/// Certificate lifetime in seconds (one day).
const VALIDITY_SECS: i64 = 24 * 60 * 60;

/// The certificate is backdated by this much to tolerate clock skew.
const BACKDATE_SECS: i64 = 60;

/// Subject alternative name placed in every certificate.
const SUBJECT_NAME: &str = "spore";

/// A self-signed certificate wrapping a node identity key.
pub struct Certificate {
    cert_der: Vec<u8>,
    cert_pem: String,
    not_before_epoch: i64,
    not_after_epoch: i64,
}

impl Certificate {
    /// Generate a certificate valid from one minute before `now_epoch_secs`
    /// until one day after it.
    pub fn generate(keypair: &Keypair, now_epoch_secs: i64) -> Result<Self> {
        let pkcs8 = PrivatePkcs8KeyDer::from(keypair.to_pkcs8_der()?);
        let signer = RcgenKeyPair::from_pkcs8_der_and_sign_algo(&pkcs8, &PKCS_ED25519)
            .map_err(|e| ProtoError::CertificateGeneration(e.to_string()))?;

        let not_before_epoch = now_epoch_secs - BACKDATE_SECS;
        let not_after_epoch = now_epoch_secs + VALIDITY_SECS;

        let mut params = CertificateParams::new(vec![SUBJECT_NAME.to_string()])
            .map_err(|e| ProtoError::CertificateGeneration(format!("invalid cert params: {e}")))?;
        params.not_before = OffsetDateTime::from_unix_timestamp(not_before_epoch)
            .map_err(|e| ProtoError::CertificateGeneration(format!("invalid not_before: {e}")))?;
        params.not_after = OffsetDateTime::from_unix_timestamp(not_after_epoch)
            .map_err(|e| ProtoError::CertificateGeneration(format!("invalid not_after: {e}")))?;

        let cert = params
            .self_signed(&signer)
            .map_err(|e| ProtoError::CertificateGeneration(e.to_string()))?;

        Ok(Self {
            cert_der: cert.der().to_vec(),
            cert_pem: cert.pem(),
            not_before_epoch,
            not_after_epoch,
        })
    }

    /// True once `now_epoch_secs` is outside the validity window.
    pub fn is_expired(&self, now_epoch_secs: i64) -> bool {
        now_epoch_secs < self.not_before_epoch || now_epoch_secs >= self.not_after_epoch
    }

    /// DER-encoded certificate bytes.
    pub fn der(&self) -> &[u8] {
        &self.cert_der
    }

    /// PEM-encoded certificate.
    pub fn pem(&self) -> &str {
        &self.cert_pem
    }

    pub fn not_after_epoch(&self) -> i64 {
        self.not_after_epoch
    }
}
