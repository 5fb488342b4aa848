//! Custom rustls verifiers for Spore's self-signed certificates.
//!
//! [`PeerCertVerifier`] serves both the dialing and the accepting side. It
//! derives the peer's [`PeerId`] from the presented Ed25519 certificate and
//! applies the [`ChannelPolicy`]:
//!
//! - `Bootstrap`: any well-formed Ed25519 certificate is accepted. Chain
//!   validation is off; the peer proves itself later with a signed record.
//! - `Pinned`: only peers already in the trust store are accepted.
//!
//! Denied peers are refused under both policies. Handshake signature checks
//! always go through the ring crypto provider.

use std::sync::{Arc, LazyLock};

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, WebPkiSupportedAlgorithms};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::{DigitallySignedStruct, DistinguishedName, Error as TlsError, SignatureScheme};
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};

use crate::identity::PeerId;
use crate::tls::cert_extract::peer_id_from_certificate;
use crate::trust::{ChannelPolicy, TrustStore};

/// Apply `policy` to a presented leaf certificate.
pub fn check_peer_cert(
    end_entity: &CertificateDer<'_>,
    trust_store: &dyn TrustStore,
    policy: ChannelPolicy,
) -> Result<PeerId, TlsError> {
    let peer_id = peer_id_from_certificate(end_entity)
        .map_err(|e| TlsError::General(format!("unusable peer certificate: {e}")))?;

    if trust_store.is_denied(&peer_id) {
        return Err(TlsError::General(format!(
            "peer {} is denied",
            peer_id.short_id()
        )));
    }

    if policy == ChannelPolicy::Pinned && !trust_store.is_trusted(&peer_id) {
        return Err(TlsError::General(format!(
            "peer {} has no trusted record (pinned mode)",
            peer_id.short_id()
        )));
    }

    Ok(peer_id)
}

/// Handshake signature algorithms of the ring provider.
static SIGNATURE_ALGORITHMS: LazyLock<WebPkiSupportedAlgorithms> =
    LazyLock::new(|| rustls::crypto::ring::default_provider().signature_verification_algorithms);

/// Verifier for both handshake roles.
///
/// The same policy applies whichever side dialed, so one type implements
/// both [`ServerCertVerifier`] and [`ClientCertVerifier`].
#[derive(Debug)]
pub struct PeerCertVerifier {
    trust_store: Arc<dyn TrustStore>,
    policy: ChannelPolicy,
}

impl PeerCertVerifier {
    pub fn new(trust_store: Arc<dyn TrustStore>, policy: ChannelPolicy) -> Self {
        Self {
            trust_store,
            policy,
        }
    }

    fn check(&self, end_entity: &CertificateDer<'_>) -> Result<PeerId, TlsError> {
        check_peer_cert(end_entity, self.trust_store.as_ref(), self.policy)
    }
}

impl ServerCertVerifier for PeerCertVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, TlsError> {
        self.check(end_entity).map(|_| ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        verify_tls12_signature(message, cert, dss, &SIGNATURE_ALGORITHMS)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        verify_tls13_signature(message, cert, dss, &SIGNATURE_ALGORITHMS)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        SIGNATURE_ALGORITHMS.supported_schemes()
    }
}

impl ClientCertVerifier for PeerCertVerifier {
    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &[]
    }

    fn verify_client_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _now: UnixTime,
    ) -> Result<ClientCertVerified, TlsError> {
        self.check(end_entity).map(|_| ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        verify_tls12_signature(message, cert, dss, &SIGNATURE_ALGORITHMS)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        verify_tls13_signature(message, cert, dss, &SIGNATURE_ALGORITHMS)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        SIGNATURE_ALGORITHMS.supported_schemes()
    }
}
