//! TLS configuration builders for the QUIC endpoint.
//!
//! A Spore node both accepts and dials, so it needs a `rustls::ServerConfig`
//! and a `rustls::ClientConfig` built from the same identity. Both enforce:
//! - TLS 1.3 only (required by QUIC)
//! - the ring crypto provider
//! - mutual authentication with the node's Ed25519 self-signed certificate
//! - ALPN [`ALPN_SPORE`]
//! - the custom verifiers from [`crate::tls::verifier`]

use std::sync::Arc;

use rustls::client::danger::ServerCertVerifier;
use rustls::server::danger::ClientCertVerifier;
use rustls_pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};

use crate::error::{ProtoError, Result};
use crate::identity::{Certificate, Keypair};
use crate::tls::verifier::PeerCertVerifier;
use crate::trust::{ChannelPolicy, TrustStore};

/// ALPN protocol identifier.
pub const ALPN_SPORE: &[u8] = b"spore";

/// Build the accepting-side TLS config. Client certificates are required.
pub fn build_server_tls_config(
    keypair: &Keypair,
    cert: &Certificate,
    trust_store: Arc<dyn TrustStore>,
    policy: ChannelPolicy,
) -> Result<rustls::ServerConfig> {
    let verifier: Arc<dyn ClientCertVerifier> =
        Arc::new(PeerCertVerifier::new(trust_store, policy));

    let mut config = rustls::ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_protocol_versions(&[&rustls::version::TLS13])
    .map_err(|e| ProtoError::TlsConfiguration(format!("TLS version config: {e}")))?
    .with_client_cert_verifier(verifier)
    .with_single_cert(cert_chain(cert), private_key(keypair)?)
    .map_err(|e| ProtoError::TlsConfiguration(format!("server cert config: {e}")))?;

    config.alpn_protocols = vec![ALPN_SPORE.to_vec()];
    Ok(config)
}

/// Build the dialing-side TLS config, presenting the node certificate.
pub fn build_client_tls_config(
    keypair: &Keypair,
    cert: &Certificate,
    trust_store: Arc<dyn TrustStore>,
    policy: ChannelPolicy,
) -> Result<rustls::ClientConfig> {
    let verifier: Arc<dyn ServerCertVerifier> =
        Arc::new(PeerCertVerifier::new(trust_store, policy));

    let mut config = rustls::ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_protocol_versions(&[&rustls::version::TLS13])
    .map_err(|e| ProtoError::TlsConfiguration(format!("TLS version config: {e}")))?
    .dangerous()
    .with_custom_certificate_verifier(verifier)
    .with_client_auth_cert(cert_chain(cert), private_key(keypair)?)
    .map_err(|e| ProtoError::TlsConfiguration(format!("client cert config: {e}")))?;

    config.alpn_protocols = vec![ALPN_SPORE.to_vec()];
    Ok(config)
}

fn cert_chain(cert: &Certificate) -> Vec<CertificateDer<'static>> {
    vec![CertificateDer::from(cert.der().to_vec())]
}

fn private_key(keypair: &Keypair) -> Result<PrivateKeyDer<'static>> {
    let pkcs8 = PrivatePkcs8KeyDer::from(keypair.to_pkcs8_der()?);
    Ok(PrivateKeyDer::Pkcs8(pkcs8))
}
