//! Authenticated QUIC connection wrapper.
//!
//! Once the TLS handshake succeeds, `PeerConnection` wraps the raw
//! `quinn::Connection` and caches the channel-level [`PeerId`] derived from
//! the certificate the other side presented.

use std::net::SocketAddr;

use rustls_pki_types::CertificateDer;
use spore_proto::identity::PeerId;
use spore_proto::tls::cert_extract::peer_id_from_certificate;

use crate::config::TransportConfig;
use crate::error::{Result, TransportError};
use crate::stream::QuicStream;

/// A QUIC connection with a known peer identity.
#[derive(Debug, Clone)]
pub struct PeerConnection {
    inner: quinn::Connection,
    peer_id: PeerId,
}

impl PeerConnection {
    /// Wrap a raw quinn connection, extracting the peer's id.
    pub fn from_quinn(conn: quinn::Connection) -> Result<Self> {
        let peer_id = extract_peer_id(&conn)?;
        Ok(Self {
            inner: conn,
            peer_id,
        })
    }

    /// The id the channel authenticated.
    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    pub fn remote_address(&self) -> SocketAddr {
        self.inner.remote_address()
    }

    /// True once the connection is closed for any reason, including the
    /// idle timeout.
    pub fn is_closed(&self) -> bool {
        self.inner.close_reason().is_some()
    }

    /// Access the underlying quinn connection.
    pub fn inner(&self) -> &quinn::Connection {
        &self.inner
    }

    /// Open a new bidirectional stream, framed.
    pub async fn open_stream(&self, label: &str, config: &TransportConfig) -> Result<QuicStream> {
        let (send, recv) = self.inner.open_bi().await?;
        Ok(QuicStream::new(send, recv, label, config))
    }

    /// Wait for the peer's next bidirectional stream.
    pub async fn accept_stream(&self, config: &TransportConfig) -> Result<QuicStream> {
        let (send, recv) = self.inner.accept_bi().await?;
        Ok(QuicStream::new(send, recv, self.peer_id.to_hex(), config))
    }

    pub fn close(&self, reason: &[u8]) {
        self.inner.close(0u32.into(), reason);
    }
}

/// Derive the peer's id from a quinn connection's TLS peer identity.
fn extract_peer_id(conn: &quinn::Connection) -> Result<PeerId> {
    let identity = conn
        .peer_identity()
        .ok_or_else(|| TransportError::PeerIdentity("no peer identity available".into()))?;

    let certs = identity
        .downcast::<Vec<CertificateDer<'static>>>()
        .map_err(|_| TransportError::PeerIdentity("failed to downcast peer identity".into()))?;

    let leaf = certs
        .first()
        .ok_or_else(|| TransportError::PeerIdentity("peer certificate chain is empty".into()))?;

    peer_id_from_certificate(leaf)
        .map_err(|e| TransportError::PeerIdentity(format!("key extraction: {e}")))
}
