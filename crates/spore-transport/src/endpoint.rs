//! QUIC endpoint for a Spore node.
//!
//! A node both accepts and dials, so one `quinn::Endpoint` carries the
//! server config and a default client config built from the same identity,
//! trust store and [`ChannelPolicy`].

use std::net::SocketAddr;
use std::sync::Arc;

use spore_proto::identity::{Certificate, Keypair};
use spore_proto::tls::config::{build_client_tls_config, build_server_tls_config};
use spore_proto::trust::{ChannelPolicy, TrustStore};
use tracing::{debug, info};

use crate::config::TransportConfig;
use crate::connection::PeerConnection;
use crate::error::{Result, TransportError};

/// SNI server name used in the TLS handshake.
///
/// The verifiers ignore it (they check the certificate key instead), but
/// quinn requires a valid server name for `connect()`.
const SNI_SERVER_NAME: &str = "spore";

/// A bound QUIC endpoint that accepts and dials Spore peers.
#[derive(Debug, Clone)]
pub struct QuicEndpoint {
    endpoint: quinn::Endpoint,
}

impl QuicEndpoint {
    /// Bind to `addr`, ready both to accept and to dial.
    pub fn bind(
        addr: SocketAddr,
        keypair: &Keypair,
        cert: &Certificate,
        trust_store: Arc<dyn TrustStore>,
        policy: ChannelPolicy,
        config: &TransportConfig,
    ) -> Result<Self> {
        let transport = config.quic_transport()?;

        let server_tls = build_server_tls_config(keypair, cert, trust_store.clone(), policy)?;
        let quic_server_config = quinn::crypto::rustls::QuicServerConfig::try_from(server_tls)
            .map_err(|e| TransportError::TlsConfig(format!("rustls→quinn server: {e}")))?;
        let mut server_config = quinn::ServerConfig::with_crypto(Arc::new(quic_server_config));
        server_config.transport_config(transport.clone());

        let client_tls = build_client_tls_config(keypair, cert, trust_store, policy)?;
        let quic_client_config = quinn::crypto::rustls::QuicClientConfig::try_from(client_tls)
            .map_err(|e| TransportError::TlsConfig(format!("rustls→quinn client: {e}")))?;
        let mut client_config = quinn::ClientConfig::new(Arc::new(quic_client_config));
        client_config.transport_config(transport);

        let mut endpoint = quinn::Endpoint::server(server_config, addr)
            .map_err(|e| TransportError::Endpoint(format!("bind {addr}: {e}")))?;
        endpoint.set_default_client_config(client_config);

        info!(%addr, ?policy, "endpoint bound");
        Ok(Self { endpoint })
    }

    /// Dial `addr` and complete the TLS handshake.
    pub async fn connect(&self, addr: SocketAddr) -> Result<PeerConnection> {
        let connecting = self.endpoint.connect(addr, SNI_SERVER_NAME)?;
        let conn = PeerConnection::from_quinn(connecting.await?)?;
        debug!(%addr, peer = %conn.peer_id().short_id(), "dialed peer");
        Ok(conn)
    }

    /// Next incoming connection attempt, or `None` once the endpoint closed.
    pub async fn accept(&self) -> Option<quinn::Incoming> {
        self.endpoint.accept().await
    }

    /// Returns the local address this endpoint is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.endpoint
            .local_addr()
            .map_err(|e| TransportError::Endpoint(e.to_string()))
    }

    /// Close every connection and stop accepting.
    pub fn close(&self) {
        self.endpoint.close(0u32.into(), b"shutdown");
    }

    /// Wait until every connection has finished closing.
    pub async fn wait_idle(&self) {
        self.endpoint.wait_idle().await;
    }
}
