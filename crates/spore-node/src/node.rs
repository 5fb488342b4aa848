//! A running Spore node.
//!
//! `Node` owns the QUIC endpoint, the pooled transport and the trust store.
//! Inbound connections are accepted on a background task; every inbound
//! stream gets its own [`serve_stream`] task.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use spore_proto::identity::{Certificate, Keypair, PeerId};
use spore_proto::trust::{MemoryTrustStore, TrustStore};
use spore_proto::wire::PeerListAck;
use spore_proto::{TrustedPeerRecord, WireMessage};
use spore_transport::{PeerConnection, QuicEndpoint, QuicTransport, Transport};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::NodeConfig;
use crate::error::{NodeError, Result};
use crate::handler::serve_stream;

pub struct Node {
    keypair: Keypair,
    config: NodeConfig,
    local_addr: SocketAddr,
    endpoint: QuicEndpoint,
    transport: Arc<QuicTransport>,
    trust_store: Arc<dyn TrustStore>,
    cancel: CancellationToken,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl Node {
    /// Start a node with an empty in-memory trust store.
    ///
    /// Must be called inside a tokio runtime.
    pub fn start(config: NodeConfig, keypair: Keypair) -> Result<Self> {
        Self::start_with_store(config, keypair, Arc::new(MemoryTrustStore::new()))
    }

    /// Start a node on an existing trust store.
    pub fn start_with_store(
        config: NodeConfig,
        keypair: Keypair,
        trust_store: Arc<dyn TrustStore>,
    ) -> Result<Self> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| NodeError::Clock(e.to_string()))?;
        let now = i64::try_from(now.as_secs()).map_err(|e| NodeError::Clock(e.to_string()))?;
        let cert = Certificate::generate(&keypair, now)?;

        let endpoint = QuicEndpoint::bind(
            config.bind_addr,
            &keypair,
            &cert,
            trust_store.clone(),
            config.policy,
            &config.transport,
        )?;
        let local_addr = endpoint.local_addr()?;

        let (dialed_tx, dialed_rx) = mpsc::unbounded_channel();
        let transport = Arc::new(
            QuicTransport::new(endpoint.clone(), trust_store.clone(), config.transport.clone())
                .with_dial_sink(dialed_tx),
        );

        let cancel = CancellationToken::new();
        let accept_task = tokio::spawn(accept_loop(
            endpoint.clone(),
            dialed_rx,
            transport.clone(),
            trust_store.clone(),
            cancel.clone(),
        ));

        info!(peer = %keypair.peer_id(), addr = %local_addr, policy = ?config.policy, "node started");

        Ok(Self {
            keypair,
            config,
            local_addr,
            endpoint,
            transport,
            trust_store,
            cancel,
            accept_task: Mutex::new(Some(accept_task)),
        })
    }

    /// Send a Ping to `peer` (trusted id or socket address) and wait for Pong.
    pub async fn ping(&self, peer: &str) -> Result<()> {
        match self.exchange(peer, WireMessage::Ping).await? {
            WireMessage::Pong => Ok(()),
            other => Err(NodeError::UnexpectedReply {
                expected: "pong",
                actual: other.kind(),
            }),
        }
    }

    /// Offer `records` to `peer` and return its verdict.
    pub async fn announce(&self, peer: &str, records: Vec<TrustedPeerRecord>) -> Result<PeerListAck> {
        match self.exchange(peer, WireMessage::PeerList(records)).await? {
            WireMessage::PeerListAck(ack) => Ok(ack),
            other => Err(NodeError::UnexpectedReply {
                expected: "peer_list_ack",
                actual: other.kind(),
            }),
        }
    }

    async fn exchange(&self, peer: &str, message: WireMessage) -> Result<WireMessage> {
        debug!(peer = %peer, kind = message.kind(), "sending request");
        let reply = self
            .transport
            .unary(&self.cancel, peer, &message.encode_to_vec())
            .await?;
        Ok(WireMessage::decode(&reply)?)
    }

    /// This node's own signed record, advertising its bound address.
    pub fn local_record(&self) -> TrustedPeerRecord {
        TrustedPeerRecord::signed(
            &self.keypair,
            self.local_addr.to_string(),
            self.config.capabilities.iter().cloned(),
        )
    }

    pub fn trusted_peers(&self) -> Vec<TrustedPeerRecord> {
        self.trust_store.trusted_peers()
    }

    pub fn peer_id(&self) -> PeerId {
        self.keypair.peer_id()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn transport(&self) -> &Arc<QuicTransport> {
        &self.transport
    }

    pub fn trust_store(&self) -> &Arc<dyn TrustStore> {
        &self.trust_store
    }

    /// Stop accepting, end every handler, close the transport and the
    /// endpoint. Returns the first error the transport reported.
    pub async fn shutdown(&self) -> Result<()> {
        self.cancel.cancel();
        let accept_task = self
            .accept_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = accept_task {
            if let Err(e) = task.await {
                warn!(error = %e, "accept loop ended abnormally");
            }
        }

        let closed = self.transport.close().await;
        self.endpoint.close();
        info!(peer = %self.keypair.peer_id().short_id(), "node stopped");
        Ok(closed?)
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("peer_id", &self.keypair.peer_id())
            .field("local_addr", &self.local_addr)
            .field("policy", &self.config.policy)
            .finish_non_exhaustive()
    }
}

/// Accept inbound connections, and serve streams on both inbound and
/// dialed connections, until `cancel` fires or the endpoint closes.
async fn accept_loop(
    endpoint: QuicEndpoint,
    mut dialed: mpsc::UnboundedReceiver<PeerConnection>,
    transport: Arc<QuicTransport>,
    trust_store: Arc<dyn TrustStore>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            incoming = endpoint.accept() => {
                let Some(incoming) = incoming else { break };
                tokio::spawn(serve_inbound(
                    incoming,
                    transport.clone(),
                    trust_store.clone(),
                    cancel.clone(),
                ));
            }
            Some(conn) = dialed.recv() => {
                tokio::spawn(serve_streams(
                    conn,
                    transport.clone(),
                    trust_store.clone(),
                    cancel.clone(),
                ));
            }
        }
    }
    debug!("accept loop stopped");
}

async fn serve_inbound(
    incoming: quinn::Incoming,
    transport: Arc<QuicTransport>,
    trust_store: Arc<dyn TrustStore>,
    cancel: CancellationToken,
) {
    let remote = incoming.remote_address();
    let conn = match incoming.await {
        Ok(conn) => conn,
        Err(e) => {
            warn!(addr = %remote, error = %e, "inbound handshake failed");
            return;
        }
    };
    let conn = match PeerConnection::from_quinn(conn) {
        Ok(conn) => conn,
        Err(e) => {
            warn!(addr = %remote, error = %e, "inbound peer has no usable identity");
            return;
        }
    };
    info!(peer = %conn.peer_id().short_id(), addr = %remote, "accepted connection");

    if let Err(e) = transport.register_inbound(conn.clone()).await {
        debug!(peer = %conn.peer_id().short_id(), error = %e, "not pooling inbound connection");
    }
    serve_streams(conn, transport, trust_store, cancel).await;
}

/// Spawn a handler for every stream the peer opens on `conn`.
async fn serve_streams(
    conn: PeerConnection,
    transport: Arc<QuicTransport>,
    trust_store: Arc<dyn TrustStore>,
    cancel: CancellationToken,
) {
    let peer = conn.peer_id().to_hex();
    loop {
        let stream = tokio::select! {
            _ = cancel.cancelled() => break,
            stream = conn.accept_stream(transport.config()) => stream,
        };
        match stream {
            Ok(stream) => {
                tokio::spawn(serve_stream(
                    Arc::new(stream),
                    trust_store.clone(),
                    peer.clone(),
                    cancel.clone(),
                ));
            }
            Err(e) => {
                debug!(peer = %peer, error = %e, "connection ended");
                break;
            }
        }
    }
}
