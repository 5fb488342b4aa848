//! Pooled peer transport.
//!
//! `QuicTransport` keeps at most one connection and one cached stream per
//! peer key. A key is either a trusted peer id (hex) or, for bootstrap, a
//! socket address.
//!
//! Each key owns a slot whose establishment lock is held across
//! check, dial and insert, so concurrent callers for one key share a single
//! dial while different keys dial in parallel. The map of slots is only
//! locked for lookup and insert.

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use spore_proto::identity::PeerId;
use spore_proto::trust::TrustStore;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::TransportConfig;
use crate::connection::PeerConnection;
use crate::endpoint::QuicEndpoint;
use crate::error::{Result, TransportError};
use crate::stream::{PeerStream, QuicStream, StreamState};

/// Capability interface of a peer transport.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one frame to `peer` and wait for exactly one reply frame.
    /// No retries.
    async fn unary(&self, cancel: &CancellationToken, peer: &str, payload: &[u8]) -> Result<Bytes>;

    /// The cached stream to `peer` if it is usable, else a new one.
    /// Never returns a `Closed` stream.
    async fn open_stream(&self, cancel: &CancellationToken, peer: &str) -> Result<Arc<dyn PeerStream>>;

    /// Close every stream and connection. Later calls fail with
    /// [`TransportError::Shutdown`]. The first error seen is returned after
    /// everything has been attempted.
    async fn close(&self) -> Result<()>;

    /// True if a cached stream to `peer` exists and is `Healthy`.
    fn healthy(&self, peer: &str) -> bool;

    /// Peer keys that currently hold a connection.
    fn list_peers(&self) -> Vec<String>;
}

/// Pool entry for one peer key.
#[derive(Default)]
struct PeerSlot {
    establish: tokio::sync::Mutex<()>,
    connection: RwLock<Option<PeerConnection>>,
    stream: RwLock<Option<Arc<QuicStream>>>,
}

impl PeerSlot {
    fn live_connection(&self) -> Option<PeerConnection> {
        self.connection
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .filter(|conn| !conn.is_closed())
            .cloned()
    }

    fn usable_stream(&self) -> Option<Arc<QuicStream>> {
        self.stream
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .filter(|stream| stream.state() != StreamState::Closed)
            .cloned()
    }

    fn set_connection(&self, conn: Option<PeerConnection>) {
        *self.connection.write().unwrap_or_else(PoisonError::into_inner) = conn;
    }

    fn set_stream(&self, stream: Option<Arc<QuicStream>>) {
        *self.stream.write().unwrap_or_else(PoisonError::into_inner) = stream;
    }

    fn take(&self) -> (Option<Arc<QuicStream>>, Option<PeerConnection>) {
        let stream = self.stream.write().unwrap_or_else(PoisonError::into_inner).take();
        let conn = self.connection.write().unwrap_or_else(PoisonError::into_inner).take();
        (stream, conn)
    }
}

/// Race `fut` against `cancel`.
async fn with_cancel<T, F>(cancel: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(TransportError::Cancelled),
        r = fut => r,
    }
}

/// Where to dial a peer key, and whose certificate to expect there.
#[derive(Debug, PartialEq)]
struct DialTarget {
    addr: SocketAddr,
    expected: Option<PeerId>,
}

/// [`Transport`] over a [`QuicEndpoint`].
pub struct QuicTransport {
    endpoint: QuicEndpoint,
    trust_store: Arc<dyn TrustStore>,
    config: TransportConfig,
    peers: Mutex<HashMap<String, Arc<PeerSlot>>>,
    dials: AtomicUsize,
    shut_down: AtomicBool,
    dial_sink: Option<mpsc::UnboundedSender<PeerConnection>>,
}

impl QuicTransport {
    /// Peer ids are resolved to addresses through `trust_store`.
    pub fn new(endpoint: QuicEndpoint, trust_store: Arc<dyn TrustStore>, config: TransportConfig) -> Self {
        Self {
            endpoint,
            trust_store,
            config,
            peers: Mutex::new(HashMap::new()),
            dials: AtomicUsize::new(0),
            shut_down: AtomicBool::new(false),
            dial_sink: None,
        }
    }

    /// Hand every connection this transport dials to `sink`. The remote
    /// side may open streams on a connection we dialed, and someone has to
    /// serve them.
    pub fn with_dial_sink(mut self, sink: mpsc::UnboundedSender<PeerConnection>) -> Self {
        self.dial_sink = Some(sink);
        self
    }

    pub fn endpoint(&self) -> &QuicEndpoint {
        &self.endpoint
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Number of outbound dials attempted so far.
    pub fn dial_count(&self) -> usize {
        self.dials.load(Ordering::Relaxed)
    }

    /// Pool an accepted connection under its channel peer id.
    ///
    /// Returns `false` and keeps the existing entry if that peer already has
    /// a live connection.
    pub async fn register_inbound(&self, conn: PeerConnection) -> Result<bool> {
        self.ensure_open()?;
        let key = conn.peer_id().to_hex();
        loop {
            let slot = self.slot(&key);
            let _establishing = slot.establish.lock().await;
            if !self.is_current(&key, &slot) {
                continue;
            }

            if slot.live_connection().is_some() {
                info!(peer = %conn.peer_id().short_id(), addr = %conn.remote_address(), "inbound connection from already known peer");
                return Ok(false);
            }
            debug!(peer = %conn.peer_id().short_id(), addr = %conn.remote_address(), "registered inbound connection");
            slot.set_connection(Some(conn));
            return Ok(true);
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(TransportError::Shutdown);
        }
        Ok(())
    }

    fn slot(&self, key: &str) -> Arc<PeerSlot> {
        let mut peers = self.peers.lock().unwrap_or_else(PoisonError::into_inner);
        peers.entry(key.to_owned()).or_default().clone()
    }

    /// True while `slot` is still the map entry for `key`.
    fn is_current(&self, key: &str, slot: &Arc<PeerSlot>) -> bool {
        self.peers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
    }

    /// Drop the entry for `key` if it is `slot`, holds nothing, and no one
    /// is establishing through it.
    fn release_if_idle(&self, key: &str, slot: &Arc<PeerSlot>) {
        let mut peers = self.peers.lock().unwrap_or_else(PoisonError::into_inner);
        let Ok(_establishing) = slot.establish.try_lock() else {
            return;
        };
        let current = peers.get(key).is_some_and(|current| Arc::ptr_eq(current, slot));
        if current && slot.live_connection().is_none() && slot.usable_stream().is_none() {
            peers.remove(key);
        }
    }

    fn existing_slot(&self, key: &str) -> Option<Arc<PeerSlot>> {
        self.peers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Trusted record address first, then a literal socket address.
    fn resolve(&self, key: &str) -> Result<DialTarget> {
        if let Ok(peer_id) = PeerId::from_hex(key) {
            if let Some(record) = self.trust_store.lookup(&peer_id) {
                let addr = record.address.parse().map_err(|_| {
                    TransportError::UnknownPeer(format!(
                        "{key}: trusted record has unusable address {:?}",
                        record.address
                    ))
                })?;
                return Ok(DialTarget {
                    addr,
                    expected: Some(peer_id),
                });
            }
        }

        match key.parse() {
            Ok(addr) => Ok(DialTarget { addr, expected: None }),
            Err(_) => Err(TransportError::UnknownPeer(key.to_owned())),
        }
    }

    async fn dial(&self, key: &str, target: &DialTarget) -> Result<PeerConnection> {
        self.dials.fetch_add(1, Ordering::Relaxed);
        let conn = tokio::time::timeout(self.config.dial_timeout, self.endpoint.connect(target.addr))
            .await
            .map_err(|_| TransportError::TimedOut("dial"))??;

        if let Some(expected) = &target.expected {
            if conn.peer_id() != expected {
                conn.close(b"unexpected identity");
                return Err(TransportError::ChannelIdentityMismatch {
                    expected: expected.to_hex(),
                    actual: conn.peer_id().to_hex(),
                });
            }
        }

        info!(peer = %key, addr = %target.addr, remote_id = %conn.peer_id().short_id(), "connected to peer");
        if let Some(sink) = &self.dial_sink {
            if sink.send(conn.clone()).is_err() {
                debug!(peer = %key, "no one is serving dialed connections");
            }
        }
        Ok(conn)
    }

    /// Get or create the stream for `key`, dialing if needed.
    ///
    /// Keys that cannot be resolved never get a slot, and a slot left empty
    /// by a failed or cancelled attempt is removed again.
    async fn establish(&self, cancel: &CancellationToken, key: &str) -> Result<Arc<QuicStream>> {
        self.ensure_open()?;
        let pooled = self
            .existing_slot(key)
            .is_some_and(|slot| slot.live_connection().is_some());
        let mut target = if pooled { None } else { Some(self.resolve(key)?) };

        loop {
            let slot = self.slot(key);
            let establishing = match with_cancel(cancel, async { Ok(slot.establish.lock().await) }).await {
                Ok(guard) => guard,
                Err(e) => {
                    self.release_if_idle(key, &slot);
                    return Err(e);
                }
            };
            if !self.is_current(key, &slot) {
                continue;
            }

            let result = self.establish_locked(cancel, key, &slot, target.take()).await;
            drop(establishing);
            if result.is_err() {
                self.release_if_idle(key, &slot);
            }
            return result;
        }
    }

    async fn establish_locked(
        &self,
        cancel: &CancellationToken,
        key: &str,
        slot: &PeerSlot,
        target: Option<DialTarget>,
    ) -> Result<Arc<QuicStream>> {
        if let Some(stream) = slot.usable_stream() {
            debug!(peer = %key, "stream pool hit");
            return Ok(stream);
        }

        let conn = match slot.live_connection() {
            Some(conn) => {
                debug!(peer = %key, "connection pool hit");
                conn
            }
            None => {
                let target = match target {
                    Some(target) => target,
                    None => self.resolve(key)?,
                };
                let conn = with_cancel(cancel, self.dial(key, &target)).await?;
                slot.set_connection(Some(conn.clone()));
                conn
            }
        };

        let stream = match with_cancel(cancel, conn.open_stream(key, &self.config)).await {
            Ok(stream) => Arc::new(stream),
            Err(e) => {
                if conn.is_closed() {
                    slot.set_connection(None);
                }
                return Err(e);
            }
        };

        // A close that raced the dial must not leave anything behind.
        if let Err(e) = self.ensure_open() {
            slot.take();
            conn.close(b"shutdown");
            return Err(e);
        }

        slot.set_stream(Some(stream.clone()));
        Ok(stream)
    }
}

#[async_trait]
impl Transport for QuicTransport {
    async fn unary(&self, cancel: &CancellationToken, peer: &str, payload: &[u8]) -> Result<Bytes> {
        let stream = self.establish(cancel, peer).await?;
        stream.request(cancel, payload).await
    }

    async fn open_stream(&self, cancel: &CancellationToken, peer: &str) -> Result<Arc<dyn PeerStream>> {
        let stream: Arc<dyn PeerStream> = self.establish(cancel, peer).await?;
        Ok(stream)
    }

    async fn close(&self) -> Result<()> {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let slots: Vec<(String, Arc<PeerSlot>)> = self
            .peers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();

        let mut first_error = None;
        for (key, slot) in slots {
            let (stream, conn) = slot.take();
            if let Some(stream) = stream {
                if let Err(e) = stream.close().await {
                    warn!(peer = %key, error = %e, "failed to close stream");
                    first_error.get_or_insert(e);
                }
            }
            if let Some(conn) = conn {
                conn.close(b"shutdown");
            }
        }

        info!("transport closed");
        first_error.map_or(Ok(()), Err)
    }

    fn healthy(&self, peer: &str) -> bool {
        self.existing_slot(peer)
            .and_then(|slot| slot.usable_stream())
            .is_some_and(|stream| stream.state() == StreamState::Healthy)
    }

    fn list_peers(&self) -> Vec<String> {
        let peers = self.peers.lock().unwrap_or_else(PoisonError::into_inner);
        peers
            .iter()
            .filter(|(_, slot)| slot.live_connection().is_some())
            .map(|(key, _)| key.clone())
            .collect()
    }
}

impl std::fmt::Debug for QuicTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuicTransport")
            .field("endpoint", &self.endpoint)
            .field("dials", &self.dial_count())
            .field("shut_down", &self.shut_down.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
