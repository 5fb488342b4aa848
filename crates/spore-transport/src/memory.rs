//! In-memory transport for tests.
//!
//! A [`MemoryNetwork`] routes streams between named in-process peers over
//! `tokio::io::duplex` pipes, using the same [`FramedStream`] as QUIC. There
//! is no dialing and no TLS: a name either has a listener or it does not.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::TransportConfig;
use crate::error::{Result, TransportError};
use crate::stream::{FramedStream, PeerStream, StreamState};
use crate::transport::Transport;

/// Buffer size of each in-memory pipe direction.
const PIPE_CAPACITY: usize = 64 * 1024;

pub type MemoryStream = FramedStream<WriteHalf<DuplexStream>, ReadHalf<DuplexStream>>;

/// Inbound streams delivered to a listening peer.
pub type Incoming = mpsc::UnboundedReceiver<Arc<MemoryStream>>;

/// Shared routing table of in-process peers.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    listeners: Arc<Mutex<HashMap<String, mpsc::UnboundedSender<Arc<MemoryStream>>>>>,
    config: TransportConfig,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: TransportConfig) -> Self {
        Self {
            listeners: Arc::default(),
            config,
        }
    }

    /// Accept streams addressed to `name`. Replaces any earlier listener.
    pub fn listen(&self, name: impl Into<String>) -> Incoming {
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), tx);
        rx
    }

    /// A transport that dials from `local`.
    pub fn transport(&self, local: impl Into<String>) -> MemoryTransport {
        MemoryTransport {
            local: local.into(),
            network: self.clone(),
            streams: Mutex::new(HashMap::new()),
            dials: AtomicUsize::new(0),
            shut_down: AtomicBool::new(false),
        }
    }

    fn connect(&self, local: &str, peer: &str) -> Result<Arc<MemoryStream>> {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        let listener = listeners
            .get(peer)
            .ok_or_else(|| TransportError::UnknownPeer(peer.to_owned()))?;

        let (near, far) = tokio::io::duplex(PIPE_CAPACITY);
        let (near_read, near_write) = tokio::io::split(near);
        let (far_read, far_write) = tokio::io::split(far);
        let outbound = Arc::new(FramedStream::new(near_write, near_read, peer, &self.config));
        let inbound = Arc::new(FramedStream::new(far_write, far_read, local, &self.config));

        if listener.send(inbound).is_err() {
            listeners.remove(peer);
            return Err(TransportError::UnknownPeer(peer.to_owned()));
        }
        Ok(outbound)
    }
}

/// [`Transport`] over a [`MemoryNetwork`].
pub struct MemoryTransport {
    local: String,
    network: MemoryNetwork,
    streams: Mutex<HashMap<String, Arc<MemoryStream>>>,
    dials: AtomicUsize,
    shut_down: AtomicBool,
}

impl MemoryTransport {
    pub fn local_name(&self) -> &str {
        &self.local
    }

    /// Number of pipes opened so far.
    pub fn dial_count(&self) -> usize {
        self.dials.load(Ordering::Relaxed)
    }

    fn stream_to(&self, cancel: &CancellationToken, peer: &str) -> Result<Arc<MemoryStream>> {
        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }
        if self.shut_down.load(Ordering::Acquire) {
            return Err(TransportError::Shutdown);
        }

        // Connecting is synchronous, so the map lock covers check and insert.
        let mut streams = self.streams.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(stream) = streams.get(peer).filter(|s| s.state() != StreamState::Closed) {
            return Ok(stream.clone());
        }

        self.dials.fetch_add(1, Ordering::Relaxed);
        let stream = self.network.connect(&self.local, peer)?;
        debug!(local = %self.local, peer = %peer, "opened in-memory stream");
        streams.insert(peer.to_owned(), stream.clone());
        Ok(stream)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn unary(&self, cancel: &CancellationToken, peer: &str, payload: &[u8]) -> Result<Bytes> {
        let stream = self.stream_to(cancel, peer)?;
        stream.request(cancel, payload).await
    }

    async fn open_stream(&self, cancel: &CancellationToken, peer: &str) -> Result<Arc<dyn PeerStream>> {
        let stream: Arc<dyn PeerStream> = self.stream_to(cancel, peer)?;
        Ok(stream)
    }

    async fn close(&self) -> Result<()> {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let streams: Vec<Arc<MemoryStream>> = self
            .streams
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, stream)| stream)
            .collect();

        let mut first_error = None;
        for stream in streams {
            if let Err(e) = stream.close().await {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn healthy(&self, peer: &str) -> bool {
        self.streams
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(peer)
            .is_some_and(|s| s.state() == StreamState::Healthy)
    }

    fn list_peers(&self) -> Vec<String> {
        self.streams
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, s)| s.state() != StreamState::Closed)
            .map(|(peer, _)| peer.clone())
            .collect()
    }
}
