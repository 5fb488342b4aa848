//! Spore peer transport.
//!
//! Reliable, ordered, framed message streams between authenticated peers:
//!
//! - QUIC endpoint that both accepts and dials (quinn + rustls)
//! - Framed streams with send-side health tracking
//! - Pool of one connection and one cached stream per peer
//! - In-memory transport over duplex pipes for tests

pub mod config;
pub mod connection;
pub mod endpoint;
pub mod error;
pub mod memory;
pub mod stream;
pub mod stream_io;
pub mod transport;

pub use config::TransportConfig;
pub use connection::PeerConnection;
pub use endpoint::QuicEndpoint;
pub use error::{Result, TransportError};
pub use memory::{MemoryNetwork, MemoryTransport};
pub use stream::{FramedStream, PeerStream, QuicStream, SendFailure, StreamState};
pub use transport::{QuicTransport, Transport};
