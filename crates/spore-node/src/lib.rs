//! Spore node runtime.
//!
//! Ties the protocol and transport crates into a running peer:
//!
//! - QUIC endpoint bound from a [`NodeConfig`], accepting and dialing
//! - Ping/Pong liveness checks
//! - Signed PeerList exchange feeding the node's trust store

pub mod config;
pub mod error;
pub mod handler;
pub mod node;

pub use config::NodeConfig;
pub use error::{NodeError, Result};
pub use node::Node;
