//! Node settings.

use std::net::{Ipv4Addr, SocketAddr};

use spore_proto::trust::ChannelPolicy;
use spore_transport::TransportConfig;

#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Address the QUIC endpoint binds to. It is also the address the node
    /// advertises in its own signed record.
    pub bind_addr: SocketAddr,
    pub policy: ChannelPolicy,
    /// Capability tags advertised in the node's record.
    pub capabilities: Vec<String>,
    pub transport: TransportConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
            policy: ChannelPolicy::Bootstrap,
            capabilities: Vec::new(),
            transport: TransportConfig::default(),
        }
    }
}
