//! Wire message schema.
//!
//! The prost types below mirror `proto/spore.proto` field for field; tag
//! numbers are part of the wire contract and of the peer record's signable
//! projection, so they must never be renumbered.
//!
//! [`WireMessage`] is the sum type the rest of the workspace works with.
//! Decoding always yields one of its variants or an error.

use prost::Message;

use crate::error::{ProtoError, Result};

/// A signed, self-describing peer record.
#[derive(Clone, PartialEq, Message)]
pub struct TrustedPeerRecord {
    /// Lowercase hex SHA-256 of `public_key`.
    #[prost(string, tag = "1")]
    pub id: String,
    /// Network address the peer accepts QUIC connections on.
    #[prost(string, tag = "2")]
    pub address: String,
    /// Raw Ed25519 public key.
    #[prost(bytes = "vec", tag = "3")]
    pub public_key: Vec<u8>,
    #[prost(string, repeated, tag = "4")]
    pub capabilities: Vec<String>,
    /// Ed25519 signature over the record with this field cleared.
    #[prost(bytes = "vec", tag = "5")]
    pub signature: Vec<u8>,
}

#[derive(Clone, Copy, PartialEq, Message)]
pub struct Ping {}

#[derive(Clone, Copy, PartialEq, Message)]
pub struct Pong {}

#[derive(Clone, PartialEq, Message)]
pub struct PeerList {
    #[prost(message, repeated, tag = "1")]
    pub peers: Vec<TrustedPeerRecord>,
}

/// Receiver's verdict on a `PeerList`.
#[derive(Clone, Copy, PartialEq, Message)]
pub struct PeerListAck {
    #[prost(uint32, tag = "1")]
    pub admitted: u32,
    #[prost(uint32, tag = "2")]
    pub rejected: u32,
}

/// Top-level envelope carried in every frame.
#[derive(Clone, PartialEq, Message)]
pub struct Envelope {
    #[prost(oneof = "envelope::Body", tags = "1, 2, 3, 4")]
    pub body: Option<envelope::Body>,
}

pub mod envelope {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Body {
        #[prost(message, tag = "1")]
        Ping(super::Ping),
        #[prost(message, tag = "2")]
        Pong(super::Pong),
        #[prost(message, tag = "3")]
        PeerList(super::PeerList),
        #[prost(message, tag = "4")]
        PeerListAck(super::PeerListAck),
    }
}

/// A decoded wire message.
#[derive(Debug, Clone, PartialEq)]
pub enum WireMessage {
    Ping,
    Pong,
    PeerList(Vec<TrustedPeerRecord>),
    PeerListAck(PeerListAck),
}

impl WireMessage {
    /// Encode into envelope bytes (the frame payload).
    pub fn encode_to_vec(&self) -> Vec<u8> {
        Envelope::from(self.clone()).encode_to_vec()
    }

    /// Decode envelope bytes. An envelope without a body is an error.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Envelope::decode(bytes)?.try_into()
    }

    /// Short name for log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            WireMessage::Ping => "ping",
            WireMessage::Pong => "pong",
            WireMessage::PeerList(_) => "peer_list",
            WireMessage::PeerListAck(_) => "peer_list_ack",
        }
    }
}

impl From<WireMessage> for Envelope {
    fn from(msg: WireMessage) -> Self {
        let body = match msg {
            WireMessage::Ping => envelope::Body::Ping(Ping {}),
            WireMessage::Pong => envelope::Body::Pong(Pong {}),
            WireMessage::PeerList(peers) => envelope::Body::PeerList(PeerList { peers }),
            WireMessage::PeerListAck(ack) => envelope::Body::PeerListAck(ack),
        };
        Envelope { body: Some(body) }
    }
}

impl TryFrom<Envelope> for WireMessage {
    type Error = ProtoError;

    fn try_from(env: Envelope) -> Result<Self> {
        match env.body.ok_or(ProtoError::EmptyEnvelope)? {
            envelope::Body::Ping(_) => Ok(WireMessage::Ping),
            envelope::Body::Pong(_) => Ok(WireMessage::Pong),
            envelope::Body::PeerList(list) => Ok(WireMessage::PeerList(list.peers)),
            envelope::Body::PeerListAck(ack) => Ok(WireMessage::PeerListAck(ack)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> TrustedPeerRecord {
        TrustedPeerRecord {
            id: "ab".repeat(32),
            address: "127.0.0.1:9999".into(),
            public_key: vec![7u8; 32],
            capabilities: vec!["oci-host".into(), "relay".into()],
            signature: vec![9u8; 64],
        }
    }

    #[test]
    fn ping_and_pong_survive_encoding() {
        for msg in [WireMessage::Ping, WireMessage::Pong] {
            let decoded = WireMessage::decode(&msg.encode_to_vec()).expect("decode");
            assert_eq!(decoded, msg);
        }
    }

    #[test]
    fn peer_list_keeps_record_fields_and_order() {
        let mut second = sample_record();
        second.address = "10.0.0.2:4433".into();
        let msg = WireMessage::PeerList(vec![sample_record(), second.clone()]);

        let WireMessage::PeerList(peers) = WireMessage::decode(&msg.encode_to_vec()).unwrap()
        else {
            panic!("expected peer list");
        };
        assert_eq!(peers.len(), 2);
        assert_eq!(peers[0], sample_record());
        assert_eq!(peers[1].address, second.address);
    }

    #[test]
    fn empty_envelope_is_rejected() {
        let bytes = Envelope { body: None }.encode_to_vec();
        assert!(bytes.is_empty());
        assert!(matches!(
            WireMessage::decode(&bytes),
            Err(ProtoError::EmptyEnvelope)
        ));
    }

    #[test]
    fn garbage_is_a_decode_error() {
        assert!(matches!(
            WireMessage::decode(&[0xff, 0xff, 0xff]),
            Err(ProtoError::ProtobufDecode(_))
        ));
    }

    #[test]
    fn unknown_fields_are_ignored() {
        // Envelope{ping} followed by an unknown varint field 15 = 1.
        let mut bytes = WireMessage::Ping.encode_to_vec();
        bytes.extend_from_slice(&[0x78, 0x01]);
        assert_eq!(WireMessage::decode(&bytes).unwrap(), WireMessage::Ping);
    }

    #[test]
    fn ping_wire_bytes_are_stable() {
        // field 1, length-delimited, zero length.
        assert_eq!(WireMessage::Ping.encode_to_vec(), vec![0x0a, 0x00]);
        assert_eq!(WireMessage::Pong.encode_to_vec(), vec![0x12, 0x00]);
    }
}
