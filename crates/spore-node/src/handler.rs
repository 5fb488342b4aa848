//! Inbound stream handling.
//!
//! Every stream a peer opens is served by [`serve_stream`] until the peer
//! finishes it: each frame is decoded as a [`WireMessage`] and answered on
//! the same stream.

use std::sync::Arc;

use spore_proto::trust::TrustStore;
use spore_proto::wire::PeerListAck;
use spore_proto::WireMessage;
use spore_transport::PeerStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// The reply to one inbound message, if it warrants one.
pub fn respond(message: WireMessage, trust_store: &dyn TrustStore, peer: &str) -> Option<WireMessage> {
    match message {
        WireMessage::Ping => Some(WireMessage::Pong),
        WireMessage::PeerList(records) => {
            let offered = records.len();
            let report = trust_store.admit_batch(records);
            if !report.rejected.is_empty() {
                warn!(
                    peer = %peer,
                    offered,
                    rejected = report.rejected.len(),
                    "peer list contained records that failed admission"
                );
            }
            info!(peer = %peer, admitted = report.admitted.len(), "processed peer list");
            Some(WireMessage::PeerListAck(PeerListAck {
                admitted: count(report.admitted.len()),
                rejected: count(report.rejected.len()),
            }))
        }
        unsolicited @ (WireMessage::Pong | WireMessage::PeerListAck(_)) => {
            debug!(peer = %peer, kind = unsolicited.kind(), "ignoring unsolicited reply");
            None
        }
    }
}

fn count(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

/// Serve one inbound stream until the peer finishes it, it breaks, or
/// `cancel` fires.
pub async fn serve_stream(
    stream: Arc<dyn PeerStream>,
    trust_store: Arc<dyn TrustStore>,
    peer: String,
    cancel: CancellationToken,
) {
    loop {
        let frame = match stream.recv(&cancel).await {
            Ok(frame) => frame,
            Err(e) if e.is_end_of_stream() || e.is_cancelled() => break,
            Err(e) => {
                warn!(peer = %peer, error = %e, "inbound stream failed");
                break;
            }
        };

        let message = match WireMessage::decode(&frame) {
            Ok(message) => message,
            Err(e) => {
                warn!(peer = %peer, error = %e, len = frame.len(), "undecodable frame, closing stream");
                if let Err(e) = stream.close().await {
                    debug!(peer = %peer, error = %e, "close after protocol violation failed");
                }
                break;
            }
        };
        debug!(peer = %peer, kind = message.kind(), "dispatching");

        let Some(reply) = respond(message, trust_store.as_ref(), &peer) else {
            continue;
        };
        if let Err(e) = stream.send(&cancel, &reply.encode_to_vec()).await {
            if !e.is_cancelled() {
                warn!(peer = %peer, error = %e, "failed to send reply");
            }
            break;
        }
    }
    debug!(peer = %peer, "inbound stream finished");
}
