//! Integration tests: the inbound stream handler over in-memory pipes.

use std::sync::Arc;

use spore_node::handler::serve_stream;
use spore_proto::identity::Keypair;
use spore_proto::trust::{MemoryTrustStore, TrustStore};
use spore_proto::wire::PeerListAck;
use spore_proto::{TrustedPeerRecord, WireMessage};
use spore_transport::{MemoryNetwork, StreamState, Transport};
use tokio_util::sync::CancellationToken;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_target(true).try_init();
}

/// Serve every stream addressed to `name` with the node handler.
fn serve(network: &MemoryNetwork, name: &str, store: Arc<MemoryTrustStore>) -> CancellationToken {
    let mut incoming = network.listen(name);
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        while let Some(stream) = incoming.recv().await {
            let label = stream.peer().to_owned();
            tokio::spawn(serve_stream(stream, store.clone(), label, token.clone()));
        }
    });
    cancel
}

#[tokio::test]
async fn ping_pong_over_memory_pipe() {
    init_tracing();
    let network = MemoryNetwork::new();
    serve(&network, "b", Arc::new(MemoryTrustStore::new()));
    let a = network.transport("a");

    let reply = a
        .unary(&CancellationToken::new(), "b", &WireMessage::Ping.encode_to_vec())
        .await
        .expect("unary ping");
    assert_eq!(WireMessage::decode(&reply).unwrap(), WireMessage::Pong);
}

#[tokio::test]
async fn peer_list_updates_store_and_is_acknowledged() {
    init_tracing();
    let network = MemoryNetwork::new();
    let store = Arc::new(MemoryTrustStore::new());
    serve(&network, "b", store.clone());
    let a = network.transport("a");

    let good = TrustedPeerRecord::signed(&Keypair::generate(), "127.0.0.1:9999", ["oci-host"]);
    let unsigned = TrustedPeerRecord::unsigned(&Keypair::generate(), "127.0.0.1:1", ["x"]);

    let request = WireMessage::PeerList(vec![good.clone(), unsigned]).encode_to_vec();
    let reply = a
        .unary(&CancellationToken::new(), "b", &request)
        .await
        .expect("unary peer list");

    assert_eq!(
        WireMessage::decode(&reply).unwrap(),
        WireMessage::PeerListAck(PeerListAck { admitted: 1, rejected: 1 })
    );
    assert_eq!(store.trusted_peers(), vec![good]);
}

#[tokio::test]
async fn garbage_frame_closes_the_stream() {
    init_tracing();
    let network = MemoryNetwork::new();
    serve(&network, "b", Arc::new(MemoryTrustStore::new()));
    let a = network.transport("a");
    let cancel = CancellationToken::new();

    let stream = a.open_stream(&cancel, "b").await.unwrap();
    stream.send(&cancel, &[0xff, 0xff, 0xff]).await.unwrap();

    let err = stream.recv(&cancel).await.expect_err("handler hangs up");
    assert!(err.is_end_of_stream(), "expected clean end, got {err:?}");
    assert_eq!(stream.state(), StreamState::Healthy, "receiving never changes health");
}

#[tokio::test]
async fn unsolicited_pong_gets_no_reply_and_stream_stays_usable() {
    init_tracing();
    let network = MemoryNetwork::new();
    serve(&network, "b", Arc::new(MemoryTrustStore::new()));
    let a = network.transport("a");
    let cancel = CancellationToken::new();

    let stream = a.open_stream(&cancel, "b").await.unwrap();
    stream.send(&cancel, &WireMessage::Pong.encode_to_vec()).await.unwrap();

    // The next frame on the stream is the answer to the Ping, not to the Pong.
    let reply = stream
        .request(&cancel, &WireMessage::Ping.encode_to_vec())
        .await
        .unwrap();
    assert_eq!(WireMessage::decode(&reply).unwrap(), WireMessage::Pong);
}

#[tokio::test]
async fn cancelled_handler_stops_serving() {
    init_tracing();
    let network = MemoryNetwork::new();
    let handler_cancel = serve(&network, "b", Arc::new(MemoryTrustStore::new()));
    let a = network.transport("a");
    let cancel = CancellationToken::new();

    let stream = a.open_stream(&cancel, "b").await.unwrap();
    let reply = stream
        .request(&cancel, &WireMessage::Ping.encode_to_vec())
        .await
        .unwrap();
    assert_eq!(WireMessage::decode(&reply).unwrap(), WireMessage::Pong);

    handler_cancel.cancel();
    // With the handler gone, the far end of the pipe is dropped.
    let err = stream.recv(&cancel).await.expect_err("no more replies");
    assert!(err.is_end_of_stream());
}
