//! Exercises `TcpTransport` over real loopback sockets: two nodes spawn,
//! connect to each other, and exchange a message each way.

use std::collections::HashMap;
use std::time::Duration;

use raft::protos::{Message, RequestVote, NO_INDEX, NO_TERM};
use raft::transport::Transport;

use raft_kv::transport;

async fn bind_ephemeral() -> std::net::SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    drop(listener); // free the port; TcpTransport::spawn rebinds it right after.
    addr
}

fn vote(term: i64, candidate_id: u64) -> Message {
    Message::RequestVote(RequestVote { term, candidate_id, last_log_index: NO_INDEX, last_log_term: NO_TERM })
}

#[tokio::test]
async fn messages_round_trip_between_two_nodes() {
    let addr_a = bind_ephemeral().await;
    let addr_b = bind_ephemeral().await;

    let mut servers = HashMap::new();
    servers.insert(1u64, addr_a.to_string());
    servers.insert(2u64, addr_b.to_string());

    let mut node_a = transport::spawn(1, &servers).await.expect("spawn node 1");
    let mut node_b = transport::spawn(2, &servers).await.expect("spawn node 2");

    // Connections are established lazily; give the background tasks a
    // moment to dial before relying on delivery.
    tokio::time::sleep(Duration::from_millis(100)).await;

    node_a.send(2, vote(5, 1));
    let (from, message) = tokio::time::timeout(Duration::from_secs(5), node_b.recv()).await.expect("message arrives before timeout");
    assert_eq!(from, 1);
    assert_eq!(message.term(), 5);

    node_b.send(1, vote(6, 2));
    let (from, message) = tokio::time::timeout(Duration::from_secs(5), node_a.recv()).await.expect("message arrives before timeout");
    assert_eq!(from, 2);
    assert_eq!(message.term(), 6);
}

#[tokio::test]
async fn disabling_a_peer_suppresses_outbound_sends() {
    let addr_a = bind_ephemeral().await;
    let addr_b = bind_ephemeral().await;

    let mut servers = HashMap::new();
    servers.insert(1u64, addr_a.to_string());
    servers.insert(2u64, addr_b.to_string());

    let mut node_a = transport::spawn(1, &servers).await.expect("spawn node 1");
    let mut node_b = transport::spawn(2, &servers).await.expect("spawn node 2");

    tokio::time::sleep(Duration::from_millis(100)).await;

    node_a.disable(2);
    node_a.send(2, vote(1, 1));

    let result = tokio::time::timeout(Duration::from_millis(300), node_b.recv()).await;
    assert!(result.is_err(), "disabled destination must not receive anything");
}
