//! Nodes talking over real TCP sockets

mod common;

use common::*;
use minisearch::coordination::Mode;
use minisearch::metadata::CreateIndexRequest;
use minisearch::transport::{TcpTransport, Transport};
use minisearch::{ClusterNode, Config};
use std::net::SocketAddr;
use std::time::Duration;

fn tcp_config(name: &str, data: &std::path::Path, master: bool, seeds: Vec<String>) -> Config {
    let mut config = fast_config();
    config.node.name = Some(name.to_string());
    config.node.bind_addr = SocketAddr::from(([127, 0, 0, 1], 0));
    config.node.data_path = data.to_path_buf();
    config.node.master = master;
    config.node.data = true;
    config.discovery.seed_hosts = seeds;
    config
}

#[tokio::test]
async fn test_handshake_returns_remote_identity() {
    let any_port = SocketAddr::from(([127, 0, 0, 1], 0));
    let a = TcpTransport::bind(node("a", MASTER_DATA), any_port, vec![], 1 << 20)
        .await
        .unwrap();
    let b = TcpTransport::bind(node("b", DATA_ONLY), any_port, vec![], 1 << 20)
        .await
        .unwrap();

    let a_address = a.local_node().address;
    assert_ne!(a_address, "127.0.0.1:0");
    let remote = b.connect(&a_address, Duration::from_secs(2)).await.unwrap();
    assert_eq!(remote.id, "a");
    assert!(remote.is_master_eligible());
    assert!(b.connected_nodes().iter().any(|n| n.id == "a"));

    a.close();
    b.close();
}

#[tokio::test]
async fn test_two_node_cluster_over_tcp() {
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();

    let first = ClusterNode::bind(&tcp_config("first", dir_a.path(), true, vec![]))
        .await
        .unwrap();
    first.start().unwrap();
    let first_address = first.node().address.clone();

    let second = ClusterNode::bind(&tcp_config("second", dir_b.path(), false, vec![first_address]))
        .await
        .unwrap();
    second.start().unwrap();

    wait_for("the data node to join over tcp", || {
        let leader = first.coordinator();
        leader.mode() == Mode::Leader
            && second.coordinator().mode() == Mode::Follower
            && second.cluster_service().state().nodes.len() == 2
    })
    .await;
    assert_eq!(
        second.cluster_service().state().nodes.master_node_id(),
        Some(first.node().id.as_str())
    );

    let event = first
        .create_index_service()
        .create_index(CreateIndexRequest::new("logs").shards(2).replicas(1))
        .await
        .unwrap();
    assert_eq!(event.state.routing_table.unassigned_shards().count(), 0);
    assert_eq!(event.state.routing_table.shards_on_node(&second.node().id).count(), 2);

    let version = event.state.version;
    wait_for("the follower to apply the index", || {
        second.cluster_service().state().version >= version
    })
    .await;
    assert!(second.cluster_service().state().metadata.has_index("logs"));

    second.stop();
    first.stop();
}
