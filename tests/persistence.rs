//! Coordination state survives a restart on disk

mod common;

use common::*;
use minisearch::cluster::ClusterState;
use minisearch::coordination::{FilePersistedState, Mode, PersistedState};
use minisearch::metadata::CreateIndexRequest;
use minisearch::transport::MemoryNetwork;
use std::sync::Arc;

#[test]
fn test_file_state_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    {
        let persisted = FilePersistedState::open(dir.path(), "test").unwrap();
        assert_eq!(persisted.current_term(), 0);
        assert_eq!(persisted.last_accepted_state().version, 0);

        let local = node("a", MASTER_DATA);
        let state = ClusterState::initial("test", &local).into_published(7, 3);
        persisted.set_current_term(3).unwrap();
        persisted.set_last_accepted_state(Arc::new(state)).unwrap();
    }

    let reopened = FilePersistedState::open(dir.path(), "test").unwrap();
    assert_eq!(reopened.current_term(), 3);
    let state = reopened.last_accepted_state();
    assert_eq!(state.version, 7);
    assert_eq!(state.term, 3);
    assert!(state.nodes.contains("a"));
}

#[test]
fn test_corrupted_file_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = {
        let persisted = FilePersistedState::open(dir.path(), "test").unwrap();
        persisted.set_current_term(5).unwrap();
        persisted.path().to_path_buf()
    };
    let mut bytes = std::fs::read(&path).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xff;
    std::fs::write(&path, bytes).unwrap();

    assert!(FilePersistedState::open(dir.path(), "test").is_err());
}

#[tokio::test]
async fn test_restarted_node_keeps_indices_and_moves_term_forward() {
    let dir = tempfile::tempdir().unwrap();
    let network = MemoryNetwork::new();

    let persisted = Arc::new(FilePersistedState::open(dir.path(), "test").unwrap());
    let first = start_node(&network, node("a", MASTER_DATA), &[], persisted);
    wait_for("first election", || first.mode() == Mode::Leader && first.state().version > 0).await;
    first
        .node
        .create_index_service()
        .create_index(CreateIndexRequest::new("logs").shards(2).replicas(0))
        .await
        .unwrap();
    let old_term = first.node.coordinator().current_term();
    let old_version = first.state().version;
    first.node.stop();
    first.transport.close();
    drop(first);

    // same address, fresh process identity
    let restarted_node = minisearch::Node::new("a-restarted", "a", address("a"), MASTER_DATA.iter().copied());
    let persisted = Arc::new(FilePersistedState::open(dir.path(), "test").unwrap());
    assert_eq!(persisted.current_term(), old_term);
    let restarted = start_node(&network, restarted_node, &[], persisted);

    wait_for("re-election after restart", || {
        restarted.mode() == Mode::Leader && restarted.state().version > old_version
    })
    .await;
    let state = restarted.state();
    assert!(state.term > old_term);
    assert!(state.metadata.has_index("logs"));
    assert!(state.nodes.contains("a-restarted"));
    assert!(!state.nodes.contains("a"));
    assert_eq!(state.routing_table.unassigned_shards().count(), 0);
    assert_eq!(state.routing_table.shards_on_node("a-restarted").count(), 2);
}
