//! Helpers for multi-node tests over the in-process transport

#![allow(dead_code)]

use minisearch::cluster::{ClusterState, Node, NodeRole};
use minisearch::common::{Config, DiscoveryConfig};
use minisearch::coordination::{InMemoryPersistedState, Mode, PersistedState};
use minisearch::transport::{MemoryNetwork, MemoryTransport};
use minisearch::ClusterNode;
use std::sync::Arc;
use std::time::Duration;

pub const MASTER_DATA: &[NodeRole] = &[NodeRole::Master, NodeRole::Data];
pub const DATA_ONLY: &[NodeRole] = &[NodeRole::Data];

pub fn fast_config() -> Config {
    let mut config = Config::default();
    config.node.cluster_name = "test".to_string();
    config.discovery = DiscoveryConfig {
        find_peers_interval_ms: 30,
        request_peers_timeout_ms: 300,
        join_timeout_ms: 500,
        publish_timeout_ms: 1_000,
        leader_check_interval_ms: 30,
        leader_check_timeout_ms: 200,
        leader_check_retry_count: 3,
        ..Default::default()
    };
    config
}

pub fn address(id: &str) -> String {
    format!("mem://{}", id)
}

pub fn node(id: &str, roles: &[NodeRole]) -> Node {
    Node::new(id, id, address(id), roles.iter().copied())
}

pub struct TestNode {
    pub node: ClusterNode,
    pub transport: Arc<MemoryTransport>,
}

impl TestNode {
    pub fn mode(&self) -> Mode {
        self.node.coordinator().mode()
    }

    pub fn leader_id(&self) -> Option<String> {
        self.node.coordinator().leader().map(|l| l.id)
    }

    pub fn state(&self) -> Arc<ClusterState> {
        self.node.cluster_service().state()
    }
}

/// Build and start a node; `seeds` are node ids.
pub fn start_node(
    network: &Arc<MemoryNetwork>,
    local: Node,
    seeds: &[&str],
    persisted: Arc<dyn PersistedState>,
) -> TestNode {
    let transport = network.transport(local, seeds.iter().map(|s| address(s)).collect());
    let node = ClusterNode::new(&fast_config(), transport.clone(), persisted);
    node.start().unwrap();
    TestNode { node, transport }
}

pub fn in_memory() -> Arc<dyn PersistedState> {
    Arc::new(InMemoryPersistedState::new(0, ClusterState::empty("test")))
}

/// Start one node per id, each seeded with all the others.
pub fn start_cluster(network: &Arc<MemoryNetwork>, ids: &[&str]) -> Vec<TestNode> {
    // every transport is attached before any node starts probing
    let transports: Vec<_> = ids
        .iter()
        .map(|id| {
            let seeds = ids.iter().filter(|s| *s != id).map(|s| address(s)).collect();
            network.transport(node(id, MASTER_DATA), seeds)
        })
        .collect();
    let nodes: Vec<TestNode> = transports
        .into_iter()
        .map(|transport| TestNode {
            node: ClusterNode::new(&fast_config(), transport.clone(), in_memory()),
            transport,
        })
        .collect();
    for n in &nodes {
        n.node.start().unwrap();
    }
    nodes
}

pub async fn wait_for<F: Fn() -> bool>(what: &str, condition: F) {
    let result = tokio::time::timeout(Duration::from_secs(15), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "timed out waiting for {}", what);
}

/// Exactly one leader among `nodes`, followed by all the others, and every
/// committed state lists `expected_members` nodes.
pub fn stable(nodes: &[&TestNode], expected_members: usize) -> bool {
    let leaders: Vec<_> = nodes.iter().filter(|n| n.mode() == Mode::Leader).collect();
    if leaders.len() != 1 {
        return false;
    }
    let leader_id = leaders[0].node.node().id.clone();
    nodes.iter().all(|n| {
        n.leader_id().as_deref() == Some(leader_id.as_str())
            && n.state().nodes.len() == expected_members
            && n.state().nodes.master_node_id() == Some(leader_id.as_str())
    })
}
