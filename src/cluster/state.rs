//! Versioned cluster state and change events

use crate::cluster::metadata::Metadata;
use crate::cluster::node::{Node, Nodes};
use crate::cluster::routing::RoutingTable;
use crate::common::generate_uuid;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const UNKNOWN_UUID: &str = "_na_";

/// Immutable snapshot of membership, metadata and routing.
///
/// Components are shared behind `Arc`; a new state reuses untouched parts of
/// its predecessor and replaces the ones that changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterState {
    pub cluster_name: String,
    pub version: u64,
    /// Term of the leader that published this state
    pub term: u64,
    pub state_uuid: String,
    pub nodes: Arc<Nodes>,
    pub metadata: Arc<Metadata>,
    pub routing_table: Arc<RoutingTable>,
}

impl ClusterState {
    /// Version 0 state with no members
    pub fn empty(cluster_name: impl Into<String>) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            version: 0,
            term: 0,
            state_uuid: UNKNOWN_UUID.to_string(),
            nodes: Arc::new(Nodes::default()),
            metadata: Arc::new(Metadata::default()),
            routing_table: Arc::new(RoutingTable::default()),
        }
    }

    /// Version 0 state that only knows the local node
    pub fn initial(cluster_name: impl Into<String>, local: &Node) -> Self {
        let mut state = Self::empty(cluster_name);
        state.nodes = Arc::new(Nodes::builder().local_node(local.clone()).build());
        state
    }

    pub fn builder(&self) -> ClusterStateBuilder {
        ClusterStateBuilder {
            base: self.clone(),
        }
    }

    /// Same membership, metadata and routing, ignoring version bookkeeping
    pub fn same_content(&self, other: &ClusterState) -> bool {
        self.cluster_name == other.cluster_name
            && (Arc::ptr_eq(&self.nodes, &other.nodes) || self.nodes == other.nodes)
            && (Arc::ptr_eq(&self.metadata, &other.metadata) || self.metadata == other.metadata)
            && (Arc::ptr_eq(&self.routing_table, &other.routing_table)
                || self.routing_table == other.routing_table)
    }

    /// Stamp a state for publication: version, term and a fresh uuid
    pub fn into_published(mut self, version: u64, term: u64) -> Self {
        self.version = version;
        self.term = term;
        self.state_uuid = generate_uuid();
        self
    }

    /// Rewrite the observer-specific local node id
    pub fn with_local_node(&self, local: &Node) -> Self {
        let mut state = self.clone();
        state.nodes = Arc::new(self.nodes.to_builder().local_node(local.clone()).build());
        state
    }

    pub fn is_elected_master(&self) -> bool {
        self.nodes.is_local_node_elected_master()
    }
}

impl Default for ClusterState {
    fn default() -> Self {
        Self::empty("minisearch")
    }
}

pub struct ClusterStateBuilder {
    base: ClusterState,
}

impl ClusterStateBuilder {
    pub fn nodes(mut self, nodes: Nodes) -> Self {
        self.base.nodes = Arc::new(nodes);
        self
    }

    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.base.metadata = Arc::new(metadata);
        self
    }

    pub fn routing_table(mut self, routing_table: RoutingTable) -> Self {
        self.base.routing_table = Arc::new(routing_table);
        self
    }

    pub fn build(self) -> ClusterState {
        self.base
    }
}

/// Before/after pair produced by every committed update
#[derive(Debug, Clone)]
pub struct ClusterChangedEvent {
    pub source: String,
    pub previous_state: Arc<ClusterState>,
    pub state: Arc<ClusterState>,
}

impl ClusterChangedEvent {
    pub fn new(
        source: impl Into<String>,
        previous_state: Arc<ClusterState>,
        state: Arc<ClusterState>,
    ) -> Self {
        Self {
            source: source.into(),
            previous_state,
            state,
        }
    }

    pub fn state_changed(&self) -> bool {
        self.previous_state.version != self.state.version
            || self.previous_state.state_uuid != self.state.state_uuid
    }

    pub fn nodes_added(&self) -> Vec<Node> {
        self.state.nodes.added_since(&self.previous_state.nodes)
    }

    pub fn nodes_removed(&self) -> Vec<Node> {
        self.previous_state.nodes.added_since(&self.state.nodes)
    }

    pub fn metadata_changed(&self) -> bool {
        !Arc::ptr_eq(&self.state.metadata, &self.previous_state.metadata)
            && self.state.metadata != self.previous_state.metadata
    }

    pub fn routing_table_changed(&self) -> bool {
        !Arc::ptr_eq(&self.state.routing_table, &self.previous_state.routing_table)
            && self.state.routing_table != self.previous_state.routing_table
    }

    pub fn local_node_master(&self) -> bool {
        self.state.is_elected_master()
    }

    /// Whether this node gained or lost mastership with this change
    pub fn local_master_changed(&self) -> bool {
        self.local_node_master() != self.previous_state.is_elected_master()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::metadata::IndexMetadata;
    use crate::cluster::node::NodeRole;

    fn local() -> Node {
        Node::new("n1", "node-1", "127.0.0.1:9300", [NodeRole::Master, NodeRole::Data])
    }

    #[test]
    fn test_initial_state_contains_local_node() {
        let state = ClusterState::initial("test", &local());
        assert_eq!(state.version, 0);
        assert_eq!(state.nodes.len(), 1);
        assert_eq!(state.nodes.local_node().unwrap().id, "n1");
    }

    #[test]
    fn test_successor_bumps_version() {
        let first = ClusterState::initial("test", &local());
        let second = first.builder().build().into_published(first.version + 1, 3);
        assert_eq!(second.version, 1);
        assert_eq!(second.term, 3);
        assert_ne!(second.state_uuid, first.state_uuid);
        assert!(second.same_content(&first));
    }

    #[test]
    fn test_event_diffs() {
        let first = Arc::new(ClusterState::initial("test", &local()));
        let other = Node::new("n2", "node-2", "127.0.0.1:9301", [NodeRole::Data]);
        let mut metadata = first.metadata.to_builder();
        metadata.put(IndexMetadata::new("users", 1, 0));
        let second = first
            .builder()
            .nodes(first.nodes.to_builder().add(other).build())
            .metadata(metadata.build())
            .build()
            .into_published(1, 1);
        let event = ClusterChangedEvent::new("test", first.clone(), Arc::new(second));

        assert!(event.state_changed());
        assert_eq!(event.nodes_added().len(), 1);
        assert!(event.nodes_removed().is_empty());
        assert!(event.metadata_changed());
        assert!(!event.routing_table_changed());
    }

    #[test]
    fn test_mastership_change() {
        let first = Arc::new(ClusterState::initial("test", &local()));
        let nodes = first.nodes.to_builder().master_node_id(Some("n1".into())).build();
        let elected = Arc::new(first.builder().nodes(nodes).build().into_published(1, 1));

        let event = ClusterChangedEvent::new("elected", first.clone(), elected.clone());
        assert!(event.local_node_master());
        assert!(event.local_master_changed());

        let next = Arc::new(elected.builder().build().into_published(2, 1));
        let event = ClusterChangedEvent::new("same master", elected.clone(), next);
        assert!(event.local_node_master());
        assert!(!event.local_master_changed());

        let nodes = elected.nodes.to_builder().master_node_id(None).build();
        let stepped_down = Arc::new(elected.builder().nodes(nodes).build().into_published(3, 2));
        let event = ClusterChangedEvent::new("stepped down", elected, stepped_down);
        assert!(!event.local_node_master());
        assert!(event.local_master_changed());
    }

    #[test]
    fn test_with_local_node_rewrites_observer() {
        let state = ClusterState::initial("test", &local());
        let other = Node::new("n2", "node-2", "127.0.0.1:9301", [NodeRole::Data]);
        let seen_by_other = state.with_local_node(&other);
        assert_eq!(seen_by_other.nodes.local_node_id(), Some("n2"));
        assert_eq!(seen_by_other.nodes.len(), 2);
    }
}
