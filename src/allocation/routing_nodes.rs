//! Per-node view of shard assignments, rebuilt from a cluster state
//!
//! Only data nodes of the state get an entry. Copies assigned to a node
//! that is no longer a data node of the cluster are treated as unassigned.

use crate::cluster::routing::{IndexRoutingTable, IndexShardRoutingTable, RoutingTable, ShardId, ShardRouting};
use crate::cluster::state::ClusterState;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Default)]
pub struct RoutingNode {
    node_id: String,
    shards: Vec<ShardRouting>,
    per_index: BTreeMap<String, usize>,
}

impl RoutingNode {
    fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            ..Default::default()
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn shards(&self) -> &[ShardRouting] {
        &self.shards
    }

    pub fn num_shards(&self) -> usize {
        self.shards.len()
    }

    pub fn num_shards_of_index(&self, index: &str) -> usize {
        self.per_index.get(index).copied().unwrap_or(0)
    }

    /// Whether some copy of `shard_id` already lives here
    pub fn holds(&self, shard_id: &ShardId) -> bool {
        self.shards.iter().any(|s| &s.shard_id == shard_id)
    }

    fn add(&mut self, shard: ShardRouting) {
        *self.per_index.entry(shard.shard_id.index.clone()).or_insert(0) += 1;
        self.shards.push(shard);
    }
}

#[derive(Debug, Clone, Default)]
pub struct RoutingNodes {
    nodes: BTreeMap<String, RoutingNode>,
    unassigned: Vec<ShardRouting>,
    indices: BTreeSet<String>,
}

impl RoutingNodes {
    pub fn new(state: &ClusterState) -> Self {
        let mut nodes: BTreeMap<String, RoutingNode> = state
            .nodes
            .data_nodes()
            .map(|n| (n.id.clone(), RoutingNode::new(n.id.clone())))
            .collect();
        let mut unassigned = Vec::new();

        for shard in state.routing_table.all_shards() {
            match shard.current_node_id.as_deref().and_then(|id| nodes.get_mut(id)) {
                Some(node) => node.add(shard.clone()),
                None => unassigned.push(shard.unassign()),
            }
        }

        Self {
            nodes,
            unassigned,
            indices: state.routing_table.indices().map(|t| t.index.clone()).collect(),
        }
    }

    /// Data nodes, ordered by id
    pub fn nodes(&self) -> impl Iterator<Item = &RoutingNode> {
        self.nodes.values()
    }

    pub fn node(&self, node_id: &str) -> Option<&RoutingNode> {
        self.nodes.get(node_id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn unassigned(&self) -> &[ShardRouting] {
        &self.unassigned
    }

    pub fn take_unassigned(&mut self) -> Vec<ShardRouting> {
        std::mem::take(&mut self.unassigned)
    }

    pub fn push_unassigned(&mut self, shard: ShardRouting) {
        self.unassigned.push(shard.unassign());
    }

    /// Place `shard` on `node_id`; returns false if the node is unknown.
    pub fn assign(&mut self, shard: ShardRouting, node_id: &str) -> bool {
        match self.nodes.get_mut(node_id) {
            Some(node) => {
                node.add(shard.assign_to(node_id));
                true
            }
            None => {
                self.push_unassigned(shard);
                false
            }
        }
    }

    /// Routing table holding every copy, assigned or not.
    pub fn build_routing_table(&self) -> RoutingTable {
        let mut grouped: BTreeMap<&str, BTreeMap<u32, Vec<ShardRouting>>> = self
            .indices
            .iter()
            .map(|index| (index.as_str(), BTreeMap::new()))
            .collect();
        let all = self
            .nodes
            .values()
            .flat_map(|n| n.shards.iter())
            .chain(self.unassigned.iter());
        for shard in all {
            grouped
                .entry(shard.shard_id.index.as_str())
                .or_default()
                .entry(shard.shard_id.id)
                .or_default()
                .push(shard.clone());
        }

        let mut builder = RoutingTable::builder();
        for (index, shards) in grouped {
            let shards = shards
                .into_iter()
                .map(|(id, mut copies)| {
                    // primary first, then assigned replicas in node order
                    copies.sort_by(|a, b| {
                        b.primary
                            .cmp(&a.primary)
                            .then_with(|| a.current_node_id.is_none().cmp(&b.current_node_id.is_none()))
                            .then_with(|| a.current_node_id.cmp(&b.current_node_id))
                    });
                    IndexShardRoutingTable {
                        shard_id: ShardId::new(index, id),
                        copies,
                    }
                })
                .collect();
            builder.add(IndexRoutingTable::from_shards(index, shards));
        }
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::metadata::IndexMetadata;
    use crate::cluster::node::{Node, NodeRole, Nodes};

    fn state_with(nodes: &[(&str, &[NodeRole])], index: IndexMetadata) -> ClusterState {
        let mut builder = Nodes::builder();
        for (id, roles) in nodes {
            builder = builder.add(Node::new(*id, *id, format!("mem://{}", id), roles.iter().copied()));
        }
        let mut routing = RoutingTable::builder();
        routing.add_as_new(&index);
        let mut metadata = crate::cluster::metadata::Metadata::builder();
        metadata.put(index);
        ClusterState::empty("test")
            .builder()
            .nodes(builder.build())
            .metadata(metadata.build())
            .routing_table(routing.build())
            .build()
    }

    #[test]
    fn test_only_data_nodes_are_tracked() {
        let state = state_with(
            &[("m", &[NodeRole::Master]), ("d1", &[NodeRole::Data]), ("d2", &[NodeRole::Data])],
            IndexMetadata::new("logs", 2, 0),
        );
        let routing_nodes = RoutingNodes::new(&state);
        let ids: Vec<_> = routing_nodes.nodes().map(|n| n.node_id()).collect();
        assert_eq!(ids, vec!["d1", "d2"]);
        assert_eq!(routing_nodes.unassigned().len(), 2);
    }

    #[test]
    fn test_shards_on_departed_nodes_become_unassigned() {
        let state = state_with(&[("d1", &[NodeRole::Data])], IndexMetadata::new("logs", 1, 0));
        let shard = state.routing_table.all_shards().next().unwrap().assign_to("ghost");
        let mut routing = state.routing_table.to_builder();
        routing.add(IndexRoutingTable::from_shards(
            "logs",
            vec![IndexShardRoutingTable {
                shard_id: shard.shard_id.clone(),
                copies: vec![shard],
            }],
        ));
        let state = state.builder().routing_table(routing.build()).build();

        let routing_nodes = RoutingNodes::new(&state);
        assert_eq!(routing_nodes.unassigned().len(), 1);
        assert!(!routing_nodes.unassigned()[0].is_assigned());
        assert_eq!(routing_nodes.node("d1").unwrap().num_shards(), 0);
    }

    #[test]
    fn test_rebuild_preserves_every_copy() {
        let state = state_with(
            &[("d1", &[NodeRole::Data]), ("d2", &[NodeRole::Data])],
            IndexMetadata::new("logs", 2, 1),
        );
        let mut routing_nodes = RoutingNodes::new(&state);
        let mut unassigned = routing_nodes.take_unassigned();
        let first = unassigned.remove(0);
        assert!(routing_nodes.assign(first, "d1"));
        for shard in unassigned {
            routing_nodes.push_unassigned(shard);
        }

        let table = routing_nodes.build_routing_table();
        assert_eq!(table.all_shards().count(), 4);
        assert_eq!(table.shards_on_node("d1").count(), 1);
        for shard in table.index("logs").unwrap().shards() {
            assert!(shard.copies[0].primary);
        }
    }
}
