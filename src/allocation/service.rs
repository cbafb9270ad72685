//! Shard allocation
//!
//! `reroute` places every unassigned shard copy greedily on the data node
//! with the lowest weight:
//!
//! ```text
//! weight(node, index) = shard_balance_factor * shards(node)
//!                     + index_balance_factor * shards(node, index)
//! ```
//!
//! Primaries are placed before replicas, each group ordered by index name
//! and shard number. Nodes are visited in ascending id order and only a
//! strictly lower weight replaces the current best, so ties go to the
//! smallest node id. Counts are updated after every placement. A copy is
//! never placed on a node that already holds a copy of the same shard.

use crate::allocation::routing_nodes::RoutingNodes;
use crate::cluster::routing::ShardRouting;
use crate::cluster::state::ClusterState;
use crate::common::AllocationConfig;

#[derive(Debug, Clone, Default)]
pub struct AllocationService {
    config: AllocationConfig,
}

impl AllocationService {
    pub fn new(config: AllocationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AllocationConfig {
        &self.config
    }

    fn weight(&self, shards_on_node: usize, index_shards_on_node: usize) -> f64 {
        self.config.shard_balance_factor * shards_on_node as f64
            + self.config.index_balance_factor * index_shards_on_node as f64
    }

    /// Assign unassigned shards; everything but the routing table is kept.
    pub fn reroute(&self, state: &ClusterState) -> ClusterState {
        let mut routing_nodes = RoutingNodes::new(state);
        let mut unassigned = routing_nodes.take_unassigned();
        unassigned.sort_by(|a, b| b.primary.cmp(&a.primary).then_with(|| a.shard_id.cmp(&b.shard_id)));

        let mut assigned = 0usize;
        for shard in unassigned {
            match self.pick_node(&routing_nodes, &shard) {
                Some(node_id) => {
                    tracing::debug!("allocating {} (primary: {}) to {}", shard.shard_id, shard.primary, node_id);
                    routing_nodes.assign(shard, &node_id);
                    assigned += 1;
                }
                None => routing_nodes.push_unassigned(shard),
            }
        }

        let routing_table = routing_nodes.build_routing_table();
        if routing_table == *state.routing_table {
            return state.clone();
        }
        if assigned > 0 || !routing_nodes.unassigned().is_empty() {
            tracing::info!(
                "reroute assigned {} shards, {} remain unassigned",
                assigned,
                routing_nodes.unassigned().len()
            );
        }
        state.builder().routing_table(routing_table).build()
    }

    fn pick_node(&self, routing_nodes: &RoutingNodes, shard: &ShardRouting) -> Option<String> {
        let mut best: Option<(&str, f64)> = None;
        for node in routing_nodes.nodes() {
            if node.holds(&shard.shard_id) {
                continue;
            }
            let weight = self.weight(node.num_shards(), node.num_shards_of_index(&shard.shard_id.index));
            if best.map_or(true, |(_, lowest)| weight < lowest) {
                best = Some((node.node_id(), weight));
            }
        }
        best.map(|(id, _)| id.to_string())
    }

    /// Unassign every copy whose node is no longer a data node of the state.
    pub fn disassociate_dead_nodes(&self, state: &ClusterState) -> ClusterState {
        let routing_table = RoutingNodes::new(state).build_routing_table();
        if routing_table == *state.routing_table {
            return state.clone();
        }
        tracing::info!("unassigned shards of departed nodes");
        state.builder().routing_table(routing_table).build()
    }
}
