//! Shard allocation over the routing table of a cluster state

pub mod routing_nodes;
pub mod service;

pub use routing_nodes::{RoutingNode, RoutingNodes};
pub use service::AllocationService;
