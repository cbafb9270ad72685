//! Cluster state model and the update/apply pipeline
//!
//! - `node`, `metadata`, `routing`, `state`: the immutable state model
//! - `master`: serialized state-update task execution and publication
//! - `applier`: holds the committed state and notifies subscribers
//! - `service`: facade combining the two

pub mod applier;
pub mod master;
pub mod metadata;
pub mod node;
pub mod routing;
pub mod service;
pub mod state;

pub use applier::ClusterApplierService;
pub use master::{ClusterStatePublisher, LocalPublisher, MasterService};
pub use metadata::{AliasMetadata, IndexMetadata, IndexState, Metadata};
pub use node::{Node, NodeRole, Nodes};
pub use routing::{
    IndexRoutingTable, IndexShardRoutingTable, OperationRouting, RoutingTable, ShardId,
    ShardRouting,
};
pub use service::ClusterService;
pub use state::{ClusterChangedEvent, ClusterState};
