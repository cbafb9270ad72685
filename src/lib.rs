//! # minisearch
//!
//! Coordination core of a distributed search cluster:
//! - Peer discovery and pre-voted, term-based leader election
//! - A serialized cluster state pipeline with two-phase publication
//! - Leader and follower fault detection
//! - Greedy, weight-balanced shard allocation
//! - Index, alias and open/close metadata services
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 Coordinator                  │
//! │  INIT → CANDIDATE ─┬─→ LEADER                │
//! │                    └─→ FOLLOWER              │
//! │  PeerFinder · PreVoteCollector · JoinHelper  │
//! │  LeaderChecker · FollowersChecker            │
//! └──────────────┬───────────────────────────────┘
//!                │ publish / commit
//! ┌──────────────▼───────────────────────────────┐
//! │ ClusterService = MasterService + Applier     │
//! │   task(state) → state' → reroute → publish   │
//! └──────────────┬───────────────────────────────┘
//!                │ ClusterChangedEvent
//!   ┌────────────┴───────┬──────────────────┐
//!   │ AllocationService  │ Metadata services│
//!   └────────────────────┴──────────────────┘
//! ```
//!
//! ## Usage
//!
//! ### Form a three node cluster
//! ```bash
//! minisearch-node serve --name a --bind 127.0.0.1:9300 \
//!   --seeds 127.0.0.1:9301,127.0.0.1:9302 --data ./data-a
//! minisearch-node serve --name b --bind 127.0.0.1:9301 \
//!   --seeds 127.0.0.1:9300,127.0.0.1:9302 --data ./data-b
//! minisearch-node serve --name c --bind 127.0.0.1:9302 \
//!   --seeds 127.0.0.1:9300,127.0.0.1:9301 --data ./data-c
//! ```
//!
//! ### Single node
//! ```bash
//! minisearch-node serve --bind 127.0.0.1:9300 --data ./data
//! ```

#![allow(clippy::result_large_err)]

pub mod allocation;
pub mod cluster;
pub mod common;
pub mod coordination;
pub mod metadata;
pub mod server;
pub mod transport;

// Re-export commonly used types
pub use cluster::{ClusterService, ClusterState, Node};
pub use common::{Config, Error, Result};
pub use coordination::{Coordinator, Mode};
pub use server::ClusterNode;

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
