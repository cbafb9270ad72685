//! Common utilities and types shared across minisearch

pub mod config;
pub mod error;
pub mod hash;
pub mod utils;

pub use self::config::{AllocationConfig, Config, DiscoveryConfig, NodeConfig};
pub use error::{Error, Result};
pub use hash::{murmur3_x86_32, routing_hash, shard_for_routing};
pub use utils::{generate_node_id, generate_uuid, is_majority, retry_with_backoff};
