//! Routing table: which node holds which shard copy

use crate::cluster::metadata::IndexMetadata;
use crate::common::{shard_for_routing, Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ShardId {
    pub index: String,
    pub id: u32,
}

impl ShardId {
    pub fn new(index: impl Into<String>, id: u32) -> Self {
        Self {
            index: index.into(),
            id,
        }
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}][{}]", self.index, self.id)
    }
}

/// One copy of a shard. Unassigned when `current_node_id` is `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardRouting {
    pub shard_id: ShardId,
    pub primary: bool,
    pub current_node_id: Option<String>,
}

impl ShardRouting {
    pub fn unassigned(shard_id: ShardId, primary: bool) -> Self {
        Self {
            shard_id,
            primary,
            current_node_id: None,
        }
    }

    pub fn is_assigned(&self) -> bool {
        self.current_node_id.is_some()
    }

    pub fn assign_to(&self, node_id: impl Into<String>) -> Self {
        Self {
            current_node_id: Some(node_id.into()),
            ..self.clone()
        }
    }

    pub fn unassign(&self) -> Self {
        Self {
            current_node_id: None,
            ..self.clone()
        }
    }
}

/// All copies of a single shard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexShardRoutingTable {
    pub shard_id: ShardId,
    pub copies: Vec<ShardRouting>,
}

impl IndexShardRoutingTable {
    pub fn primary(&self) -> Option<&ShardRouting> {
        self.copies.iter().find(|s| s.primary)
    }

    pub fn replicas(&self) -> impl Iterator<Item = &ShardRouting> {
        self.copies.iter().filter(|s| !s.primary)
    }

    pub fn assigned_nodes(&self) -> impl Iterator<Item = &str> {
        self.copies.iter().filter_map(|s| s.current_node_id.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexRoutingTable {
    pub index: String,
    shards: BTreeMap<u32, IndexShardRoutingTable>,
}

impl IndexRoutingTable {
    /// Fresh table with every copy unassigned
    pub fn new_unassigned(index: &IndexMetadata) -> Self {
        let shards = (0..index.number_of_shards)
            .map(|id| {
                let shard_id = ShardId::new(index.index.clone(), id);
                let copies = (0..index.copies_per_shard())
                    .map(|copy| ShardRouting::unassigned(shard_id.clone(), copy == 0))
                    .collect();
                (id, IndexShardRoutingTable { shard_id, copies })
            })
            .collect();
        Self {
            index: index.index.clone(),
            shards,
        }
    }

    pub fn from_shards(index: impl Into<String>, shards: Vec<IndexShardRoutingTable>) -> Self {
        Self {
            index: index.into(),
            shards: shards.into_iter().map(|s| (s.shard_id.id, s)).collect(),
        }
    }

    pub fn shard(&self, id: u32) -> Option<&IndexShardRoutingTable> {
        self.shards.get(&id)
    }

    pub fn shards(&self) -> impl Iterator<Item = &IndexShardRoutingTable> {
        self.shards.values()
    }

    pub fn all_copies(&self) -> impl Iterator<Item = &ShardRouting> {
        self.shards.values().flat_map(|s| s.copies.iter())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingTable {
    indices: BTreeMap<String, IndexRoutingTable>,
}

impl RoutingTable {
    pub fn builder() -> RoutingTableBuilder {
        RoutingTableBuilder::default()
    }

    pub fn to_builder(&self) -> RoutingTableBuilder {
        RoutingTableBuilder {
            indices: self.indices.clone(),
        }
    }

    pub fn index(&self, name: &str) -> Option<&IndexRoutingTable> {
        self.indices.get(name)
    }

    pub fn has_index(&self, name: &str) -> bool {
        self.indices.contains_key(name)
    }

    pub fn indices(&self) -> impl Iterator<Item = &IndexRoutingTable> {
        self.indices.values()
    }

    pub fn all_shards(&self) -> impl Iterator<Item = &ShardRouting> {
        self.indices.values().flat_map(|i| i.all_copies())
    }

    pub fn unassigned_shards(&self) -> impl Iterator<Item = &ShardRouting> {
        self.all_shards().filter(|s| !s.is_assigned())
    }

    pub fn shards_on_node<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a ShardRouting> {
        self.all_shards()
            .filter(move |s| s.current_node_id.as_deref() == Some(node_id))
    }
}

#[derive(Debug, Clone, Default)]
pub struct RoutingTableBuilder {
    indices: BTreeMap<String, IndexRoutingTable>,
}

impl RoutingTableBuilder {
    /// Add routing for a newly created index, every copy unassigned
    pub fn add_as_new(&mut self, index: &IndexMetadata) -> &mut Self {
        self.indices
            .insert(index.index.clone(), IndexRoutingTable::new_unassigned(index));
        self
    }

    pub fn add(&mut self, table: IndexRoutingTable) -> &mut Self {
        self.indices.insert(table.index.clone(), table);
        self
    }

    pub fn remove(&mut self, index: &str) -> &mut Self {
        self.indices.remove(index);
        self
    }

    pub fn build(self) -> RoutingTable {
        RoutingTable {
            indices: self.indices,
        }
    }
}

/// Maps documents to shards
pub struct OperationRouting;

impl OperationRouting {
    /// Shard for a document id, or for `routing` when given
    pub fn shard_id(index: &IndexMetadata, id: &str, routing: Option<&str>) -> Result<ShardId> {
        if index.routing_num_shards == 0 {
            return Err(Error::InvalidRequest(format!(
                "index [{}] has no shards",
                index.index
            )));
        }
        let effective = routing.unwrap_or(id);
        let shard = shard_for_routing(effective, index.routing_num_shards);
        Ok(ShardId::new(index.index.clone(), shard))
    }
}
