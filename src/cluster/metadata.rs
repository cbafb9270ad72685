//! Index metadata: settings, mappings, aliases and shard counts
//!
//! Published metadata is never mutated. Updates go through
//! [`Metadata::to_builder`], which copies the index map, and produce a new
//! value that replaces the old one in the next cluster state.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexState {
    Open,
    Close,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasMetadata {
    pub alias: String,
    /// Query filter, as JSON text
    pub filter: Option<String>,
    pub index_routing: Option<String>,
    pub search_routing: Option<String>,
    pub is_write_index: Option<bool>,
}

impl AliasMetadata {
    pub fn new(alias: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub index: String,
    pub uuid: String,
    pub state: IndexState,
    pub number_of_shards: u32,
    pub number_of_replicas: u32,
    pub routing_num_shards: u32,
    pub settings: BTreeMap<String, String>,
    /// Mapping definition, as JSON text
    pub mappings: Option<String>,
    pub aliases: BTreeMap<String, AliasMetadata>,
    pub creation_date: i64,
    /// Bumped on every change to this index record
    pub version: u64,
}

impl IndexMetadata {
    pub fn new(index: impl Into<String>, number_of_shards: u32, number_of_replicas: u32) -> Self {
        Self {
            index: index.into(),
            uuid: crate::common::generate_uuid(),
            state: IndexState::Open,
            number_of_shards,
            number_of_replicas,
            routing_num_shards: number_of_shards,
            settings: BTreeMap::new(),
            mappings: None,
            aliases: BTreeMap::new(),
            creation_date: chrono::Utc::now().timestamp_millis(),
            version: 1,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state == IndexState::Open
    }

    /// Copies of every shard: one primary plus the replicas
    pub fn copies_per_shard(&self) -> u32 {
        1 + self.number_of_replicas
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub cluster_uuid: String,
    indices: BTreeMap<String, IndexMetadata>,
}

impl Metadata {
    pub fn builder() -> MetadataBuilder {
        MetadataBuilder::default()
    }

    pub fn to_builder(&self) -> MetadataBuilder {
        MetadataBuilder {
            cluster_uuid: self.cluster_uuid.clone(),
            indices: self.indices.clone(),
        }
    }

    pub fn index(&self, name: &str) -> Option<&IndexMetadata> {
        self.indices.get(name)
    }

    pub fn has_index(&self, name: &str) -> bool {
        self.indices.contains_key(name)
    }

    pub fn indices(&self) -> impl Iterator<Item = &IndexMetadata> {
        self.indices.values()
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn has_alias(&self, alias: &str) -> bool {
        self.indices.values().any(|i| i.aliases.contains_key(alias))
    }

    /// Indices an alias points to, ordered by index name
    pub fn resolve_alias(&self, alias: &str) -> Vec<&IndexMetadata> {
        self.indices
            .values()
            .filter(|i| i.aliases.contains_key(alias))
            .collect()
    }

    /// Resolve a concrete index name or an alias
    pub fn lookup(&self, name: &str) -> Vec<&IndexMetadata> {
        match self.indices.get(name) {
            Some(index) => vec![index],
            None => self.resolve_alias(name),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MetadataBuilder {
    cluster_uuid: String,
    indices: BTreeMap<String, IndexMetadata>,
}

impl MetadataBuilder {
    pub fn cluster_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.cluster_uuid = uuid.into();
        self
    }

    pub fn get(&self, name: &str) -> Option<&IndexMetadata> {
        self.indices.get(name)
    }

    pub fn put(&mut self, index: IndexMetadata) -> &mut Self {
        self.indices.insert(index.index.clone(), index);
        self
    }

    pub fn remove(&mut self, name: &str) -> Option<IndexMetadata> {
        self.indices.remove(name)
    }

    /// Replace an index record through `f`, bumping its version.
    pub fn update<F>(&mut self, name: &str, f: F) -> bool
    where
        F: FnOnce(&mut IndexMetadata),
    {
        match self.indices.get_mut(name) {
            Some(index) => {
                let before = index.clone();
                f(index);
                if *index != before {
                    index.version += 1;
                }
                true
            }
            None => false,
        }
    }

    pub fn build(self) -> Metadata {
        Metadata {
            cluster_uuid: self.cluster_uuid,
            indices: self.indices,
        }
    }
}
