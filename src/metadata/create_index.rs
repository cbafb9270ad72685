//! Create index: validates the request and adds the index metadata and an
//! unassigned routing table, then reroutes so the new shards get placed.

use crate::allocation::AllocationService;
use crate::cluster::metadata::{AliasMetadata, IndexMetadata, Metadata};
use crate::cluster::service::ClusterService;
use crate::cluster::state::{ClusterChangedEvent, ClusterState};
use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

const MAX_INDEX_NAME_BYTES: usize = 255;
pub const MAX_NUMBER_OF_SHARDS: u32 = 1024;
pub const MAX_NUMBER_OF_REPLICAS: u32 = 1024;
const INVALID_NAME_CHARS: &[char] = &['\\', '/', '*', '?', '"', '<', '>', '|', ',', '#', ' '];

fn default_shards() -> u32 {
    1
}

fn default_replicas() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateIndexRequest {
    pub index: String,
    #[serde(default = "default_shards")]
    pub number_of_shards: u32,
    #[serde(default = "default_replicas")]
    pub number_of_replicas: u32,
    #[serde(default)]
    pub settings: BTreeMap<String, String>,
    /// Mapping definition as a JSON object
    #[serde(default)]
    pub mappings: Option<String>,
    #[serde(default)]
    pub aliases: Vec<AliasMetadata>,
}

impl CreateIndexRequest {
    pub fn new(index: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            number_of_shards: default_shards(),
            number_of_replicas: default_replicas(),
            settings: BTreeMap::new(),
            mappings: None,
            aliases: Vec::new(),
        }
    }

    pub fn shards(mut self, shards: u32) -> Self {
        self.number_of_shards = shards;
        self
    }

    pub fn replicas(mut self, replicas: u32) -> Self {
        self.number_of_replicas = replicas;
        self
    }

    pub fn setting(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }

    pub fn mappings(mut self, mappings: impl Into<String>) -> Self {
        self.mappings = Some(mappings.into());
        self
    }

    pub fn alias(mut self, alias: AliasMetadata) -> Self {
        self.aliases.push(alias);
        self
    }
}

/// Character, case and prefix rules shared by index and alias names.
pub(crate) fn check_name_format(name: &str) -> std::result::Result<(), &'static str> {
    if name.is_empty() {
        return Err("must not be empty");
    }
    if name.len() > MAX_INDEX_NAME_BYTES {
        return Err("is too long");
    }
    if name != name.to_lowercase() {
        return Err("must be lowercase");
    }
    if name.contains(INVALID_NAME_CHARS) {
        return Err("must not contain \\, /, *, ?, \", <, >, |, ',', #, or spaces");
    }
    if name.starts_with(['_', '-', '+']) {
        return Err("must not start with '_', '-', or '+'");
    }
    if name == "." || name == ".." {
        return Err("must not be '.' or '..'");
    }
    Ok(())
}

/// Check `name` against the naming rules and the existing indices and aliases.
pub fn validate_index_name(name: &str, metadata: &Metadata) -> Result<()> {
    let invalid = |reason: &str| {
        Err(Error::InvalidIndexName {
            name: name.to_string(),
            reason: reason.to_string(),
        })
    };
    if let Err(reason) = check_name_format(name) {
        return invalid(reason);
    }
    if metadata.has_index(name) {
        return Err(Error::IndexAlreadyExists(name.to_string()));
    }
    if metadata.has_alias(name) {
        return invalid("an alias with the same name already exists");
    }
    Ok(())
}

/// Parse a mapping definition, returning it in compact form.
pub fn parse_mappings(mappings: &str) -> Result<String> {
    let value: serde_json::Value = serde_json::from_str(mappings)
        .map_err(|e| Error::InvalidRequest(format!("failed to parse mappings: {}", e)))?;
    if !value.is_object() {
        return Err(Error::InvalidRequest("mappings must be a JSON object".into()));
    }
    Ok(value.to_string())
}

/// Derive the state holding the new index; its shards are left unassigned.
pub fn apply_create_index(state: &ClusterState, request: &CreateIndexRequest) -> Result<ClusterState> {
    validate_index_name(&request.index, &state.metadata)?;
    if request.number_of_shards == 0 || request.number_of_shards > MAX_NUMBER_OF_SHARDS {
        return Err(Error::InvalidRequest(format!(
            "index [{}] must have between 1 and {} shards, got {}",
            request.index, MAX_NUMBER_OF_SHARDS, request.number_of_shards
        )));
    }
    if request.number_of_replicas > MAX_NUMBER_OF_REPLICAS {
        return Err(Error::InvalidRequest(format!(
            "index [{}] may have at most {} replicas, got {}",
            request.index, MAX_NUMBER_OF_REPLICAS, request.number_of_replicas
        )));
    }

    let mut index = IndexMetadata::new(&request.index, request.number_of_shards, request.number_of_replicas);
    index.settings = request.settings.clone();
    index.mappings = request.mappings.as_deref().map(parse_mappings).transpose()?;
    for alias in &request.aliases {
        if let Err(reason) = check_name_format(&alias.alias) {
            return Err(Error::InvalidRequest(format!("invalid alias name [{}]: {}", alias.alias, reason)));
        }
        if alias.alias == request.index || state.metadata.has_index(&alias.alias) {
            return Err(Error::InvalidRequest(format!(
                "invalid alias [{}] for index [{}]",
                alias.alias, request.index
            )));
        }
        index.aliases.insert(alias.alias.clone(), alias.clone());
    }

    let mut metadata = state.metadata.to_builder();
    metadata.put(index.clone());
    let mut routing = state.routing_table.to_builder();
    routing.add_as_new(&index);
    Ok(state
        .builder()
        .metadata(metadata.build())
        .routing_table(routing.build())
        .build())
}

#[derive(Clone)]
pub struct MetadataCreateIndexService {
    cluster_service: ClusterService,
    allocation: Arc<AllocationService>,
}

impl MetadataCreateIndexService {
    pub fn new(cluster_service: ClusterService, allocation: Arc<AllocationService>) -> Self {
        Self {
            cluster_service,
            allocation,
        }
    }

    pub async fn create_index(&self, request: CreateIndexRequest) -> Result<ClusterChangedEvent> {
        let allocation = self.allocation.clone();
        let source = format!("create-index [{}]", request.index);
        let event = self
            .cluster_service
            .submit_state_update_task(source, move |current: &ClusterState| {
                let state = apply_create_index(current, &request)?;
                Ok(allocation.reroute(&state))
            })
            .await?;
        tracing::info!("index created, cluster state version {}", event.state.version);
        Ok(event)
    }
}
