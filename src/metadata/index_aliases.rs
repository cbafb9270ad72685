//! Alias updates: a batch of add / remove / remove-index actions applied
//! atomically in one cluster state update.

use crate::cluster::metadata::{AliasMetadata, Metadata};
use crate::cluster::service::ClusterService;
use crate::cluster::state::{ClusterChangedEvent, ClusterState};
use crate::common::{Error, Result};
use crate::metadata::create_index::check_name_format;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AliasActionType {
    Add,
    Remove,
    RemoveIndex,
}

impl FromStr for AliasActionType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "add" => Ok(Self::Add),
            "remove" => Ok(Self::Remove),
            "remove_index" => Ok(Self::RemoveIndex),
            other => Err(Error::InvalidRequest(format!("unknown alias action [{}]", other))),
        }
    }
}

impl fmt::Display for AliasActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Add => "add",
            Self::Remove => "remove",
            Self::RemoveIndex => "remove_index",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AliasAction {
    Add { index: String, alias: AliasMetadata },
    Remove { index: String, alias: String },
    RemoveIndex { index: String },
}

impl AliasAction {
    pub fn add(index: impl Into<String>, alias: AliasMetadata) -> Self {
        Self::Add {
            index: index.into(),
            alias,
        }
    }

    pub fn remove(index: impl Into<String>, alias: impl Into<String>) -> Self {
        Self::Remove {
            index: index.into(),
            alias: alias.into(),
        }
    }

    pub fn remove_index(index: impl Into<String>) -> Self {
        Self::RemoveIndex { index: index.into() }
    }

    /// Build an action from its textual type, e.g. as received from a client.
    pub fn parse(action_type: &str, index: &str, alias: Option<&str>) -> Result<Self> {
        let needs_alias = || {
            alias
                .filter(|a| !a.is_empty())
                .ok_or_else(|| Error::InvalidRequest(format!("[{}] requires an alias", action_type)))
        };
        match action_type.parse::<AliasActionType>()? {
            AliasActionType::Add => Ok(Self::add(index, AliasMetadata::new(needs_alias()?))),
            AliasActionType::Remove => Ok(Self::remove(index, needs_alias()?)),
            AliasActionType::RemoveIndex => Ok(Self::remove_index(index)),
        }
    }

    pub fn action_type(&self) -> AliasActionType {
        match self {
            Self::Add { .. } => AliasActionType::Add,
            Self::Remove { .. } => AliasActionType::Remove,
            Self::RemoveIndex { .. } => AliasActionType::RemoveIndex,
        }
    }

    pub fn index(&self) -> &str {
        match self {
            Self::Add { index, .. } | Self::Remove { index, .. } | Self::RemoveIndex { index } => index,
        }
    }
}

/// Apply `actions` in order; any failing action rejects the whole batch.
pub fn apply_alias_actions(state: &ClusterState, actions: &[AliasAction]) -> Result<ClusterState> {
    if actions.is_empty() {
        return Err(Error::InvalidRequest("no alias actions".into()));
    }
    let mut metadata = state.metadata.to_builder();
    let mut routing = state.routing_table.to_builder();
    let mut routing_changed = false;

    for action in actions {
        let index = action.index();
        if metadata.get(index).is_none() {
            return Err(Error::IndexNotFound(index.to_string()));
        }
        match action {
            AliasAction::Add { alias, .. } => {
                if let Err(reason) = check_name_format(&alias.alias) {
                    return Err(Error::InvalidRequest(format!(
                        "invalid alias name [{}]: {}",
                        alias.alias, reason
                    )));
                }
                if metadata.get(&alias.alias).is_some() {
                    return Err(Error::InvalidRequest(format!(
                        "invalid alias name [{}]: an index with that name exists",
                        alias.alias
                    )));
                }
                metadata.update(index, |m| {
                    m.aliases.insert(alias.alias.clone(), alias.clone());
                });
            }
            AliasAction::Remove { alias, .. } => {
                let present = metadata.get(index).is_some_and(|m| m.aliases.contains_key(alias));
                if !present {
                    tracing::debug!("alias [{}] not on [{}], nothing to remove", alias, index);
                    continue;
                }
                metadata.update(index, |m| {
                    m.aliases.remove(alias);
                });
            }
            AliasAction::RemoveIndex { .. } => {
                metadata.remove(index);
                routing.remove(index);
                routing_changed = true;
            }
        }
    }

    let metadata = metadata.build();
    validate_write_indices(&metadata)?;
    let mut builder = state.builder().metadata(metadata);
    if routing_changed {
        builder = builder.routing_table(routing.build());
    }
    Ok(builder.build())
}

/// An alias may name at most one write index.
fn validate_write_indices(metadata: &Metadata) -> Result<()> {
    let mut write_indices: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for index in metadata.indices() {
        for alias in index.aliases.values().filter(|a| a.is_write_index == Some(true)) {
            write_indices.entry(&alias.alias).or_default().push(&index.index);
        }
    }
    match write_indices.into_iter().find(|(_, indices)| indices.len() > 1) {
        Some((alias, indices)) => Err(Error::InvalidRequest(format!(
            "alias [{}] has more than one write index {:?}",
            alias, indices
        ))),
        None => Ok(()),
    }
}

#[derive(Clone)]
pub struct MetadataIndexAliasesService {
    cluster_service: ClusterService,
}

impl MetadataIndexAliasesService {
    pub fn new(cluster_service: ClusterService) -> Self {
        Self { cluster_service }
    }

    pub async fn update_aliases(&self, actions: Vec<AliasAction>) -> Result<ClusterChangedEvent> {
        tracing::debug!("applying {} alias actions", actions.len());
        self.cluster_service
            .submit_state_update_task("index-aliases", move |current: &ClusterState| {
                apply_alias_actions(current, &actions)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::metadata::IndexMetadata;
    use crate::cluster::routing::RoutingTable;

    fn with_indices(names: &[&str]) -> ClusterState {
        let state = ClusterState::empty("test");
        let mut metadata = state.metadata.to_builder();
        let mut routing = RoutingTable::builder();
        for name in names {
            let index = IndexMetadata::new(*name, 1, 0);
            routing.add_as_new(&index);
            metadata.put(index);
        }
        state
            .builder()
            .metadata(metadata.build())
            .routing_table(routing.build())
            .build()
    }

    #[test]
    fn test_parse_action_types() {
        assert_eq!("add".parse::<AliasActionType>().unwrap(), AliasActionType::Add);
        assert_eq!(
            "remove_index".parse::<AliasActionType>().unwrap(),
            AliasActionType::RemoveIndex
        );
        assert!(matches!(
            "rename".parse::<AliasActionType>(),
            Err(Error::InvalidRequest(_))
        ));
        assert!(AliasAction::parse("add", "logs", None).is_err());
        assert_eq!(
            AliasAction::parse("remove", "logs", Some("current")).unwrap(),
            AliasAction::remove("logs", "current")
        );
    }

    #[test]
    fn test_add_then_resolve() {
        let state = with_indices(&["logs-1", "logs-2"]);
        let updated = apply_alias_actions(
            &state,
            &[
                AliasAction::add("logs-1", AliasMetadata::new("logs")),
                AliasAction::add("logs-2", AliasMetadata::new("logs")),
            ],
        )
        .unwrap();
        let resolved: Vec<&str> = updated
            .metadata
            .resolve_alias("logs")
            .into_iter()
            .map(|i| i.index.as_str())
            .collect();
        assert_eq!(resolved, vec!["logs-1", "logs-2"]);
        assert!(!state.metadata.has_alias("logs"));
        assert_eq!(updated.metadata.index("logs-1").unwrap().version, 2);
    }

    #[test]
    fn test_add_rejects_malformed_alias_names() {
        let state = with_indices(&["logs"]);
        for bad in ["a b", "_x", "Logs", "a*b", ""] {
            let err = apply_alias_actions(&state, &[AliasAction::add("logs", AliasMetadata::new(bad))]).unwrap_err();
            assert!(matches!(err, Error::InvalidRequest(_)), "{:?} should be rejected", bad);
        }
        assert!(apply_alias_actions(&state, &[AliasAction::add("logs", AliasMetadata::new("logs-current"))]).is_ok());
    }

    #[test]
    fn test_remove_missing_alias_is_noop() {
        let state = with_indices(&["logs"]);
        let updated = apply_alias_actions(&state, &[AliasAction::remove("logs", "nope")]).unwrap();
        assert!(updated.same_content(&state));
    }

    #[test]
    fn test_unknown_index_rejects_batch() {
        let state = with_indices(&["logs"]);
        let err = apply_alias_actions(
            &state,
            &[
                AliasAction::add("logs", AliasMetadata::new("a")),
                AliasAction::add("missing", AliasMetadata::new("a")),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, Error::IndexNotFound(_)));
    }

    #[test]
    fn test_remove_index_drops_routing() {
        let state = with_indices(&["old", "new"]);
        let updated = apply_alias_actions(
            &state,
            &[
                AliasAction::add("new", AliasMetadata::new("current")),
                AliasAction::remove_index("old"),
            ],
        )
        .unwrap();
        assert!(!updated.metadata.has_index("old"));
        assert!(!updated.routing_table.has_index("old"));
        assert_eq!(updated.metadata.lookup("current")[0].index, "new");
    }

    #[test]
    fn test_single_write_index_per_alias() {
        let state = with_indices(&["a", "b"]);
        let write = AliasMetadata {
            is_write_index: Some(true),
            ..AliasMetadata::new("w")
        };
        let err = apply_alias_actions(
            &state,
            &[AliasAction::add("a", write.clone()), AliasAction::add("b", write)],
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
    }
}
