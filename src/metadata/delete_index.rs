//! Delete index: drops the metadata and routing of every named index.

use crate::cluster::service::ClusterService;
use crate::cluster::state::{ClusterChangedEvent, ClusterState};
use crate::common::{Error, Result};

/// Remove `indices`; a single unknown name fails the whole request.
pub fn apply_delete_indices(state: &ClusterState, indices: &[String]) -> Result<ClusterState> {
    if indices.is_empty() {
        return Err(Error::InvalidRequest("no indices to delete".into()));
    }
    if let Some(missing) = indices.iter().find(|name| !state.metadata.has_index(name)) {
        return Err(Error::IndexNotFound(missing.clone()));
    }

    let mut metadata = state.metadata.to_builder();
    let mut routing = state.routing_table.to_builder();
    for name in indices {
        metadata.remove(name);
        routing.remove(name);
    }
    Ok(state
        .builder()
        .metadata(metadata.build())
        .routing_table(routing.build())
        .build())
}

#[derive(Clone)]
pub struct MetadataDeleteIndexService {
    cluster_service: ClusterService,
}

impl MetadataDeleteIndexService {
    pub fn new(cluster_service: ClusterService) -> Self {
        Self { cluster_service }
    }

    pub async fn delete_indices(&self, indices: Vec<String>) -> Result<ClusterChangedEvent> {
        let source = format!("delete-index {:?}", indices);
        tracing::info!("deleting indices {:?}", indices);
        self.cluster_service
            .submit_state_update_task(source, move |current: &ClusterState| {
                apply_delete_indices(current, &indices)
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
    fn test_delete_removes_metadata_and_routing() {
        let state = with_indices(&["a", "b"]);
        let deleted = apply_delete_indices(&state, &["a".to_string()]).unwrap();
        assert!(!deleted.metadata.has_index("a"));
        assert!(!deleted.routing_table.has_index("a"));
        assert!(deleted.metadata.has_index("b"));
        assert!(state.metadata.has_index("a"));
    }

    #[test]
    fn test_unknown_index_fails_whole_request() {
        let state = with_indices(&["a"]);
        let err = apply_delete_indices(&state, &["a".to_string(), "missing".to_string()]).unwrap_err();
        assert!(matches!(err, Error::IndexNotFound(name) if name == "missing"));
        assert!(apply_delete_indices(&state, &[]).is_err());
    }
}
