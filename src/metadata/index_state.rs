//! Open and close indices
//!
//! A closed index keeps its metadata but loses its routing table, freeing
//! its shard slots. Opening recreates the routing table unassigned and
//! reroutes.

use crate::allocation::AllocationService;
use crate::cluster::metadata::IndexState;
use crate::cluster::service::ClusterService;
use crate::cluster::state::{ClusterChangedEvent, ClusterState};
use crate::common::{Error, Result};
use std::sync::Arc;

pub fn apply_index_state(state: &ClusterState, indices: &[String], target: IndexState) -> Result<ClusterState> {
    if indices.is_empty() {
        return Err(Error::InvalidRequest("no indices given".into()));
    }
    let mut metadata = state.metadata.to_builder();
    let mut routing = state.routing_table.to_builder();
    for name in indices {
        let index = metadata
            .get(name)
            .cloned()
            .ok_or_else(|| Error::IndexNotFound(name.clone()))?;
        if index.state == target {
            continue;
        }
        metadata.update(name, |m| m.state = target);
        match target {
            IndexState::Close => {
                routing.remove(name);
            }
            IndexState::Open => {
                routing.add_as_new(&index);
            }
        }
    }
    Ok(state
        .builder()
        .metadata(metadata.build())
        .routing_table(routing.build())
        .build())
}

#[derive(Clone)]
pub struct MetadataIndexStateService {
    cluster_service: ClusterService,
    allocation: Arc<AllocationService>,
}

impl MetadataIndexStateService {
    pub fn new(cluster_service: ClusterService, allocation: Arc<AllocationService>) -> Self {
        Self {
            cluster_service,
            allocation,
        }
    }

    pub async fn close_indices(&self, indices: Vec<String>) -> Result<ClusterChangedEvent> {
        tracing::info!("closing indices {:?}", indices);
        self.cluster_service
            .submit_state_update_task(format!("close-indices {:?}", indices), move |current: &ClusterState| {
                apply_index_state(current, &indices, IndexState::Close)
            })
            .await
    }

    pub async fn open_indices(&self, indices: Vec<String>) -> Result<ClusterChangedEvent> {
        tracing::info!("opening indices {:?}", indices);
        let allocation = self.allocation.clone();
        self.cluster_service
            .submit_state_update_task(format!("open-indices {:?}", indices), move |current: &ClusterState| {
                let state = apply_index_state(current, &indices, IndexState::Open)?;
                Ok(allocation.reroute(&state))
            })
            .await
    }
}
