//! Cluster service: the entry point other components use to read the
//! committed state and to submit state update tasks.

use crate::cluster::applier::ClusterApplierService;
use crate::cluster::master::MasterService;
use crate::cluster::state::{ClusterChangedEvent, ClusterState};
use crate::common::Result;
use std::sync::Arc;
use tokio::sync::broadcast;

#[derive(Clone)]
pub struct ClusterService {
    applier: Arc<ClusterApplierService>,
    master: Arc<MasterService>,
}

impl ClusterService {
    pub fn new(applier: Arc<ClusterApplierService>, master: Arc<MasterService>) -> Self {
        Self { applier, master }
    }

    pub fn state(&self) -> Arc<ClusterState> {
        self.applier.state()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClusterChangedEvent> {
        self.applier.subscribe()
    }

    pub async fn submit_state_update_task<F>(
        &self,
        source: impl Into<String>,
        task: F,
    ) -> Result<ClusterChangedEvent>
    where
        F: FnMut(&ClusterState) -> Result<ClusterState> + Send + 'static,
    {
        self.master.submit_state_update_task(source, task).await
    }
}
