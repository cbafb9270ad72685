//! Holds the committed cluster state of this node
//!
//! Committed states only move forward: a state whose version is not newer
//! than the current one is rejected. Every applied state is broadcast to
//! subscribers as a [`ClusterChangedEvent`].

use crate::cluster::state::{ClusterChangedEvent, ClusterState};
use crate::common::{Error, Result};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::broadcast;

const EVENT_CHANNEL_CAPACITY: usize = 128;

pub struct ClusterApplierService {
    state: RwLock<Arc<ClusterState>>,
    events: broadcast::Sender<ClusterChangedEvent>,
}

impl ClusterApplierService {
    pub fn new(initial: ClusterState) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            state: RwLock::new(Arc::new(initial)),
            events,
        }
    }

    /// Latest committed state
    pub fn state(&self) -> Arc<ClusterState> {
        self.state.read().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClusterChangedEvent> {
        self.events.subscribe()
    }

    /// Commit `new_state` if it is newer than the current one.
    pub fn apply(
        &self,
        source: &str,
        new_state: Arc<ClusterState>,
    ) -> Result<ClusterChangedEvent> {
        let event = {
            let mut current = self.state.write();
            if new_state.version <= current.version {
                return Err(Error::StaleState {
                    incoming: new_state.version,
                    current: current.version,
                });
            }
            let previous = std::mem::replace(&mut *current, new_state.clone());
            ClusterChangedEvent::new(source, previous, new_state)
        };

        tracing::debug!(
            "applied cluster state [{}] version {} (term {})",
            source,
            event.state.version,
            event.state.term
        );
        if event.local_master_changed() {
            if event.local_node_master() {
                tracing::info!("local node is now the elected master (term {})", event.state.term);
            } else {
                tracing::info!("local node is no longer the elected master (term {})", event.state.term);
            }
        }
        // no receivers is fine
        let _ = self.events.send(event.clone());
        Ok(event)
    }
}
