//! Master service: serialized execution of cluster state update tasks
//!
//! Tasks are queued on a channel and executed one at a time by a single
//! worker, so states are derived strictly in submission order and versions
//! never skip or repeat. A task receives the latest committed state and
//! returns its successor; the worker stamps the version, hands the result
//! to a [`ClusterStatePublisher`] and reports the outcome to the submitter.
//! Retryable failures re-run the task against the then-latest committed
//! state.

use crate::cluster::applier::ClusterApplierService;
use crate::cluster::state::{ClusterChangedEvent, ClusterState};
use crate::common::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

pub type StateUpdateFn = Box<dyn FnMut(&ClusterState) -> Result<ClusterState> + Send>;

/// Makes a new state durable and visible.
#[async_trait]
pub trait ClusterStatePublisher: Send + Sync {
    /// Term stamped on published states
    fn term(&self) -> u64;

    /// Version for the successor of `current`
    fn next_version(&self, current: &ClusterState) -> u64 {
        current.version + 1
    }

    /// Publish and commit `event.state`; on success it is the applied state.
    async fn publish(&self, event: &ClusterChangedEvent) -> Result<()>;
}

/// Publisher for a node acting alone: commits straight to the local applier.
pub struct LocalPublisher {
    applier: Arc<ClusterApplierService>,
    term: u64,
}

impl LocalPublisher {
    pub fn new(applier: Arc<ClusterApplierService>, term: u64) -> Self {
        Self { applier, term }
    }
}

#[async_trait]
impl ClusterStatePublisher for LocalPublisher {
    fn term(&self) -> u64 {
        self.term
    }

    async fn publish(&self, event: &ClusterChangedEvent) -> Result<()> {
        self.applier.apply(&event.source, event.state.clone())?;
        Ok(())
    }
}

struct PendingTask {
    source: String,
    task: StateUpdateFn,
    respond: oneshot::Sender<Result<ClusterChangedEvent>>,
}

pub struct MasterService {
    tx: mpsc::UnboundedSender<PendingTask>,
}

impl MasterService {
    /// Spawn the task worker. Must be called within a tokio runtime.
    pub fn start(
        applier: Arc<ClusterApplierService>,
        publisher: Arc<dyn ClusterStatePublisher>,
        max_retries: u32,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_tasks(rx, applier, publisher, max_retries));
        Self { tx }
    }

    /// Queue a task and wait for its state to be committed.
    ///
    /// A task returning a state equal to its input is a no-op: the returned
    /// event carries the unchanged state and nothing is published.
    pub async fn submit_state_update_task<F>(
        &self,
        source: impl Into<String>,
        task: F,
    ) -> Result<ClusterChangedEvent>
    where
        F: FnMut(&ClusterState) -> Result<ClusterState> + Send + 'static,
    {
        let (respond, rx) = oneshot::channel();
        self.tx
            .send(PendingTask {
                source: source.into(),
                task: Box::new(task),
                respond,
            })
            .map_err(|_| Error::MasterStopped)?;
        rx.await.map_err(|_| Error::MasterStopped)?
    }
}

async fn run_tasks(
    mut rx: mpsc::UnboundedReceiver<PendingTask>,
    applier: Arc<ClusterApplierService>,
    publisher: Arc<dyn ClusterStatePublisher>,
    max_retries: u32,
) {
    while let Some(mut pending) = rx.recv().await {
        let result = execute(&mut pending, &applier, publisher.as_ref(), max_retries).await;
        if let Err(e) = &result {
            tracing::warn!("cluster state task [{}] failed: {}", pending.source, e);
        }
        // submitter may have gone away
        let _ = pending.respond.send(result);
    }
    tracing::debug!("master service stopped");
}

async fn execute(
    pending: &mut PendingTask,
    applier: &ClusterApplierService,
    publisher: &dyn ClusterStatePublisher,
    max_retries: u32,
) -> Result<ClusterChangedEvent> {
    let mut attempt = 0;
    loop {
        let current = applier.state();
        let outcome = match (pending.task)(&current) {
            Ok(new_state) if new_state.same_content(&current) => {
                tracing::debug!("cluster state task [{}] made no changes", pending.source);
                return Ok(ClusterChangedEvent::new(
                    pending.source.clone(),
                    current.clone(),
                    current,
                ));
            }
            Ok(new_state) => {
                let version = publisher.next_version(&current);
                let new_state = Arc::new(new_state.into_published(version, publisher.term()));
                let event = ClusterChangedEvent::new(pending.source.clone(), current, new_state);
                publisher.publish(&event).await.map(|_| event)
            }
            Err(e) => Err(e),
        };

        match outcome {
            Err(e) if e.is_retryable() && attempt < max_retries => {
                attempt += 1;
                tracing::warn!(
                    "cluster state task [{}] attempt {} failed: {}, re-running on latest state",
                    pending.source,
                    attempt,
                    e
                );
            }
            other => return other,
        }
    }
}
