//! Leader and follower health checks
//!
//! A follower pings its leader every `leader_check_interval`; after
//! `leader_check_retry_count` consecutive failures the leader is declared
//! failed. The leader pings every other node of the committed state the same
//! way and reports each follower that exceeds the retry count.

use crate::cluster::applier::ClusterApplierService;
use crate::cluster::node::Node;
use crate::common::{DiscoveryConfig, Result};
use crate::coordination::messages::{Empty, FollowerCheckRequest, LeaderCheckRequest};
use crate::transport::{send_typed, Action, Transport};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};

pub type FailureCallback = Arc<dyn Fn(Node, String) + Send + Sync>;

#[derive(Debug, Clone, Copy)]
struct CheckSettings {
    interval: Duration,
    timeout: Duration,
    retry_count: u32,
}

impl From<&DiscoveryConfig> for CheckSettings {
    fn from(config: &DiscoveryConfig) -> Self {
        Self {
            interval: config.leader_check_interval(),
            timeout: config.leader_check_timeout(),
            retry_count: config.leader_check_retry_count,
        }
    }
}

pub struct LeaderChecker {
    transport: Arc<dyn Transport>,
    settings: CheckSettings,
    on_failure: FailureCallback,
    task: Mutex<Option<(String, JoinHandle<()>)>>,
}

impl LeaderChecker {
    pub fn new(transport: Arc<dyn Transport>, config: &DiscoveryConfig, on_failure: FailureCallback) -> Self {
        Self {
            transport,
            settings: config.into(),
            on_failure,
            task: Mutex::new(None),
        }
    }

    /// Start checking `leader`, replacing any previous target.
    pub fn start(&self, leader: Node, term: u64) {
        let mut task = self.task.lock();
        if let Some((current, handle)) = task.as_ref() {
            if *current == leader.id && !handle.is_finished() {
                return;
            }
        }
        if let Some((_, handle)) = task.take() {
            handle.abort();
        }

        let transport = self.transport.clone();
        let settings = self.settings;
        let on_failure = self.on_failure.clone();
        let leader_id = leader.id.clone();
        let handle = tokio::spawn(async move {
            let request = LeaderCheckRequest {
                source_node: transport.local_node(),
                term,
            };
            let mut failures = 0;
            loop {
                tokio::time::sleep(settings.interval).await;
                let result: Result<Empty> = send_typed(
                    transport.as_ref(),
                    &leader,
                    Action::LeaderCheck,
                    &request,
                    settings.timeout,
                )
                .await;
                match result {
                    Ok(_) => failures = 0,
                    Err(e) => {
                        failures += 1;
                        tracing::debug!(
                            "leader check of {} failed ({}/{}): {}",
                            leader,
                            failures,
                            settings.retry_count,
                            e
                        );
                        if failures >= settings.retry_count {
                            tracing::warn!("leader {} failed: {}", leader, e);
                            on_failure(leader, e.to_string());
                            return;
                        }
                    }
                }
            }
        });
        *task = Some((leader_id, handle));
    }

    pub fn stop(&self) {
        if let Some((_, handle)) = self.task.lock().take() {
            handle.abort();
        }
    }
}

pub struct FollowersChecker {
    transport: Arc<dyn Transport>,
    applier: Arc<ClusterApplierService>,
    settings: CheckSettings,
    on_failure: FailureCallback,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl FollowersChecker {
    pub fn new(
        transport: Arc<dyn Transport>,
        applier: Arc<ClusterApplierService>,
        config: &DiscoveryConfig,
        on_failure: FailureCallback,
    ) -> Self {
        Self {
            transport,
            applier,
            settings: config.into(),
            on_failure,
            task: Mutex::new(None),
        }
    }

    /// Check every node of the committed state on behalf of the leader of `term`.
    pub fn start(&self, term: u64) {
        let mut task = self.task.lock();
        if let Some(handle) = task.take() {
            handle.abort();
        }

        let transport = self.transport.clone();
        let applier = self.applier.clone();
        let settings = self.settings;
        let on_failure = self.on_failure.clone();
        *task = Some(tokio::spawn(async move {
            let local = transport.local_node();
            let request = FollowerCheckRequest {
                source_node: local.clone(),
                term,
            };
            let mut failures: BTreeMap<String, u32> = BTreeMap::new();
            loop {
                tokio::time::sleep(settings.interval).await;
                let nodes = applier.state().nodes.clone();
                failures.retain(|id, _| nodes.contains(id));

                let mut checks = JoinSet::new();
                for node in nodes.iter().filter(|n| n.id != local.id).cloned() {
                    let transport = transport.clone();
                    let request = request.clone();
                    checks.spawn(async move {
                        let result: Result<Empty> = send_typed(
                            transport.as_ref(),
                            &node,
                            Action::FollowerCheck,
                            &request,
                            settings.timeout,
                        )
                        .await;
                        (node, result)
                    });
                }

                while let Some(joined) = checks.join_next().await {
                    let Ok((node, result)) = joined else {
                        continue;
                    };
                    match result {
                        Ok(_) => {
                            failures.remove(&node.id);
                        }
                        Err(e) => {
                            let count = failures.entry(node.id.clone()).or_insert(0);
                            *count += 1;
                            tracing::debug!(
                                "follower check of {} failed ({}/{}): {}",
                                node,
                                count,
                                settings.retry_count,
                                e
                            );
                            if *count >= settings.retry_count {
                                failures.remove(&node.id);
                                tracing::warn!("follower {} failed: {}", node, e);
                                on_failure(node, e.to_string());
                            }
                        }
                    }
                }
            }
        }));
    }

    pub fn stop(&self) {
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
    }
}

impl Drop for LeaderChecker {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Drop for FollowersChecker {
    fn drop(&mut self) {
        self.stop();
    }
}
