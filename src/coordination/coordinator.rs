//! Coordinator: the mode machine that ties discovery, elections,
//! publication and fault detection together
//!
//! A node starts in `INIT`, becomes a `CANDIDATE` on its initial join and
//! from there either finds an active leader and becomes its `FOLLOWER`, or
//! wins an election and becomes `LEADER`. Any failure to reach the leader
//! (or, for a leader, to reach a publication quorum) sends the node back to
//! `CANDIDATE`.

use crate::allocation::AllocationService;
use crate::cluster::applier::ClusterApplierService;
use crate::cluster::master::{ClusterStatePublisher, MasterService};
use crate::cluster::node::{Node, Nodes};
use crate::cluster::service::ClusterService;
use crate::cluster::state::{ClusterChangedEvent, ClusterState};
use crate::common::{generate_uuid, is_majority, DiscoveryConfig, Error, Result};
use crate::coordination::coordination_state::CoordinationState;
use crate::coordination::fault_detection::{FollowersChecker, LeaderChecker};
use crate::coordination::join_helper::JoinHelper;
use crate::coordination::messages::{
    ApplyCommitRequest, Empty, FollowerCheckRequest, Join, JoinRequest, LeaderCheckRequest, PeersRequest,
    PreVoteRequest, PublishRequest, PublishResponse, StartJoinRequest,
};
use crate::coordination::peer_finder::{PeerFinder, PeerFinderListener};
use crate::coordination::persisted::PersistedState;
use crate::coordination::pre_vote::PreVoteCollector;
use crate::transport::codec;
use crate::transport::{send_typed, typed_handler, Action, Transport};
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::task::JoinSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Init,
    Candidate,
    Leader,
    Follower,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Mode::Init => "INIT",
            Mode::Candidate => "CANDIDATE",
            Mode::Leader => "LEADER",
            Mode::Follower => "FOLLOWER",
        };
        f.write_str(name)
    }
}

struct Inner {
    mode: Mode,
    leader: Option<Node>,
    last_election: Option<Instant>,
}

pub struct Coordinator {
    weak_self: Weak<Coordinator>,
    local_node: Node,
    settings: DiscoveryConfig,
    transport: Arc<dyn Transport>,
    coordination_state: Mutex<CoordinationState>,
    applier: Arc<ClusterApplierService>,
    cluster_service: ClusterService,
    allocation: Arc<AllocationService>,
    peer_finder: Arc<PeerFinder>,
    pre_vote: Arc<PreVoteCollector>,
    join_helper: Arc<JoinHelper>,
    leader_checker: LeaderChecker,
    followers_checker: FollowersChecker,
    inner: Mutex<Inner>,
    /// Voters of the current term, added to the state once elected
    pending_joins: Mutex<BTreeMap<String, Node>>,
}

impl Coordinator {
    /// Build a coordinator in `INIT` mode. Must be called within a tokio
    /// runtime; nothing is registered until [`Coordinator::start`].
    pub fn new(
        cluster_name: &str,
        settings: DiscoveryConfig,
        transport: Arc<dyn Transport>,
        persisted: Arc<dyn PersistedState>,
        allocation: Arc<AllocationService>,
    ) -> Arc<Self> {
        let local_node = transport.local_node();
        Arc::new_cyclic(|weak: &Weak<Coordinator>| {
            let applier = Arc::new(ClusterApplierService::new(ClusterState::initial(
                cluster_name,
                &local_node,
            )));
            let publisher = Arc::new(CoordinatorPublisher {
                coordinator: weak.clone(),
            });
            let master = Arc::new(MasterService::start(
                applier.clone(),
                publisher,
                settings.max_task_retries,
            ));
            let cluster_service = ClusterService::new(applier.clone(), master);

            let listener: Weak<dyn PeerFinderListener> = weak.clone();
            let peer_finder = Arc::new(PeerFinder::new(transport.clone(), listener, &settings));

            let on_election = weak.clone();
            let pre_vote = Arc::new(PreVoteCollector::new(
                transport.clone(),
                settings.join_timeout(),
                Arc::new(move |max_term_seen: u64| {
                    if let Some(coordinator) = on_election.upgrade() {
                        coordinator.start_election(max_term_seen);
                    }
                }),
            ));

            let on_start_join = weak.clone();
            let join_helper = Arc::new(JoinHelper::new(
                transport.clone(),
                settings.join_timeout(),
                Arc::new(move |request: &StartJoinRequest| match on_start_join.upgrade() {
                    Some(coordinator) => coordinator.join_leader_in_term(request),
                    None => Err(Error::Internal("node is shutting down".into())),
                }),
            ));

            let on_leader_failure = weak.clone();
            let leader_checker = LeaderChecker::new(
                transport.clone(),
                &settings,
                Arc::new(move |leader: Node, reason: String| {
                    if let Some(coordinator) = on_leader_failure.upgrade() {
                        coordinator.on_leader_failure(leader, reason);
                    }
                }),
            );

            let on_follower_failure = weak.clone();
            let followers_checker = FollowersChecker::new(
                transport.clone(),
                applier.clone(),
                &settings,
                Arc::new(move |node: Node, reason: String| {
                    if let Some(coordinator) = on_follower_failure.upgrade() {
                        coordinator.on_follower_failure(node, reason);
                    }
                }),
            );

            let coordination_state = CoordinationState::new(local_node.clone(), persisted);

            Self {
                weak_self: weak.clone(),
                local_node,
                settings,
                transport,
                coordination_state: Mutex::new(coordination_state),
                applier,
                cluster_service,
                allocation,
                peer_finder,
                pre_vote,
                join_helper,
                leader_checker,
                followers_checker,
                inner: Mutex::new(Inner {
                    mode: Mode::Init,
                    leader: None,
                    last_election: None,
                }),
                pending_joins: Mutex::new(BTreeMap::new()),
            }
        })
    }

    /// Register the coordination request handlers on the transport.
    pub fn start(&self) -> Result<()> {
        self.pre_vote.update(self.current_term(), None);

        self.register(Action::PeerFind, |c, _sender, request: PeersRequest| async move {
            c.peer_finder.handle_peers_request(request).await
        })?;
        self.register(Action::PreVote, |c, _sender, request: PreVoteRequest| async move {
            Ok(c.pre_vote.handle_pre_vote_request(&request))
        })?;
        self.register(Action::StartJoin, |c, _sender, request: StartJoinRequest| async move {
            c.join_helper.handle_start_join_request(request)
        })?;
        self.register(Action::Join, |c, sender, request: JoinRequest| async move {
            c.handle_join_request(sender, request).await
        })?;
        self.register(Action::Publish, |c, sender, request: PublishRequest| async move {
            c.handle_publish_request(sender, request)
        })?;
        self.register(Action::Commit, |c, sender, request: ApplyCommitRequest| async move {
            c.handle_apply_commit(sender, request)
        })?;
        self.register(Action::LeaderCheck, |c, sender, request: LeaderCheckRequest| async move {
            c.handle_leader_check(sender, request)
        })?;
        self.register(Action::FollowerCheck, |c, sender, request: FollowerCheckRequest| async move {
            c.handle_follower_check(sender, request)
        })?;

        tracing::info!(
            "coordinator started on {} (term {})",
            self.local_node,
            self.current_term()
        );
        Ok(())
    }

    fn register<Req, Resp, F, Fut>(&self, action: Action, f: F) -> Result<()>
    where
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + Send + 'static,
        F: Fn(Arc<Coordinator>, Node, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp>> + Send + 'static,
    {
        let weak = self.weak_self.clone();
        self.transport.register_handler(
            action,
            typed_handler(move |sender: Node, request: Req| {
                let call = weak.upgrade().map(|c| f(c, sender, request));
                async move {
                    match call {
                        Some(call) => call.await,
                        None => Err(Error::Internal("node is shutting down".into())),
                    }
                }
            }),
        )
    }

    /// Leave `INIT` and look for a cluster to join.
    pub fn start_initial_join(&self) {
        self.become_candidate("initial join");
    }

    /// Stop discovery and fault detection.
    pub fn stop(&self) {
        self.peer_finder.deactivate();
        self.leader_checker.stop();
        self.followers_checker.stop();
        let mut inner = self.inner.lock();
        inner.mode = Mode::Init;
        inner.leader = None;
    }

    pub fn mode(&self) -> Mode {
        self.inner.lock().mode
    }

    pub fn leader(&self) -> Option<Node> {
        self.inner.lock().leader.clone()
    }

    pub fn local_node(&self) -> &Node {
        &self.local_node
    }

    pub fn current_term(&self) -> u64 {
        self.coordination_state.lock().current_term()
    }

    pub fn last_accepted_state(&self) -> Arc<ClusterState> {
        self.coordination_state.lock().last_accepted_state()
    }

    pub fn cluster_service(&self) -> &ClusterService {
        &self.cluster_service
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn become_candidate(&self, reason: &str) {
        {
            let mut inner = self.inner.lock();
            if inner.mode == Mode::Candidate {
                return;
            }
            tracing::info!("{} -> CANDIDATE: {}", inner.mode, reason);
            inner.mode = Mode::Candidate;
            inner.leader = None;
        }
        self.leader_checker.stop();
        self.followers_checker.stop();
        self.pending_joins.lock().clear();
        self.pre_vote.update(self.current_term(), None);

        let last_accepted = self.last_accepted_state();
        self.peer_finder.activate(last_accepted.nodes.iter().cloned().collect());
    }

    fn become_leader(&self, reason: &str) {
        let term = self.current_term();
        {
            let mut inner = self.inner.lock();
            if inner.mode == Mode::Leader {
                return;
            }
            tracing::info!("{} -> LEADER in term {}: {}", inner.mode, term, reason);
            inner.mode = Mode::Leader;
            inner.leader = Some(self.local_node.clone());
        }
        self.peer_finder.deactivate();
        self.leader_checker.stop();
        self.pre_vote.update(term, Some(self.local_node.clone()));
        self.followers_checker.start(term);

        if let Some(this) = self.weak_self.upgrade() {
            tokio::spawn(async move { this.publish_elected_state(term).await });
        }
    }

    fn become_follower(&self, reason: &str, leader: Node) {
        let term = self.current_term();
        {
            let mut inner = self.inner.lock();
            let same_leader = inner.leader.as_ref().map(|l| l.id.as_str()) == Some(leader.id.as_str());
            if inner.mode == Mode::Follower && same_leader {
                return;
            }
            tracing::info!("{} -> FOLLOWER of {} in term {}: {}", inner.mode, leader, term, reason);
            inner.mode = Mode::Follower;
            inner.leader = Some(leader.clone());
        }
        self.peer_finder.deactivate();
        self.followers_checker.stop();
        self.pending_joins.lock().clear();
        self.pre_vote.update(term, Some(leader.clone()));
        self.leader_checker.start(leader, term);
    }

    /// Adopt a newer term seen from `source`. A leader or follower of an
    /// older term steps down.
    fn ensure_term_at_least(&self, source: &Node, term: u64) -> Result<()> {
        if !self.coordination_state.lock().ensure_term_at_least(term)? {
            return Ok(());
        }
        tracing::debug!("adopted term {} from {}", term, source);
        if self.mode() == Mode::Candidate {
            self.pre_vote.update(term, None);
        } else {
            self.become_candidate(&format!("newer term {} from {}", term, source));
        }
        Ok(())
    }

    fn join_leader_in_term(&self, request: &StartJoinRequest) -> Result<Join> {
        let join = self.coordination_state.lock().handle_start_join(request)?;
        self.inner.lock().last_election = Some(Instant::now());
        if self.mode() == Mode::Candidate {
            self.pre_vote.update(join.term, None);
        } else {
            self.become_candidate(&format!("joining {} in term {}", request.source_node, join.term));
        }
        Ok(join)
    }

    /// Master-eligible nodes whose majority decides elections, one per
    /// address: last accepted members, then connected peers, then this node.
    fn voting_nodes(&self) -> BTreeMap<String, Node> {
        let mut by_address: BTreeMap<String, Node> = BTreeMap::new();
        let last_accepted = self.last_accepted_state();
        let candidates = last_accepted
            .nodes
            .master_eligible_nodes()
            .cloned()
            .chain(self.transport.connected_nodes())
            .chain(std::iter::once(self.local_node.clone()));
        for node in candidates.filter(|n| n.is_master_eligible()) {
            by_address.insert(node.address.clone(), node);
        }
        by_address.into_values().map(|n| (n.id.clone(), n)).collect()
    }

    /// Whether this node voted, for itself or another candidate, too
    /// recently to start another election.
    fn in_election_backoff(&self, inner: &Inner) -> bool {
        let backoff = self.settings.find_peers_interval() * 2;
        inner.last_election.is_some_and(|at| at.elapsed() < backoff)
    }

    fn start_election(&self, max_term_seen: u64) {
        let Some(this) = self.weak_self.upgrade() else {
            return;
        };
        {
            let mut inner = self.inner.lock();
            if inner.mode != Mode::Candidate || self.in_election_backoff(&inner) {
                return;
            }
            inner.last_election = Some(Instant::now());
        }
        let jitter_ms = rand::thread_rng().gen_range(0..=self.settings.find_peers_interval_ms / 2);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(jitter_ms)).await;
            if let Err(e) = this.run_election(max_term_seen).await {
                tracing::warn!("election failed: {}", e);
            }
        });
    }

    async fn run_election(&self, max_term_seen: u64) -> Result<()> {
        if self.mode() != Mode::Candidate {
            return Ok(());
        }
        let term = self.current_term().max(max_term_seen) + 1;
        let voters = self.voting_nodes();
        self.coordination_state
            .lock()
            .set_voting_config(voters.keys().cloned().collect());
        tracing::info!("starting election for term {} with {} voters", term, voters.len());

        let request = StartJoinRequest {
            source_node: self.local_node.clone(),
            term,
        };
        // vote for ourselves before anyone else can move us to this term
        let own_vote = self.join_leader_in_term(&request)?;

        let mut requests = JoinSet::new();
        for voter in voters.into_values().filter(|n| n.id != self.local_node.id) {
            let helper = self.join_helper.clone();
            let request = request.clone();
            requests.spawn(async move {
                if let Err(e) = helper.send_start_join_request(&request, &voter).await {
                    tracing::debug!("start-join to {} failed: {}", voter, e);
                }
            });
        }

        let own_join = JoinRequest {
            source_node: self.local_node.clone(),
            minimum_term: term,
            join: Some(own_vote),
        };
        self.handle_join_request(self.local_node.clone(), own_join).await?;
        while requests.join_next().await.is_some() {}
        Ok(())
    }

    async fn handle_join_request(&self, sender: Node, request: JoinRequest) -> Result<Empty> {
        self.ensure_term_at_least(&request.source_node, request.minimum_term)?;
        match request.join {
            Some(join) => {
                let won = self.coordination_state.lock().handle_join(&join)?;
                tracing::debug!("received vote from {} in term {}", join.voter, join.term);
                self.pending_joins
                    .lock()
                    .insert(join.voter.id.clone(), join.voter.clone());
                if won {
                    self.become_leader("won election");
                } else if self.mode() == Mode::Leader {
                    self.add_joined_node(join.voter).await?;
                }
            }
            None => {
                if self.mode() != Mode::Leader {
                    return Err(Error::NotLeader(self.describe_leader()));
                }
                tracing::debug!("{} asks to join (via {})", request.source_node, sender);
                self.add_joined_node(request.source_node).await?;
            }
        }
        Ok(Empty)
    }

    async fn add_joined_node(&self, node: Node) -> Result<()> {
        let allocation = self.allocation.clone();
        self.cluster_service
            .submit_state_update_task(format!("node-join [{}]", node), move |current: &ClusterState| {
                if current.nodes.get(&node.id) == Some(&node) {
                    return Ok(current.clone());
                }
                let nodes = with_node(&current.nodes, &node);
                let state = current.builder().nodes(nodes).build();
                Ok(allocation.reroute(&allocation.disassociate_dead_nodes(&state)))
            })
            .await?;
        Ok(())
    }

    /// First state of a new term: this node as master plus every voter.
    async fn publish_elected_state(&self, term: u64) {
        let joined: Vec<Node> = self.pending_joins.lock().values().cloned().collect();
        let last_accepted = self.last_accepted_state();
        let local = self.local_node.clone();
        let allocation = self.allocation.clone();

        let result = self
            .cluster_service
            .submit_state_update_task(
                format!("elected-as-master ([{}] nodes joined)", joined.len()),
                move |current: &ClusterState| {
                    let base = if last_accepted.version > current.version {
                        last_accepted.as_ref()
                    } else {
                        current
                    };
                    let mut nodes = (*base.nodes).clone();
                    for node in joined.iter().chain(std::iter::once(&local)) {
                        nodes = with_node(&nodes, node);
                    }
                    let nodes = nodes
                        .to_builder()
                        .local_node(local.clone())
                        .master_node_id(Some(local.id.clone()))
                        .build();

                    let mut state = base.builder().nodes(nodes);
                    if base.metadata.cluster_uuid.is_empty() {
                        state = state.metadata(base.metadata.to_builder().cluster_uuid(generate_uuid()).build());
                    }
                    let state = state.build();
                    Ok(allocation.reroute(&allocation.disassociate_dead_nodes(&state)))
                },
            )
            .await;

        match result {
            Ok(event) => tracing::info!(
                "elected as master in term {}, cluster state version {}",
                term,
                event.state.version
            ),
            Err(e) => tracing::warn!("failed to publish elected state in term {}: {}", term, e),
        }
    }

    fn handle_publish_request(&self, sender: Node, request: PublishRequest) -> Result<PublishResponse> {
        let state = Arc::new(request.state.with_local_node(&self.local_node));
        self.ensure_term_at_least(&sender, state.term)?;
        let response = self.coordination_state.lock().handle_publish(state.clone())?;

        let leader = state.nodes.master_node().cloned().unwrap_or(sender);
        if leader.id != self.local_node.id {
            self.become_follower("received published state", leader);
        }
        Ok(response)
    }

    fn handle_apply_commit(&self, sender: Node, request: ApplyCommitRequest) -> Result<Empty> {
        let accepted = self.last_accepted_state();
        if accepted.term != request.term || accepted.version != request.version {
            return Err(Error::StateConflict(format!(
                "commit of {}/{} from {} does not match accepted state {}/{}",
                request.term, request.version, sender, accepted.term, accepted.version
            )));
        }
        if self.applier.state().version >= accepted.version {
            return Ok(Empty);
        }
        self.applier
            .apply(&format!("committed by {}", sender), accepted)?;
        Ok(Empty)
    }

    fn handle_leader_check(&self, sender: Node, request: LeaderCheckRequest) -> Result<Empty> {
        if self.mode() != Mode::Leader {
            return Err(Error::NotLeader(self.describe_leader()));
        }
        let term = self.current_term();
        if request.term != term {
            return Err(Error::StaleTerm {
                incoming: request.term,
                current: term,
            });
        }
        if !self.applier.state().nodes.contains(&sender.id) {
            return Err(Error::JoinRejected(format!("{} is not part of the cluster", sender)));
        }
        Ok(Empty)
    }

    fn handle_follower_check(&self, sender: Node, request: FollowerCheckRequest) -> Result<Empty> {
        let term = self.current_term();
        if request.term < term {
            return Err(Error::StaleTerm {
                incoming: request.term,
                current: term,
            });
        }
        self.ensure_term_at_least(&sender, request.term)?;

        let (mode, leader) = {
            let inner = self.inner.lock();
            (inner.mode, inner.leader.clone())
        };
        match mode {
            Mode::Follower if leader.as_ref().map(|l| &l.id) == Some(&sender.id) => Ok(Empty),
            Mode::Leader => Err(Error::NotLeader(format!(
                "{} is itself leader in term {}",
                self.local_node, term
            ))),
            _ => {
                self.become_follower("follower check from leader", sender);
                Ok(Empty)
            }
        }
    }

    fn on_leader_failure(&self, leader: Node, reason: String) {
        let current = self.leader();
        if self.mode() != Mode::Follower || current.map(|l| l.id) != Some(leader.id.clone()) {
            return;
        }
        self.transport.disconnect(&leader.id);
        self.become_candidate(&format!("leader {} failed: {}", leader, reason));
    }

    fn on_follower_failure(&self, node: Node, reason: String) {
        if self.mode() != Mode::Leader {
            return;
        }
        let Some(this) = self.weak_self.upgrade() else {
            return;
        };
        tracing::info!("removing {} from the cluster: {}", node, reason);
        self.transport.disconnect(&node.id);
        tokio::spawn(async move {
            let allocation = this.allocation.clone();
            let node_id = node.id.clone();
            let result = this
                .cluster_service
                .submit_state_update_task(format!("node-left [{}]", node), move |current: &ClusterState| {
                    if !current.nodes.contains(&node_id) {
                        return Ok(current.clone());
                    }
                    let nodes = current.nodes.to_builder().remove(&node_id).build();
                    let state = current.builder().nodes(nodes).build();
                    Ok(allocation.reroute(&allocation.disassociate_dead_nodes(&state)))
                })
                .await;
            if let Err(e) = result {
                tracing::warn!("failed to remove {}: {}", node, e);
            }
        });
    }

    fn describe_leader(&self) -> String {
        match self.leader() {
            Some(leader) => leader.to_string(),
            None => "unknown".to_string(),
        }
    }

    /// Two-phase publication: every node accepts the state, and once a
    /// majority of master-eligible nodes has, the state is committed.
    async fn publish(&self, event: &ClusterChangedEvent) -> Result<()> {
        if self.mode() != Mode::Leader {
            return Err(Error::NotLeader(self.describe_leader()));
        }
        let state = event.state.clone();
        let term = self.current_term();
        if state.term != term {
            return Err(Error::PublicationFailed(format!(
                "state of term {} published in term {}",
                state.term, term
            )));
        }
        self.coordination_state.lock().handle_publish(state.clone())?;

        let payload = codec::encode(&PublishRequest {
            state: (*state).clone(),
        })?;
        let timeout = self.settings.publish_timeout();
        let mut requests = JoinSet::new();
        for node in state.nodes.iter().filter(|n| n.id != self.local_node.id).cloned() {
            let transport = self.transport.clone();
            let payload = payload.clone();
            requests.spawn(async move {
                let result = transport
                    .send_request(&node, Action::Publish, payload, timeout)
                    .await
                    .and_then(|bytes| codec::decode::<PublishResponse>(&bytes));
                (node, result)
            });
        }

        let master_eligible: BTreeSet<String> = state
            .nodes
            .master_eligible_nodes()
            .map(|n| n.id.clone())
            .collect();
        let mut acked = vec![self.local_node.clone()];
        let mut votes = usize::from(master_eligible.contains(&self.local_node.id));
        // commit as soon as a quorum has accepted; slower nodes are not waited on
        while !is_majority(votes, master_eligible.len()) {
            let Some(joined) = requests.join_next().await else {
                break;
            };
            if let Some(node) = accepted_by(joined, &state) {
                if master_eligible.contains(&node.id) {
                    votes += 1;
                }
                acked.push(node);
            }
        }
        if !is_majority(votes, master_eligible.len()) {
            self.become_candidate("publication failed to reach a quorum");
            return Err(Error::PublicationFailed(format!(
                "version {} accepted by {} of {} master-eligible nodes",
                state.version,
                votes,
                master_eligible.len()
            )));
        }

        self.applier.apply(&event.source, state.clone())?;

        let commit = ApplyCommitRequest {
            source_node: self.local_node.clone(),
            term: state.term,
            version: state.version,
        };
        let mut commits = JoinSet::new();
        for node in acked.into_iter().filter(|n| n.id != self.local_node.id) {
            commits.spawn(send_commit(self.transport.clone(), node, commit.clone(), timeout));
        }
        while commits.join_next().await.is_some() {}

        if !requests.is_empty() {
            let transport = self.transport.clone();
            tokio::spawn(async move {
                while let Some(joined) = requests.join_next().await {
                    if let Some(node) = accepted_by(joined, &state) {
                        send_commit(transport.clone(), node, commit.clone(), timeout).await;
                    }
                }
            });
        }
        Ok(())
    }
}

type PublishOutcome = std::result::Result<(Node, Result<PublishResponse>), tokio::task::JoinError>;

/// The node behind a publish reply, if it accepted exactly `state`.
fn accepted_by(joined: PublishOutcome, state: &ClusterState) -> Option<Node> {
    let (node, result) = joined.ok()?;
    match result {
        Ok(response) if response.term == state.term && response.version == state.version => Some(node),
        Ok(response) => {
            tracing::debug!(
                "{} acked {}/{} instead of {}/{}",
                node,
                response.term,
                response.version,
                state.term,
                state.version
            );
            None
        }
        Err(e) => {
            tracing::debug!("publication of version {} to {} failed: {}", state.version, node, e);
            None
        }
    }
}

async fn send_commit(transport: Arc<dyn Transport>, node: Node, commit: ApplyCommitRequest, timeout: Duration) {
    let result: Result<Empty> = send_typed(transport.as_ref(), &node, Action::Commit, &commit, timeout).await;
    if let Err(e) = result {
        tracing::debug!("commit of version {} on {} failed: {}", commit.version, node, e);
    }
}

impl PeerFinderListener for Coordinator {
    fn current_term(&self) -> u64 {
        Coordinator::current_term(self)
    }

    fn known_leader(&self) -> Option<Node> {
        self.leader()
    }

    fn on_active_master_found(&self, master: Node, term: u64) {
        if self.mode() != Mode::Candidate || master.id == self.local_node.id {
            return;
        }
        if let Err(e) = self.ensure_term_at_least(&master, term) {
            tracing::warn!("cannot adopt term {} of {}: {}", term, master, e);
            return;
        }
        let Some(this) = self.weak_self.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            match this.join_helper.send_join_request(&master, term, None).await {
                Ok(()) => this.become_follower("joined active master", master),
                Err(e) => tracing::debug!("join to {} failed: {}", master, e),
            }
        });
    }

    fn on_discovery_round_complete(&self, peers: Vec<Node>) {
        if self.mode() != Mode::Candidate || !self.local_node.is_master_eligible() {
            return;
        }
        if self.in_election_backoff(&self.inner.lock()) {
            return;
        }

        let voters = self.voting_nodes();
        let peers: Vec<Node> = peers.into_iter().filter(|n| n.is_master_eligible()).collect();
        if peers.is_empty() {
            let seeds = self.transport.seed_hosts();
            let alone = seeds.iter().all(|s| *s == self.local_node.address);
            if alone && voters.len() == 1 {
                tracing::info!("no peers configured, electing {} on its own", self.local_node);
                self.start_election(self.current_term());
            } else {
                tracing::debug!("no master-eligible peers reachable yet");
            }
            return;
        }

        let config: BTreeSet<String> = voters.into_keys().collect();
        let collector = self.pre_vote.clone();
        tokio::spawn(async move { collector.start(peers, config).await });
    }
}

/// Add `node`, dropping any other member registered at its address.
fn with_node(nodes: &Nodes, node: &Node) -> Nodes {
    let stale: Vec<String> = nodes
        .iter()
        .filter(|n| n.address == node.address && n.id != node.id)
        .map(|n| n.id.clone())
        .collect();
    let mut builder = nodes.to_builder();
    for id in &stale {
        builder = builder.remove(id);
    }
    builder.add(node.clone()).build()
}

/// Publishes states of the leader's term through the coordinator.
struct CoordinatorPublisher {
    coordinator: Weak<Coordinator>,
}

#[async_trait]
impl ClusterStatePublisher for CoordinatorPublisher {
    fn term(&self) -> u64 {
        self.coordinator.upgrade().map_or(0, |c| c.current_term())
    }

    fn next_version(&self, current: &ClusterState) -> u64 {
        let accepted = self
            .coordinator
            .upgrade()
            .map_or(0, |c| c.last_accepted_state().version);
        current.version.max(accepted) + 1
    }

    async fn publish(&self, event: &ClusterChangedEvent) -> Result<()> {
        let coordinator = self.coordinator.upgrade().ok_or(Error::MasterStopped)?;
        coordinator.publish(event).await
    }
}
