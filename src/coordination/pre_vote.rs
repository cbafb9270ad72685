//! Pre-voting: a non-binding poll run before a real election
//!
//! A round broadcasts a [`PreVoteRequest`] to the given peers and to the
//! local node. Each positive response is recorded as a vote for the local
//! node; once the votes cover a strict majority of the round's quorum set
//! the election callback fires, at most once per round. Responses that
//! arrive afterwards are recorded but change nothing.

use crate::cluster::node::Node;
use crate::common::Result;
use crate::coordination::coordination_state::VoteCollection;
use crate::coordination::messages::{Join, PreVoteRequest, PreVoteResponse};
use crate::transport::{send_typed, Action, Transport};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

pub const ELECTION_FINISHED: &str = "election already finished";

pub type ElectionStarter = Arc<dyn Fn(u64) + Send + Sync>;

struct Round {
    generation: u64,
    responses: BTreeMap<String, (Node, PreVoteResponse)>,
    quorum_config: BTreeSet<String>,
    election_started: bool,
    max_term_seen: u64,
}

/// Local view answered to pre-vote requests
struct LocalView {
    current_term: u64,
    leader: Option<Node>,
}

pub struct PreVoteCollector {
    transport: Arc<dyn Transport>,
    timeout: Duration,
    start_election: ElectionStarter,
    round: RwLock<Round>,
    view: RwLock<LocalView>,
}

impl PreVoteCollector {
    pub fn new(transport: Arc<dyn Transport>, timeout: Duration, start_election: ElectionStarter) -> Self {
        Self {
            transport,
            timeout,
            start_election,
            round: RwLock::new(Round {
                generation: 0,
                responses: BTreeMap::new(),
                quorum_config: BTreeSet::new(),
                election_started: false,
                max_term_seen: 0,
            }),
            view: RwLock::new(LocalView {
                current_term: 0,
                leader: None,
            }),
        }
    }

    /// Refresh the term and leader this node reports.
    pub fn update(&self, current_term: u64, leader: Option<Node>) {
        let mut view = self.view.write();
        view.current_term = current_term;
        view.leader = leader;
    }

    pub fn handle_pre_vote_request(&self, request: &PreVoteRequest) -> PreVoteResponse {
        let view = self.view.read();
        let error = match &view.leader {
            Some(leader) => {
                tracing::debug!(
                    "rejecting pre-vote from {}: leader {} is known",
                    request.source_node,
                    leader
                );
                Some(ELECTION_FINISHED.to_string())
            }
            None => None,
        };
        PreVoteResponse {
            current_term: view.current_term,
            error,
        }
    }

    /// Reset the collector for a new round counted against `quorum_config`.
    pub fn start_round(&self, quorum_config: BTreeSet<String>) -> u64 {
        let current_term = self.view.read().current_term;
        let mut round = self.round.write();
        round.generation += 1;
        round.responses.clear();
        round.quorum_config = quorum_config;
        round.election_started = false;
        round.max_term_seen = current_term;
        round.generation
    }

    /// Run a round against `peers` and the local node; returns once every
    /// request has been answered or has failed.
    pub async fn start(self: &Arc<Self>, peers: Vec<Node>, quorum_config: BTreeSet<String>) {
        let generation = self.start_round(quorum_config);
        let local = self.transport.local_node();
        let request = PreVoteRequest {
            source_node: local.clone(),
            current_term: self.view.read().current_term,
        };
        tracing::debug!("starting pre-vote round {} with {} peers", generation, peers.len());

        let mut targets: BTreeMap<String, Node> =
            peers.into_iter().map(|n| (n.id.clone(), n)).collect();
        targets.insert(local.id.clone(), local);

        let mut requests = JoinSet::new();
        for (_, target) in targets {
            let collector = self.clone();
            let request = request.clone();
            requests.spawn(async move {
                let result: Result<PreVoteResponse> = send_typed(
                    collector.transport.as_ref(),
                    &target,
                    Action::PreVote,
                    &request,
                    collector.timeout,
                )
                .await;
                match result {
                    Ok(response) => {
                        collector.handle_pre_vote_response(response, target, generation);
                    }
                    Err(e) => tracing::debug!("pre-vote request to {} failed: {}", target, e),
                }
            });
        }
        while requests.join_next().await.is_some() {}
    }

    /// Record a response; fires the election callback when this response
    /// completes a quorum. Returns whether it did.
    pub fn handle_pre_vote_response(&self, response: PreVoteResponse, sender: Node, generation: u64) -> bool {
        let local = self.transport.local_node();
        let max_term = {
            let mut round = self.round.write();
            if round.generation != generation {
                return false;
            }
            round.max_term_seen = round.max_term_seen.max(response.current_term);
            if let Some(error) = &response.error {
                tracing::debug!("pre-vote from {} refused: {}", sender, error);
                return false;
            }
            round.responses.insert(sender.id.clone(), (sender, response));

            let mut votes = VoteCollection::new();
            for (voter, response) in round.responses.values() {
                votes.add_vote(Join {
                    voter: voter.clone(),
                    target: local.clone(),
                    term: response.current_term,
                    last_accepted_term: 0,
                    last_accepted_version: 0,
                });
            }
            if !votes.is_quorum(&round.quorum_config) {
                return false;
            }
            if round.election_started || self.view.read().leader.is_some() {
                return false;
            }
            round.election_started = true;
            round.max_term_seen
        };

        tracing::info!("pre-vote quorum reached, starting election above term {}", max_term);
        (self.start_election)(max_term);
        true
    }
}
