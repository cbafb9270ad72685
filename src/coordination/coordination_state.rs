//! Term and vote bookkeeping of a single node
//!
//! Wraps the [`PersistedState`]: every accepted term and every accepted
//! cluster state is written through before it takes effect.

use crate::cluster::node::Node;
use crate::cluster::state::ClusterState;
use crate::common::{is_majority, Error, Result};
use crate::coordination::messages::{Join, PublishResponse, StartJoinRequest};
use crate::coordination::persisted::PersistedState;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Joins gathered for one candidate, at most one per voter
#[derive(Debug, Clone, Default)]
pub struct VoteCollection {
    joins: BTreeMap<String, Join>,
}

impl VoteCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a vote; returns false if the voter had already voted.
    pub fn add_vote(&mut self, join: Join) -> bool {
        if self.joins.contains_key(&join.voter.id) {
            return false;
        }
        self.joins.insert(join.voter.id.clone(), join);
        true
    }

    pub fn contains(&self, voter_id: &str) -> bool {
        self.joins.contains_key(voter_id)
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    pub fn voters(&self) -> impl Iterator<Item = &Node> {
        self.joins.values().map(|j| &j.voter)
    }

    /// Whether the voters cover a strict majority of `config`
    pub fn is_quorum(&self, config: &BTreeSet<String>) -> bool {
        let votes = config.iter().filter(|id| self.joins.contains_key(*id)).count();
        is_majority(votes, config.len())
    }
}

pub struct CoordinationState {
    local_node: Node,
    persisted: Arc<dyn PersistedState>,
    join_votes: VoteCollection,
    election_won: bool,
    voting_config: BTreeSet<String>,
}

impl CoordinationState {
    pub fn new(local_node: Node, persisted: Arc<dyn PersistedState>) -> Self {
        Self {
            local_node,
            persisted,
            join_votes: VoteCollection::new(),
            election_won: false,
            voting_config: BTreeSet::new(),
        }
    }

    pub fn current_term(&self) -> u64 {
        self.persisted.current_term()
    }

    pub fn last_accepted_state(&self) -> Arc<ClusterState> {
        self.persisted.last_accepted_state()
    }

    pub fn last_accepted_term(&self) -> u64 {
        self.persisted.last_accepted_state().term
    }

    pub fn last_accepted_version(&self) -> u64 {
        self.persisted.last_accepted_state().version
    }

    pub fn election_won(&self) -> bool {
        self.election_won
    }

    pub fn join_votes(&self) -> &VoteCollection {
        &self.join_votes
    }

    /// Node ids whose majority decides the next election of this node
    pub fn set_voting_config(&mut self, config: BTreeSet<String>) {
        self.voting_config = config;
    }

    /// Adopt `term` if it is newer, dropping votes gathered for older terms.
    pub fn ensure_term_at_least(&mut self, term: u64) -> Result<bool> {
        if term <= self.current_term() {
            return Ok(false);
        }
        self.persisted.set_current_term(term)?;
        self.join_votes = VoteCollection::new();
        self.election_won = false;
        Ok(true)
    }

    /// Vote for the sender of `request`, moving to its term.
    pub fn handle_start_join(&mut self, request: &StartJoinRequest) -> Result<Join> {
        let current = self.current_term();
        if request.term <= current {
            return Err(Error::StaleTerm {
                incoming: request.term,
                current,
            });
        }
        self.ensure_term_at_least(request.term)?;

        let last_accepted = self.last_accepted_state();
        Ok(Join {
            voter: self.local_node.clone(),
            target: request.source_node.clone(),
            term: request.term,
            last_accepted_term: last_accepted.term,
            last_accepted_version: last_accepted.version,
        })
    }

    /// Count a vote for this node. Returns true exactly when this vote wins
    /// the election.
    pub fn handle_join(&mut self, join: &Join) -> Result<bool> {
        if join.target.id != self.local_node.id {
            return Err(Error::JoinRejected(format!(
                "vote from {} is for {}, not {}",
                join.voter, join.target, self.local_node
            )));
        }
        let current = self.current_term();
        if join.term != current {
            return Err(Error::JoinRejected(format!(
                "vote from {} is for term {}, current term is {}",
                join.voter, join.term, current
            )));
        }
        let last_accepted = self.last_accepted_state();
        if (join.last_accepted_term, join.last_accepted_version)
            > (last_accepted.term, last_accepted.version)
        {
            return Err(Error::JoinRejected(format!(
                "{} has accepted a newer state ({}/{}) than this node ({}/{})",
                join.voter,
                join.last_accepted_term,
                join.last_accepted_version,
                last_accepted.term,
                last_accepted.version
            )));
        }

        self.join_votes.add_vote(join.clone());
        let was_won = self.election_won;
        self.election_won = self.join_votes.is_quorum(&self.voting_config);
        Ok(self.election_won && !was_won)
    }

    /// Accept a published state; it becomes durable before it is acked.
    pub fn handle_publish(&mut self, state: Arc<ClusterState>) -> Result<PublishResponse> {
        let current = self.current_term();
        if state.term < current {
            return Err(Error::StaleTerm {
                incoming: state.term,
                current,
            });
        }
        self.ensure_term_at_least(state.term)?;

        let last_accepted = self.last_accepted_state();
        if state.term == last_accepted.term && state.version <= last_accepted.version {
            return Err(Error::StaleState {
                incoming: state.version,
                current: last_accepted.version,
            });
        }
        let response = PublishResponse {
            term: state.term,
            version: state.version,
        };
        self.persisted.set_last_accepted_state(state)?;
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::node::NodeRole;
    use crate::coordination::persisted::InMemoryPersistedState;

    fn node(id: &str) -> Node {
        Node::new(id, id, format!("mem://{}", id), [NodeRole::Master])
    }

    fn state(local: &str) -> CoordinationState {
        let persisted = Arc::new(InMemoryPersistedState::new(0, ClusterState::empty("test")));
        CoordinationState::new(node(local), persisted)
    }

    fn vote(voter: &str, target: &str, term: u64) -> Join {
        Join {
            voter: node(voter),
            target: node(target),
            term,
            last_accepted_term: 0,
            last_accepted_version: 0,
        }
    }

    fn config(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_start_join_requires_newer_term() {
        let mut cs = state("a");
        let join = cs
            .handle_start_join(&StartJoinRequest {
                source_node: node("b"),
                term: 2,
            })
            .unwrap();
        assert_eq!(join.target.id, "b");
        assert_eq!(cs.current_term(), 2);

        let err = cs
            .handle_start_join(&StartJoinRequest {
                source_node: node("c"),
                term: 2,
            })
            .unwrap_err();
        assert!(matches!(err, Error::StaleTerm { incoming: 2, current: 2 }));
    }

    #[test]
    fn test_election_won_exactly_once() {
        let mut cs = state("a");
        cs.set_voting_config(config(&["a", "b", "c"]));
        cs.ensure_term_at_least(1).unwrap();

        assert!(!cs.handle_join(&vote("a", "a", 1)).unwrap());
        assert!(cs.handle_join(&vote("b", "a", 1)).unwrap());
        assert!(!cs.handle_join(&vote("c", "a", 1)).unwrap());
        assert!(cs.election_won());
        assert_eq!(cs.join_votes().len(), 3);
    }

    #[test]
    fn test_join_for_other_term_or_target_rejected() {
        let mut cs = state("a");
        cs.set_voting_config(config(&["a", "b", "c"]));
        cs.ensure_term_at_least(3).unwrap();
        assert!(cs.handle_join(&vote("b", "a", 2)).is_err());
        assert!(cs.handle_join(&vote("b", "c", 3)).is_err());
        assert!(cs.join_votes().is_empty());
    }

    #[test]
    fn test_newer_term_discards_votes() {
        let mut cs = state("a");
        cs.set_voting_config(config(&["a", "b", "c"]));
        cs.ensure_term_at_least(1).unwrap();
        cs.handle_join(&vote("a", "a", 1)).unwrap();
        assert!(cs.ensure_term_at_least(2).unwrap());
        assert!(cs.join_votes().is_empty());
        assert!(!cs.ensure_term_at_least(2).unwrap());
    }

    #[test]
    fn test_publish_checks_term_and_version() {
        let mut cs = state("a");
        let base = ClusterState::empty("test");
        let v1 = Arc::new(base.clone().into_published(1, 1));
        cs.handle_publish(v1.clone()).unwrap();
        assert_eq!(cs.current_term(), 1);
        assert_eq!(cs.last_accepted_version(), 1);

        assert!(matches!(
            cs.handle_publish(v1).unwrap_err(),
            Error::StaleState { .. }
        ));
        cs.ensure_term_at_least(3).unwrap();
        let old_term = Arc::new(base.into_published(2, 2));
        assert!(matches!(
            cs.handle_publish(old_term).unwrap_err(),
            Error::StaleTerm { .. }
        ));
    }

    #[test]
    fn test_vote_collection_quorum() {
        let mut votes = VoteCollection::new();
        let cfg = config(&["a", "b", "c"]);
        assert!(votes.add_vote(vote("a", "a", 1)));
        assert!(!votes.add_vote(vote("a", "a", 1)));
        assert!(!votes.is_quorum(&cfg));
        votes.add_vote(vote("x", "a", 1));
        assert!(!votes.is_quorum(&cfg));
        votes.add_vote(vote("c", "a", 1));
        assert!(votes.is_quorum(&cfg));
        assert!(!votes.is_quorum(&BTreeSet::new()));
    }
}
