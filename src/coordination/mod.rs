//! Cluster coordination: discovery, elections, publication and fault detection
//!
//! - `peer_finder`: repeated discovery rounds while a node has no leader
//! - `pre_vote`: non-binding poll run before a real election
//! - `join_helper`: start-join / join handshake
//! - `coordination_state`: term, votes and last accepted state
//! - `persisted`: durable storage of the term and last accepted state
//! - `fault_detection`: leader and follower checks
//! - `coordinator`: the mode machine tying it all together

pub mod coordination_state;
pub mod coordinator;
pub mod fault_detection;
pub mod join_helper;
pub mod messages;
pub mod peer_finder;
pub mod persisted;
pub mod pre_vote;

pub use coordination_state::{CoordinationState, VoteCollection};
pub use coordinator::{Coordinator, Mode};
pub use fault_detection::{FollowersChecker, LeaderChecker};
pub use join_helper::JoinHelper;
pub use peer_finder::{PeerFinder, PeerFinderListener};
pub use persisted::{FilePersistedState, InMemoryPersistedState, PersistedState};
pub use pre_vote::PreVoteCollector;
