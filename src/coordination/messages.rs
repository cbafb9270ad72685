//! Request and response records exchanged by the coordination layer
//!
//! Every record is bincode-encoded inside a transport envelope. "No node"
//! is represented as `Option<Node>` or as the empty [`Node`] sentinel and
//! survives encoding either way.

use crate::cluster::node::Node;
use crate::cluster::state::ClusterState;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeersRequest {
    pub source_node: Node,
    pub known_peers: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeersResponse {
    /// Leader known to the responder, if any
    pub master_node: Option<Node>,
    pub known_peers: Vec<Node>,
    pub term: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreVoteRequest {
    pub source_node: Node,
    pub current_term: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreVoteResponse {
    pub current_term: u64,
    /// Set when the responder refuses, e.g. because it already has a leader
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartJoinRequest {
    pub source_node: Node,
    pub term: u64,
}

/// A vote by `voter` for `target` to lead in `term`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Join {
    pub voter: Node,
    pub target: Node,
    pub term: u64,
    pub last_accepted_term: u64,
    pub last_accepted_version: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRequest {
    pub source_node: Node,
    pub minimum_term: u64,
    /// Absent when a node joins an already elected leader without voting
    pub join: Option<Join>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Empty;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishRequest {
    pub state: ClusterState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishResponse {
    pub term: u64,
    pub version: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyCommitRequest {
    pub source_node: Node,
    pub term: u64,
    pub version: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderCheckRequest {
    pub source_node: Node,
    pub term: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowerCheckRequest {
    pub source_node: Node,
    pub term: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::node::NodeRole;
    use crate::transport::codec::{decode, encode};
    use serde::de::DeserializeOwned;
    use std::fmt::Debug;

    fn round_trip<T: Serialize + DeserializeOwned + PartialEq + Debug>(value: T) {
        let bytes = encode(&value).unwrap();
        assert_eq!(decode::<T>(&bytes).unwrap(), value);
    }

    fn node(id: &str) -> Node {
        Node::new(id, format!("node-{}", id), format!("10.0.0.{}:9300", id.len()), [NodeRole::Master])
            .with_attribute("zone", "a")
    }

    #[test]
    fn test_peer_exchange_round_trips() {
        round_trip(PeersRequest {
            source_node: node("a"),
            known_peers: vec![node("b"), Node::default()],
        });
        round_trip(PeersResponse {
            master_node: None,
            known_peers: vec![],
            term: 0,
        });
        round_trip(PeersResponse {
            master_node: Some(Node::default()),
            known_peers: vec![node("c")],
            term: 12,
        });
    }

    #[test]
    fn test_election_messages_round_trip() {
        round_trip(PreVoteRequest {
            source_node: node("a"),
            current_term: 3,
        });
        round_trip(PreVoteResponse {
            current_term: 4,
            error: Some("election already finished".into()),
        });
        round_trip(StartJoinRequest {
            source_node: Node::default(),
            term: 0,
        });
        round_trip(JoinRequest {
            source_node: node("b"),
            minimum_term: 5,
            join: Some(Join {
                voter: node("b"),
                target: node("a"),
                term: 5,
                last_accepted_term: 4,
                last_accepted_version: 17,
            }),
        });
        round_trip(JoinRequest {
            source_node: node("b"),
            minimum_term: 0,
            join: None,
        });
    }

    #[test]
    fn test_empty_node_sentinel_survives() {
        let bytes = encode(&Node::default()).unwrap();
        let decoded: Node = decode(&bytes).unwrap();
        assert!(decoded.is_empty());
    }
}
