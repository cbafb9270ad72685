//! Node-to-node request/reply messaging keyed by action name
//!
//! The coordination layer only talks to the [`Transport`] trait. Two
//! implementations ship with the crate: [`tcp::TcpTransport`] for real
//! deployments and [`memory::MemoryTransport`] for in-process clusters.

pub mod codec;
pub mod memory;
pub mod tcp;

use crate::cluster::node::Node;
use crate::common::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub use memory::{MemoryNetwork, MemoryTransport};
pub use tcp::TcpTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Action {
    Handshake,
    PeerFind,
    PreVote,
    StartJoin,
    Join,
    Publish,
    Commit,
    LeaderCheck,
    FollowerCheck,
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::Handshake => "HANDSHAKE",
            Action::PeerFind => "PEERFIND_REQ",
            Action::PreVote => "PREVOTE_REQ",
            Action::StartJoin => "START_JOIN",
            Action::Join => "JOIN_REQ",
            Action::Publish => "PUBLISH_REQ",
            Action::Commit => "COMMIT_REQ",
            Action::LeaderCheck => "LEADER_CHECK",
            Action::FollowerCheck => "FOLLOWER_CHECK",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, sender: Node, payload: Bytes) -> Result<Bytes>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> RequestHandler for FnHandler<F>
where
    F: Fn(Node, Bytes) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Bytes>> + Send,
{
    async fn handle(&self, sender: Node, payload: Bytes) -> Result<Bytes> {
        (self.0)(sender, payload).await
    }
}

/// Handler from a closure over raw payloads
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn RequestHandler>
where
    F: Fn(Node, Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Bytes>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// Handler that decodes `Req` and encodes the `Resp` it produces.
/// Undecodable payloads are answered with a codec error.
pub fn typed_handler<Req, Resp, F, Fut>(f: F) -> Arc<dyn RequestHandler>
where
    Req: DeserializeOwned + Send + 'static,
    Resp: Serialize + Send + 'static,
    F: Fn(Node, Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Resp>> + Send + 'static,
{
    handler_fn(move |sender: Node, payload: Bytes| {
        let pending = codec::decode::<Req>(&payload).map(|request| f(sender, request));
        async move {
            let response = pending?.await?;
            codec::encode(&response)
        }
    })
}

/// Action to handler table, filled at startup and read on every request.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<Action, Arc<dyn RequestHandler>>>,
}

impl HandlerRegistry {
    pub fn register(&self, action: Action, handler: Arc<dyn RequestHandler>) -> Result<()> {
        let mut handlers = self.handlers.write();
        if handlers.contains_key(&action) {
            return Err(Error::DuplicateHandler(action.to_string()));
        }
        handlers.insert(action, handler);
        Ok(())
    }

    pub fn get(&self, action: Action) -> Option<Arc<dyn RequestHandler>> {
        self.handlers.read().get(&action).cloned()
    }

    pub async fn dispatch(&self, action: Action, sender: Node, payload: Bytes) -> Result<Bytes> {
        let handler = self
            .get(action)
            .ok_or_else(|| Error::UnknownAction(action.to_string()))?;
        handler.handle(sender, payload).await
    }

    pub fn clear(&self) {
        self.handlers.write().clear();
    }
}

/// Peers with an established identity, keyed by node id
#[derive(Default)]
pub struct ConnectedNodes {
    nodes: RwLock<BTreeMap<String, Node>>,
}

impl ConnectedNodes {
    pub fn insert(&self, node: Node) {
        self.nodes.write().insert(node.id.clone(), node);
    }

    pub fn remove(&self, node_id: &str) -> bool {
        self.nodes.write().remove(node_id).is_some()
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.nodes.read().contains_key(node_id)
    }

    pub fn list(&self) -> Vec<Node> {
        self.nodes.read().values().cloned().collect()
    }

    pub fn clear(&self) {
        self.nodes.write().clear();
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    fn local_node(&self) -> Node;

    fn seed_hosts(&self) -> Vec<String>;

    /// Register the handler for an action; each action at most once.
    fn register_handler(&self, action: Action, handler: Arc<dyn RequestHandler>) -> Result<()>;

    /// Open a connection to `address` and learn the remote identity.
    async fn connect(&self, address: &str, timeout: Duration) -> Result<Node>;

    /// Remote nodes with an open connection (never the local node)
    fn connected_nodes(&self) -> Vec<Node>;

    fn is_connected(&self, node: &Node) -> bool;

    fn disconnect(&self, node_id: &str);

    /// Send one request and wait at most `timeout` for the reply.
    async fn send_request(
        &self,
        node: &Node,
        action: Action,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<Bytes>;
}

/// Encode `request`, send it, decode the reply.
pub async fn send_typed<Req, Resp>(
    transport: &dyn Transport,
    node: &Node,
    action: Action,
    request: &Req,
    timeout: Duration,
) -> Result<Resp>
where
    Req: Serialize + Sync,
    Resp: DeserializeOwned,
{
    let payload = codec::encode(request)?;
    let reply = transport.send_request(node, action, payload, timeout).await?;
    codec::decode(&reply)
}

/// Failures that mean the peer is gone rather than that it said no
pub(crate) fn is_connection_loss(err: &Error) -> bool {
    matches!(
        err,
        Error::ConnectionFailed(_) | Error::Timeout(_) | Error::Io(_)
    )
}
