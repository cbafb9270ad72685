//! In-process transport for multi-node tests
//!
//! A [`MemoryNetwork`] routes requests between [`MemoryTransport`]s by
//! address. Handlers run on their own task, as they would on a remote
//! node, and every request is bounded by its timeout. Addresses can be
//! isolated to simulate a partition and healed again.

use crate::cluster::node::Node;
use crate::common::{Error, Result};
use crate::transport::{
    is_connection_loss, Action, ConnectedNodes, HandlerRegistry, RequestHandler, Transport,
};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;

#[derive(Default)]
pub struct MemoryNetwork {
    transports: RwLock<HashMap<String, Weak<MemoryTransport>>>,
    isolated: RwLock<HashSet<String>>,
}

impl MemoryNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Attach a node to the network under its address.
    pub fn transport(self: &Arc<Self>, local: Node, seed_hosts: Vec<String>) -> Arc<MemoryTransport> {
        let transport = Arc::new(MemoryTransport {
            local: local.clone(),
            seed_hosts,
            network: self.clone(),
            handlers: HandlerRegistry::default(),
            connected: ConnectedNodes::default(),
        });
        self.transports
            .write()
            .insert(local.address.clone(), Arc::downgrade(&transport));
        transport
    }

    /// Cut `address` off from every other node.
    pub fn isolate(&self, address: &str) {
        tracing::info!("isolating {}", address);
        self.isolated.write().insert(address.to_string());
    }

    pub fn heal(&self, address: &str) {
        tracing::info!("healing {}", address);
        self.isolated.write().remove(address);
    }

    /// Detach `address`; later requests to it fail to connect.
    pub fn remove(&self, address: &str) {
        self.transports.write().remove(address);
    }

    fn route(&self, from: &str, to: &str) -> Result<Arc<MemoryTransport>> {
        {
            let isolated = self.isolated.read();
            if isolated.contains(from) || isolated.contains(to) {
                return Err(Error::ConnectionFailed(format!("{} is unreachable from {}", to, from)));
            }
        }
        self.transports
            .read()
            .get(to)
            .and_then(Weak::upgrade)
            .ok_or_else(|| Error::ConnectionFailed(format!("no node listening on {}", to)))
    }
}

pub struct MemoryTransport {
    local: Node,
    seed_hosts: Vec<String>,
    network: Arc<MemoryNetwork>,
    handlers: HandlerRegistry,
    connected: ConnectedNodes,
}

impl MemoryTransport {
    pub fn network(&self) -> &Arc<MemoryNetwork> {
        &self.network
    }

    /// Detach from the network and drop every handler.
    pub fn close(&self) {
        self.network.remove(&self.local.address);
        self.connected.clear();
        self.handlers.clear();
    }

    async fn deliver(
        target: Arc<MemoryTransport>,
        sender: Node,
        action: Action,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<Bytes> {
        let target_id = target.local.id.clone();
        let mut task = tokio::spawn(async move { target.handlers.dispatch(action, sender, payload).await });
        let joined = match tokio::time::timeout(timeout, &mut task).await {
            Ok(joined) => joined,
            Err(_) => {
                task.abort();
                return Err(Error::Timeout(format!("[{}] to {} after {:?}", action, target_id, timeout)));
            }
        };
        match joined {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(e)) => Err(Error::Remote {
                node: target_id,
                message: e.to_remote_message(),
            }),
            Err(e) => Err(Error::Internal(format!("handler task for [{}] failed: {}", action, e))),
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn local_node(&self) -> Node {
        self.local.clone()
    }

    fn seed_hosts(&self) -> Vec<String> {
        self.seed_hosts.clone()
    }

    fn register_handler(&self, action: Action, handler: Arc<dyn RequestHandler>) -> Result<()> {
        self.handlers.register(action, handler)
    }

    async fn connect(&self, address: &str, _timeout: Duration) -> Result<Node> {
        let target = self.network.route(&self.local.address, address)?;
        let node = target.local.clone();
        if node.id != self.local.id {
            self.connected.insert(node.clone());
        }
        Ok(node)
    }

    fn connected_nodes(&self) -> Vec<Node> {
        self.connected.list()
    }

    fn is_connected(&self, node: &Node) -> bool {
        node.id == self.local.id || self.connected.contains(&node.id)
    }

    fn disconnect(&self, node_id: &str) {
        self.connected.remove(node_id);
    }

    async fn send_request(
        &self,
        node: &Node,
        action: Action,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<Bytes> {
        let result = match self.network.route(&self.local.address, &node.address) {
            Ok(target) if target.local.id == node.id => {
                Self::deliver(target, self.local.clone(), action, payload, timeout).await
            }
            Ok(target) => Err(Error::ConnectionFailed(format!(
                "{} is now {}, not {}",
                node.address, target.local.id, node.id
            ))),
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            if is_connection_loss(e) {
                self.disconnect(&node.id);
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::node::NodeRole;
    use crate::transport::handler_fn;

    fn node(id: &str) -> Node {
        Node::new(id, id, format!("mem://{}", id), [NodeRole::Master, NodeRole::Data])
    }

    const TIMEOUT: Duration = Duration::from_millis(200);

    #[tokio::test]
    async fn test_isolate_and_heal() {
        let network = MemoryNetwork::new();
        let a = network.transport(node("a"), vec![]);
        let b = network.transport(node("b"), vec![]);
        b.register_handler(Action::PeerFind, handler_fn(|_, p| async move { Ok(p) }))
            .unwrap();

        let remote = a.connect("mem://b", TIMEOUT).await.unwrap();
        assert_eq!(remote.id, "b");

        network.isolate("mem://b");
        let err = a
            .send_request(&remote, Action::PeerFind, Bytes::from_static(b"x"), TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConnectionFailed(_)));
        assert!(!a.is_connected(&remote));

        network.heal("mem://b");
        a.connect("mem://b", TIMEOUT).await.unwrap();
        let reply = a
            .send_request(&remote, Action::PeerFind, Bytes::from_static(b"x"), TIMEOUT)
            .await
            .unwrap();
        assert_eq!(&reply[..], b"x");
    }

    #[tokio::test]
    async fn test_slow_handler_times_out() {
        let network = MemoryNetwork::new();
        let a = network.transport(node("a"), vec![]);
        let b = network.transport(node("b"), vec![]);
        b.register_handler(
            Action::PreVote,
            handler_fn(|_, p| async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(p)
            }),
        )
        .unwrap();
        let remote = a.connect("mem://b", TIMEOUT).await.unwrap();
        let err = a
            .send_request(&remote, Action::PreVote, Bytes::new(), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }

    #[tokio::test]
    async fn test_timed_out_handler_is_aborted() {
        let network = MemoryNetwork::new();
        let a = network.transport(node("a"), vec![]);
        let b = network.transport(node("b"), vec![]);
        let in_flight = Arc::new(());
        let held = in_flight.clone();
        b.register_handler(
            Action::Publish,
            handler_fn(move |_, p| {
                let guard = held.clone();
                async move {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    drop(guard);
                    Ok(p)
                }
            }),
        )
        .unwrap();
        let remote = a.connect("mem://b", TIMEOUT).await.unwrap();
        let err = a
            .send_request(&remote, Action::Publish, Bytes::new(), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));

        tokio::time::sleep(Duration::from_millis(50)).await;
        // only the test and the registered handler still hold a reference
        assert_eq!(Arc::strong_count(&in_flight), 2);
    }

    #[tokio::test]
    async fn test_connecting_to_self_is_not_a_peer() {
        let network = MemoryNetwork::new();
        let a = network.transport(node("a"), vec!["mem://a".into()]);
        let me = a.connect("mem://a", TIMEOUT).await.unwrap();
        assert_eq!(me.id, "a");
        assert!(a.connected_nodes().is_empty());
        assert!(a.is_connected(&me));
    }
}
