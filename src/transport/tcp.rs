//! TCP transport
//!
//! One accept loop per node and one task per inbound connection. Outbound
//! requests open a fresh connection, write a single frame and wait for the
//! reply frame. Connecting to an address performs a `HANDSHAKE` exchange
//! that returns the remote node identity.

use crate::cluster::node::Node;
use crate::common::{Error, Result};
use crate::transport::codec::{self, RequestEnvelope, ResponseEnvelope};
use crate::transport::{
    is_connection_loss, Action, ConnectedNodes, HandlerRegistry, RequestHandler, Transport,
};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

pub struct TcpTransport {
    local: Node,
    seed_hosts: Vec<String>,
    handlers: HandlerRegistry,
    connected: ConnectedNodes,
    max_frame_bytes: usize,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl TcpTransport {
    /// Bind the listener and start accepting connections.
    ///
    /// The local node's address is replaced by the bound address, so binding
    /// port 0 yields a reachable identity.
    pub async fn bind(
        mut local: Node,
        bind_addr: SocketAddr,
        seed_hosts: Vec<String>,
        max_frame_bytes: usize,
    ) -> Result<Arc<Self>> {
        let listener = TcpListener::bind(bind_addr).await.map_err(|e| {
            Error::ConnectionFailed(format!("failed to bind {}: {}", bind_addr, e))
        })?;
        local.address = listener.local_addr()?.to_string();
        tracing::info!("transport listening on {} as {}", local.address, local);

        let transport = Arc::new(Self {
            local,
            seed_hosts,
            handlers: HandlerRegistry::default(),
            connected: ConnectedNodes::default(),
            max_frame_bytes,
            accept_task: Mutex::new(None),
        });
        let task = tokio::spawn(accept_loop(listener, Arc::downgrade(&transport)));
        *transport.accept_task.lock() = Some(task);
        Ok(transport)
    }

    /// Stop accepting connections and forget every peer.
    pub fn close(&self) {
        if let Some(task) = self.accept_task.lock().take() {
            task.abort();
        }
        self.connected.clear();
        self.handlers.clear();
    }

    async fn handle_connection(&self, stream: TcpStream, peer: SocketAddr) -> Result<()> {
        let (mut reader, mut writer) = stream.into_split();
        while let Some(frame) = codec::read_frame(&mut reader, self.max_frame_bytes).await? {
            let response = match codec::decode::<RequestEnvelope>(&frame) {
                Ok(request) => self.respond(request).await,
                Err(e) => {
                    tracing::warn!("rejecting malformed request from {}: {}", peer, e);
                    ResponseEnvelope::Err(e.to_remote_message())
                }
            };
            let body = codec::encode(&response)?;
            codec::write_frame(&mut writer, &body, self.max_frame_bytes).await?;
        }
        Ok(())
    }

    async fn respond(&self, request: RequestEnvelope) -> ResponseEnvelope {
        tracing::debug!("received [{}] from {}", request.action, request.sender);
        let result = if request.action == Action::Handshake {
            codec::encode(&self.local)
        } else {
            self.handlers
                .dispatch(request.action, request.sender, Bytes::from(request.payload))
                .await
        };
        match result {
            Ok(payload) => ResponseEnvelope::Ok(payload.to_vec()),
            Err(e) => {
                tracing::debug!("handler for [{}] failed: {}", request.action, e);
                ResponseEnvelope::Err(e.to_remote_message())
            }
        }
    }

    async fn round_trip(&self, address: &str, request: &RequestEnvelope) -> Result<ResponseEnvelope> {
        let stream = TcpStream::connect(address)
            .await
            .map_err(|e| Error::ConnectionFailed(format!("{}: {}", address, e)))?;
        stream.set_nodelay(true)?;
        let (mut reader, mut writer) = stream.into_split();

        let body = codec::encode(request)?;
        codec::write_frame(&mut writer, &body, self.max_frame_bytes).await?;
        let frame = codec::read_frame(&mut reader, self.max_frame_bytes)
            .await?
            .ok_or_else(|| Error::ConnectionFailed(format!("{} closed the connection", address)))?;
        codec::decode(&frame)
    }

    async fn call(
        &self,
        address: &str,
        action: Action,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<Bytes> {
        let request = RequestEnvelope {
            action,
            sender: self.local.clone(),
            payload: payload.to_vec(),
        };
        let response = tokio::time::timeout(timeout, self.round_trip(address, &request))
            .await
            .map_err(|_| Error::Timeout(format!("[{}] to {} after {:?}", action, address, timeout)))??;
        match response {
            ResponseEnvelope::Ok(payload) => Ok(Bytes::from(payload)),
            ResponseEnvelope::Err(message) => Err(Error::Remote {
                node: address.to_string(),
                message,
            }),
        }
    }
}

async fn accept_loop(listener: TcpListener, transport: Weak<TcpTransport>) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::error!("failed to accept connection: {}", e);
                continue;
            }
        };
        let Some(transport) = transport.upgrade() else {
            break;
        };
        tokio::spawn(async move {
            if let Err(e) = transport.handle_connection(stream, peer).await {
                tracing::warn!("connection from {} closed: {}", peer, e);
            }
        });
    }
    tracing::debug!("accept loop stopped");
}

#[async_trait]
impl Transport for TcpTransport {
    fn local_node(&self) -> Node {
        self.local.clone()
    }

    fn seed_hosts(&self) -> Vec<String> {
        self.seed_hosts.clone()
    }

    fn register_handler(&self, action: Action, handler: Arc<dyn RequestHandler>) -> Result<()> {
        if action == Action::Handshake {
            return Err(Error::DuplicateHandler(action.to_string()));
        }
        self.handlers.register(action, handler)
    }

    async fn connect(&self, address: &str, timeout: Duration) -> Result<Node> {
        let reply = self.call(address, Action::Handshake, Bytes::new(), timeout).await?;
        let node: Node = codec::decode(&reply)?;
        if node.is_empty() {
            return Err(Error::ConnectionFailed(format!("{} sent no identity", address)));
        }
        if node.id != self.local.id {
            tracing::debug!("connected to {}", node);
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
        if self.connected.remove(node_id) {
            tracing::debug!("disconnected from {}", node_id);
        }
    }

    async fn send_request(
        &self,
        node: &Node,
        action: Action,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<Bytes> {
        if node.id == self.local.id {
            let dispatch = self.handlers.dispatch(action, self.local.clone(), payload);
            return tokio::time::timeout(timeout, dispatch)
                .await
                .map_err(|_| Error::Timeout(format!("local [{}]", action)))?;
        }
        let result = self.call(&node.address, action, payload, timeout).await;
        if let Err(e) = &result {
            if is_connection_loss(e) {
                self.disconnect(&node.id);
            }
        }
        result
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        if let Some(task) = self.accept_task.lock().take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::node::NodeRole;
    use crate::transport::{handler_fn, send_typed, typed_handler};
    use tokio::io::AsyncWriteExt;

    const MAX_FRAME: usize = 1024 * 1024;

    async fn bind(name: &str) -> Arc<TcpTransport> {
        let local = Node::new(name, name, "", [NodeRole::Master, NodeRole::Data]);
        TcpTransport::bind(local, SocketAddr::from(([127, 0, 0, 1], 0)), vec![], MAX_FRAME)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_handshake_and_request() {
        let a = bind("a").await;
        let b = bind("b").await;
        b.register_handler(
            Action::PeerFind,
            typed_handler(|sender: Node, n: u32| async move { Ok(format!("{}:{}", sender.id, n)) }),
        )
        .unwrap();

        let remote = a
            .connect(&b.local_node().address, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(remote.id, "b");
        assert!(a.is_connected(&remote));

        let reply: String = send_typed(a.as_ref(), &remote, Action::PeerFind, &7u32, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(reply, "a:7");
    }

    #[tokio::test]
    async fn test_handler_error_becomes_remote_error() {
        let a = bind("a").await;
        let b = bind("b").await;
        b.register_handler(
            Action::Join,
            handler_fn(|_, _| async move { Err(Error::JoinRejected("wrong term".into())) }),
        )
        .unwrap();
        let remote = a
            .connect(&b.local_node().address, Duration::from_secs(1))
            .await
            .unwrap();
        let err = a
            .send_request(&remote, Action::Join, Bytes::new(), Duration::from_secs(1))
            .await
            .unwrap_err();
        match err {
            Error::Remote { message, .. } => assert!(message.contains("wrong term")),
            other => panic!("unexpected error {:?}", other),
        }
        // the connection survives a handler error
        assert!(a.is_connected(&remote));
    }

    #[tokio::test]
    async fn test_malformed_frame_is_answered_not_fatal() {
        let b = bind("b").await;
        let mut stream = TcpStream::connect(&b.local_node().address).await.unwrap();
        stream.write_all(&3u32.to_be_bytes()).await.unwrap();
        stream.write_all(&[0xff, 0xff, 0xff]).await.unwrap();
        let (mut reader, _writer) = stream.into_split();
        let frame = codec::read_frame(&mut reader, MAX_FRAME).await.unwrap().unwrap();
        let response: ResponseEnvelope = codec::decode(&frame).unwrap();
        assert!(matches!(response, ResponseEnvelope::Err(_)));

        // the node keeps serving
        let a = bind("a").await;
        assert!(a
            .connect(&b.local_node().address, Duration::from_secs(1))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_address() {
        let a = bind("a").await;
        let closed = bind("closed").await;
        let address = closed.local_node().address;
        closed.close();
        drop(closed);
        tokio::time::sleep(Duration::from_millis(20)).await;

        let err = a.connect(&address, Duration::from_millis(500)).await.unwrap_err();
        assert!(is_connection_loss(&err));
        assert!(a.connected_nodes().is_empty());
    }
}
