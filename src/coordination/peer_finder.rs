//! Peer discovery
//!
//! While active, the finder runs a discovery round every
//! `find_peers_interval`: it contacts the seed addresses, the nodes of the
//! last accepted state and every peer learned so far. A lookup connects,
//! exchanges known-peer lists and reports any leader the remote knows;
//! newly learned peers are contacted in the same round. The round ends once
//! every lookup has finished.

use crate::cluster::node::Node;
use crate::common::{DiscoveryConfig, Result};
use crate::coordination::messages::{PeersRequest, PeersResponse};
use crate::transport::{send_typed, Action, Transport};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};

/// Callbacks into the owner of the finder
pub trait PeerFinderListener: Send + Sync {
    fn current_term(&self) -> u64;

    /// Leader this node currently knows, reported to peers
    fn known_leader(&self) -> Option<Node>;

    /// A peer reported itself as the active leader.
    fn on_active_master_found(&self, master: Node, term: u64);

    /// A discovery round finished with `peers` reachable.
    fn on_discovery_round_complete(&self, peers: Vec<Node>);
}

struct FinderState {
    active: bool,
    generation: u64,
    last_accepted_nodes: Vec<Node>,
    /// Reachable peers by address
    known_peers: BTreeMap<String, Node>,
    rounds: Option<JoinHandle<()>>,
}

pub struct PeerFinder {
    transport: Arc<dyn Transport>,
    listener: Weak<dyn PeerFinderListener>,
    find_peers_interval: Duration,
    request_timeout: Duration,
    state: Mutex<FinderState>,
}

struct Lookup {
    peer: Node,
    response: PeersResponse,
}

impl PeerFinder {
    pub fn new(
        transport: Arc<dyn Transport>,
        listener: Weak<dyn PeerFinderListener>,
        settings: &DiscoveryConfig,
    ) -> Self {
        Self {
            transport,
            listener,
            find_peers_interval: settings.find_peers_interval(),
            request_timeout: settings.request_peers_timeout(),
            state: Mutex::new(FinderState {
                active: false,
                generation: 0,
                last_accepted_nodes: Vec::new(),
                known_peers: BTreeMap::new(),
                rounds: None,
            }),
        }
    }

    pub fn is_active(&self) -> bool {
        self.state.lock().active
    }

    /// Peers reached so far in this activation
    pub fn found_peers(&self) -> Vec<Node> {
        self.state.lock().known_peers.values().cloned().collect()
    }

    /// Start discovery rounds, seeded with the last accepted nodes.
    pub fn activate(self: &Arc<Self>, last_accepted_nodes: Vec<Node>) {
        let mut state = self.state.lock();
        if let Some(rounds) = state.rounds.take() {
            rounds.abort();
        }
        state.active = true;
        state.generation += 1;
        state.last_accepted_nodes = last_accepted_nodes;
        state.known_peers.clear();

        let generation = state.generation;
        let finder = self.clone();
        state.rounds = Some(tokio::spawn(async move {
            while finder.is_current(generation) {
                finder.handle_wake_up(generation).await;
                tokio::time::sleep(finder.find_peers_interval).await;
            }
        }));
        tracing::debug!("peer finder activated (generation {})", generation);
    }

    /// Stop discovery and cancel the lookups of the running round.
    pub fn deactivate(&self) {
        let mut state = self.state.lock();
        if !state.active {
            return;
        }
        state.active = false;
        state.generation += 1;
        if let Some(rounds) = state.rounds.take() {
            rounds.abort();
        }
        tracing::debug!("peer finder deactivated");
    }

    fn is_current(&self, generation: u64) -> bool {
        let state = self.state.lock();
        state.active && state.generation == generation
    }

    /// One discovery round: contact everything known, then everything learned.
    pub async fn handle_wake_up(self: &Arc<Self>, generation: u64) {
        let local = self.transport.local_node();
        let mut addresses: BTreeSet<String> = self.transport.seed_hosts().into_iter().collect();
        {
            let state = self.state.lock();
            addresses.extend(state.last_accepted_nodes.iter().map(|n| n.address.clone()));
            addresses.extend(state.known_peers.keys().cloned());
        }
        addresses.remove(&local.address);
        addresses.retain(|a| !a.is_empty());

        let mut contacted = addresses.clone();
        let mut lookups = JoinSet::new();
        for address in addresses {
            lookups.spawn(self.clone().lookup(address));
        }

        while let Some(joined) = lookups.join_next().await {
            let lookup = match joined {
                Ok((_, Ok(Some(lookup)))) => lookup,
                Ok((_, Ok(None))) => continue,
                Ok((address, Err(e))) => {
                    tracing::debug!("peer lookup of {} failed: {}", address, e);
                    self.state.lock().known_peers.remove(&address);
                    continue;
                }
                Err(e) => {
                    tracing::debug!("peer lookup cancelled: {}", e);
                    continue;
                }
            };
            if !self.is_current(generation) {
                return;
            }

            let Lookup { peer, response } = lookup;
            self.state
                .lock()
                .known_peers
                .insert(peer.address.clone(), peer.clone());

            match response.master_node.filter(|m| !m.is_empty()) {
                Some(master) if master.id == peer.id => {
                    if let Some(listener) = self.listener.upgrade() {
                        tracing::info!("found active master {} in term {}", master, response.term);
                        listener.on_active_master_found(master, response.term);
                    }
                }
                Some(master) if master.id != local.id && contacted.insert(master.address.clone()) => {
                    tracing::debug!("{} reports leader {}, probing it", peer, master);
                    lookups.spawn(self.clone().lookup(master.address));
                }
                _ => {}
            }

            for learned in response.known_peers {
                if learned.is_empty() || learned.id == local.id {
                    continue;
                }
                if contacted.insert(learned.address.clone()) {
                    lookups.spawn(self.clone().lookup(learned.address));
                }
            }
        }

        if !self.is_current(generation) {
            return;
        }
        let peers = self.found_peers();
        tracing::debug!("discovery round complete with {} peers", peers.len());
        if let Some(listener) = self.listener.upgrade() {
            listener.on_discovery_round_complete(peers);
        }
    }

    async fn lookup(self: Arc<Self>, address: String) -> (String, Result<Option<Lookup>>) {
        let result = self.exchange_peers(&address).await;
        (address, result)
    }

    async fn exchange_peers(&self, address: &str) -> Result<Option<Lookup>> {
        let peer = self.transport.connect(address, self.request_timeout).await?;
        let local = self.transport.local_node();
        if peer.id == local.id {
            return Ok(None);
        }

        let request = PeersRequest {
            source_node: local,
            known_peers: self.found_peers(),
        };
        let response: PeersResponse = send_typed(
            self.transport.as_ref(),
            &peer,
            Action::PeerFind,
            &request,
            self.request_timeout,
        )
        .await?;
        Ok(Some(Lookup { peer, response }))
    }

    /// Answer a peer exchange, first connecting to any address it taught us.
    pub async fn handle_peers_request(&self, request: PeersRequest) -> Result<PeersResponse> {
        let local = self.transport.local_node();
        let unknown: BTreeSet<String> = {
            let state = self.state.lock();
            std::iter::once(&request.source_node)
                .chain(request.known_peers.iter())
                .filter(|n| !n.is_empty() && n.id != local.id)
                .filter(|n| !state.known_peers.contains_key(&n.address))
                .map(|n| n.address.clone())
                .collect()
        };

        let mut connects = JoinSet::new();
        for address in unknown {
            let transport = self.transport.clone();
            let timeout = self.request_timeout;
            connects.spawn(async move { transport.connect(&address, timeout).await });
        }
        while let Some(joined) = connects.join_next().await {
            match joined {
                Ok(Ok(peer)) if peer.id != local.id => {
                    self.state.lock().known_peers.insert(peer.address.clone(), peer);
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => tracing::debug!("could not reach advertised peer: {}", e),
                Err(e) => tracing::debug!("peer connect cancelled: {}", e),
            }
        }

        let listener = self.listener.upgrade();
        Ok(PeersResponse {
            master_node: listener.as_ref().and_then(|l| l.known_leader()),
            known_peers: self.found_peers(),
            term: listener.as_ref().map_or(0, |l| l.current_term()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::node::NodeRole;
    use crate::transport::{typed_handler, MemoryNetwork};
    use parking_lot::RwLock;
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct Recorder {
        leader: RwLock<Option<Node>>,
        masters: Mutex<Vec<Node>>,
        rounds: Mutex<Option<mpsc::UnboundedSender<Vec<Node>>>>,
    }

    impl PeerFinderListener for Recorder {
        fn current_term(&self) -> u64 {
            4
        }

        fn known_leader(&self) -> Option<Node> {
            self.leader.read().clone()
        }

        fn on_active_master_found(&self, master: Node, _term: u64) {
            self.masters.lock().push(master);
        }

        fn on_discovery_round_complete(&self, peers: Vec<Node>) {
            if let Some(tx) = self.rounds.lock().as_ref() {
                let _ = tx.send(peers);
            }
        }
    }

    fn node(id: &str) -> Node {
        Node::new(id, id, format!("mem://{}", id), [NodeRole::Master, NodeRole::Data])
    }

    fn settings() -> DiscoveryConfig {
        DiscoveryConfig {
            find_peers_interval_ms: 50,
            request_peers_timeout_ms: 200,
            ..Default::default()
        }
    }

    /// A finder on `id` whose PEERFIND handler answers through it
    fn finder(
        network: &Arc<MemoryNetwork>,
        id: &str,
        seeds: &[&str],
    ) -> (Arc<PeerFinder>, Arc<Recorder>) {
        let transport = network.transport(node(id), seeds.iter().map(|s| s.to_string()).collect());
        let recorder = Arc::new(Recorder::default());
        let listener: Arc<dyn PeerFinderListener> = recorder.clone();
        let finder = Arc::new(PeerFinder::new(transport.clone(), Arc::downgrade(&listener), &settings()));
        let handler_finder = finder.clone();
        transport
            .register_handler(
                Action::PeerFind,
                typed_handler(move |_sender: Node, request: PeersRequest| {
                    let finder = handler_finder.clone();
                    async move { finder.handle_peers_request(request).await }
                }),
            )
            .unwrap();
        (finder, recorder)
    }

    #[tokio::test]
    async fn test_transitive_discovery() {
        let network = MemoryNetwork::new();
        // a only knows b, b only knows c
        let (a, recorder) = finder(&network, "a", &["mem://b"]);
        let (_b, _) = finder(&network, "b", &["mem://c"]);
        let (c, _) = finder(&network, "c", &[]);

        // b learns about c when c asks b, so seed that first
        c.activate(vec![node("b")]);
        tokio::time::sleep(Duration::from_millis(100)).await;
        c.deactivate();

        let (tx, mut rx) = mpsc::unbounded_channel();
        *recorder.rounds.lock() = Some(tx);
        a.activate(vec![]);
        let peers = rx.recv().await.unwrap();
        a.deactivate();

        let ids: BTreeSet<String> = peers.into_iter().map(|n| n.id).collect();
        assert!(ids.contains("b"));
        assert!(ids.contains("c"));
        assert!(recorder.masters.lock().is_empty());
    }

    #[tokio::test]
    async fn test_leader_is_reported() {
        let network = MemoryNetwork::new();
        let (a, recorder) = finder(&network, "a", &["mem://b"]);
        let (_b, b_recorder) = finder(&network, "b", &[]);
        *b_recorder.leader.write() = Some(node("b"));

        let (tx, mut rx) = mpsc::unbounded_channel();
        *recorder.rounds.lock() = Some(tx);
        a.activate(vec![]);
        rx.recv().await.unwrap();
        a.deactivate();

        let masters = recorder.masters.lock().clone();
        assert!(!masters.is_empty());
        assert_eq!(masters[0].id, "b");
    }

    #[tokio::test]
    async fn test_unreachable_seeds_complete_with_no_peers() {
        let network = MemoryNetwork::new();
        let (a, recorder) = finder(&network, "a", &["mem://nowhere", "mem://a"]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        *recorder.rounds.lock() = Some(tx);
        a.activate(vec![]);
        let peers = rx.recv().await.unwrap();
        a.deactivate();
        assert!(peers.is_empty());
        assert!(!a.is_active());
    }
}
