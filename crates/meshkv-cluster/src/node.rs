//! Wires the CRDT store, the reliable transport, and the peer manager into
//! a running replica, and drives the three periodic loops described in
//! §4.4: sync (anti-entropy), heartbeat, and discovery, plus a fourth,
//! internal health-check loop that turns missed heartbeats into peer
//! failures.

use crate::messages::{Discovery, Heartbeat, PeerAdvert, SyncRequest, SyncResponse};
use crate::peer::PeerManager;
use log::{debug, warn};
use meshkv_store::clock::now_secs;
use meshkv_store::CrdtStore;
use meshkv_transport::{PacketType, ReliableTransport, Result as TransportResult};
use rand::seq::IteratorRandom;
use serde_json::Value;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Duration;

pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_PEER_TIMEOUT: Duration = Duration::from_secs(15);
pub const DISCOVERY_INTERVAL: Duration = Duration::from_secs(30);
const DISCOVERY_INITIAL_DELAY: Duration = Duration::from_secs(1);
const STATE_CHANGE_CHANNEL_CAPACITY: usize = 256;

/// What a change subscriber learns about a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateChangeKind {
    Set,
    Delete,
    Sync,
}

#[derive(Debug, Clone)]
pub struct StateChange {
    pub key: Option<String>,
    pub value: Option<Value>,
    pub kind: StateChangeKind,
}

#[derive(Debug, Clone)]
pub struct PeerStats {
    pub total: usize,
    pub alive: usize,
    pub dead: usize,
    pub bootstrap: usize,
}

#[derive(Debug, Clone)]
pub struct NodeStatus {
    pub node_id: String,
    pub port: u16,
    pub state_version: u64,
    pub data_keys: usize,
    pub peers: PeerStats,
    pub pending_acks: usize,
}

/// A running (or not-yet-started) replica. Cheap to construct; binds no
/// socket and spawns no task until [`Node::start`] is called.
pub struct Node {
    node_id: String,
    port: u16,
    actual_port: AtomicU16,
    store: Arc<CrdtStore>,
    peers: Arc<PeerManager>,
    transport: std::sync::Mutex<Option<Arc<ReliableTransport>>>,
    running: Arc<AtomicBool>,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
    sync_interval: Duration,
    heartbeat_interval: Duration,
    peer_timeout: Duration,
    state_tx: broadcast::Sender<StateChange>,
}

impl Node {
    pub fn new(node_id: impl Into<String>, port: u16) -> Self {
        Self::with_intervals(
            node_id,
            port,
            DEFAULT_SYNC_INTERVAL,
            DEFAULT_HEARTBEAT_INTERVAL,
            DEFAULT_PEER_TIMEOUT,
        )
    }

    /// Like [`Node::new`] but with explicit loop intervals, for tests that
    /// need convergence to happen on a shorter clock than the production
    /// defaults.
    pub fn with_intervals(
        node_id: impl Into<String>,
        port: u16,
        sync_interval: Duration,
        heartbeat_interval: Duration,
        peer_timeout: Duration,
    ) -> Self {
        let node_id = node_id.into();
        let (state_tx, _) = broadcast::channel(STATE_CHANGE_CHANNEL_CAPACITY);
        Node {
            peers: Arc::new(PeerManager::new(node_id.clone())),
            store: Arc::new(CrdtStore::new(node_id.clone())),
            node_id,
            port,
            actual_port: AtomicU16::new(port),
            transport: std::sync::Mutex::new(None),
            running: Arc::new(AtomicBool::new(false)),
            tasks: std::sync::Mutex::new(Vec::new()),
            sync_interval,
            heartbeat_interval,
            peer_timeout,
            state_tx,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Registers `addr` as a seed peer to contact once the discovery loop
    /// starts. Silently ignored if it names this node's own bound port on a
    /// local address, per §7.
    pub fn add_bootstrap_peer(&self, addr: SocketAddr) {
        if addr.port() == self.actual_port.load(Ordering::SeqCst) && addr.ip().is_loopback() {
            return;
        }
        self.peers.add_bootstrap(addr);
    }

    pub fn set(&self, key: &str, value: Value) {
        self.store.set(key, value.clone());
        let _ = self.state_tx.send(StateChange {
            key: Some(key.to_string()),
            value: Some(value),
            kind: StateChangeKind::Set,
        });
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.store.get(key)
    }

    pub fn delete(&self, key: &str) {
        self.store.delete(key);
        let _ = self.state_tx.send(StateChange {
            key: Some(key.to_string()),
            value: None,
            kind: StateChangeKind::Delete,
        });
    }

    pub fn all_data(&self) -> HashMap<String, Value> {
        self.store.all_data()
    }

    pub fn on_state_change(&self) -> broadcast::Receiver<StateChange> {
        self.state_tx.subscribe()
    }

    pub fn status(&self) -> NodeStatus {
        let pending_acks = self
            .transport
            .lock()
            .unwrap()
            .as_ref()
            .map(|t| t.pending_count())
            .unwrap_or(0);
        NodeStatus {
            node_id: self.node_id.clone(),
            port: self.actual_port.load(Ordering::SeqCst),
            state_version: self.store.version(),
            data_keys: self.store.keys().len(),
            peers: PeerStats {
                total: self.peers.peer_count(),
                alive: self.peers.alive_count(),
                dead: self.peers.peer_count() - self.peers.alive_count(),
                bootstrap: self.peers.bootstrap_peers().len(),
            },
            pending_acks,
        }
    }

    /// Binds the transport, installs the four application handlers, and
    /// spawns the sync, heartbeat, discovery, and health-check loops.
    pub async fn start(&self) -> TransportResult<()> {
        let transport = ReliableTransport::bind(self.port)?;
        register_handlers(&transport, &self.store, &self.peers, &self.node_id, &self.state_tx);
        transport.start();

        if let Ok(bound) = transport.local_addr() {
            self.actual_port.store(bound.port(), Ordering::SeqCst);
        }
        *self.transport.lock().unwrap() = Some(Arc::clone(&transport));
        self.running.store(true, Ordering::SeqCst);

        let mut handles = Vec::new();
        handles.push(tokio::spawn(sync_loop(
            Arc::clone(&transport),
            Arc::clone(&self.store),
            Arc::clone(&self.peers),
            Arc::clone(&self.running),
            self.node_id.clone(),
            self.sync_interval,
        )));
        handles.push(tokio::spawn(heartbeat_loop(
            Arc::clone(&transport),
            Arc::clone(&self.store),
            Arc::clone(&self.peers),
            Arc::clone(&self.running),
            self.node_id.clone(),
            self.heartbeat_interval,
        )));
        handles.push(tokio::spawn(discovery_loop(
            Arc::clone(&transport),
            Arc::clone(&self.peers),
            Arc::clone(&self.running),
            self.node_id.clone(),
            self.actual_port.load(Ordering::SeqCst),
        )));
        handles.push(tokio::spawn(health_check_loop(
            Arc::clone(&self.peers),
            Arc::clone(&self.running),
            self.heartbeat_interval,
            self.peer_timeout,
        )));

        self.tasks.lock().unwrap().extend(handles);
        Ok(())
    }

    /// Stops the orchestrator loops, then the transport itself.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let tasks: Vec<_> = self.tasks.lock().unwrap().drain(..).collect();
        for task in tasks {
            let abort_handle = task.abort_handle();
            if tokio::time::timeout(Duration::from_secs(1), task).await.is_err() {
                warn!("orchestrator loop did not stop within 1s, aborting");
                abort_handle.abort();
            }
        }

        let transport = self.transport.lock().unwrap().take();
        if let Some(transport) = transport {
            transport.stop().await;
        }
    }
}

fn register_handlers(
    transport: &Arc<ReliableTransport>,
    store: &Arc<CrdtStore>,
    peers: &Arc<PeerManager>,
    node_id: &str,
    state_tx: &broadcast::Sender<StateChange>,
) {
    {
        let transport = Arc::clone(transport);
        let store = Arc::clone(store);
        let peers = Arc::clone(peers);
        let node_id = node_id.to_string();
        let handler_transport = Arc::clone(&transport);
        handler_transport.register_handler(
            PacketType::SyncRequest,
            Arc::new(move |addr, payload| {
                let Ok(request) = serde_json::from_value::<SyncRequest>(payload) else {
                    warn!("dropping malformed SYNC_REQUEST from {addr}");
                    return;
                };
                peers.add_or_update(request.node_id, addr, Some(request.version));

                let transport = Arc::clone(&transport);
                let store = Arc::clone(&store);
                let node_id = node_id.clone();
                tokio::spawn(async move {
                    let response = SyncResponse {
                        node_id,
                        state: store.snapshot(),
                    };
                    if let Err(err) = transport
                        .send_reliable(addr, PacketType::SyncResponse, &response)
                        .await
                    {
                        warn!("failed to send SYNC_RESPONSE to {addr}: {err}");
                    }
                });
            }),
        );
    }

    {
        let store = Arc::clone(store);
        let peers = Arc::clone(peers);
        let state_tx = state_tx.clone();
        transport.register_handler(
            PacketType::SyncResponse,
            Arc::new(move |addr, payload| {
                let Ok(response) = serde_json::from_value::<SyncResponse>(payload) else {
                    warn!("dropping malformed SYNC_RESPONSE from {addr}");
                    return;
                };
                peers.add_or_update(response.node_id.clone(), addr, Some(response.state.version));
                let modified = store.merge(
                    &response.state.data,
                    &response.state.tombstones,
                    &response.state.vector_clock,
                );
                peers.mark_synced(&response.node_id);
                if modified {
                    let _ = state_tx.send(StateChange {
                        key: None,
                        value: None,
                        kind: StateChangeKind::Sync,
                    });
                }
            }),
        );
    }

    {
        let peers = Arc::clone(peers);
        transport.register_handler(
            PacketType::Heartbeat,
            Arc::new(move |addr, payload| {
                let Ok(beat) = serde_json::from_value::<Heartbeat>(payload) else {
                    warn!("dropping malformed HEARTBEAT from {addr}");
                    return;
                };
                peers.add_or_update(beat.node_id, addr, Some(beat.version));
            }),
        );
    }

    {
        let transport = Arc::clone(transport);
        let peers = Arc::clone(peers);
        let node_id = node_id.to_string();
        let handler_transport = Arc::clone(&transport);
        handler_transport.register_handler(
            PacketType::Discovery,
            Arc::new(move |addr, payload| {
                let Ok(advert) = serde_json::from_value::<Discovery>(payload) else {
                    warn!("dropping malformed DISCOVERY from {addr}");
                    return;
                };
                let sender_addr = SocketAddr::new(addr.ip(), advert.port);
                peers.add_or_update(advert.node_id, sender_addr, None);
                for peer in &advert.peers {
                    if let Ok(peer_ip) = peer.host.parse() {
                        let peer_addr = SocketAddr::new(peer_ip, peer.port);
                        peers.add_or_update(peer.node_id.clone(), peer_addr, None);
                    }
                }

                let transport = Arc::clone(&transport);
                let peers = Arc::clone(&peers);
                let node_id = node_id.clone();
                tokio::spawn(async move {
                    let own_port = transport.local_addr().map(|a| a.port()).unwrap_or(0);
                    let reply = Discovery {
                        node_id,
                        port: own_port,
                        peers: alive_adverts(&peers),
                    };
                    if let Err(err) = transport
                        .send_unreliable(addr, PacketType::Discovery, &reply)
                        .await
                    {
                        warn!("failed to reply to DISCOVERY from {addr}: {err}");
                    }
                });
            }),
        );
    }
}

fn alive_adverts(peers: &PeerManager) -> Vec<PeerAdvert> {
    peers
        .alive_peers()
        .into_iter()
        .map(|p| PeerAdvert {
            node_id: p.node_id,
            host: p.address.ip().to_string(),
            port: p.address.port(),
        })
        .collect()
}

async fn sync_loop(
    transport: Arc<ReliableTransport>,
    store: Arc<CrdtStore>,
    peers: Arc<PeerManager>,
    running: Arc<AtomicBool>,
    node_id: String,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await; // first tick fires immediately; skip it
    while running.load(Ordering::SeqCst) {
        ticker.tick().await;
        if !running.load(Ordering::SeqCst) {
            break;
        }

        let mut targets = peers.peers_needing_sync(interval);
        if targets.is_empty() {
            let alive = peers.alive_peers();
            if let Some(peer) = alive.into_iter().choose(&mut rand::rng()) {
                targets.push(peer);
            }
        }

        let request = SyncRequest {
            node_id: node_id.clone(),
            version: store.version(),
        };
        for peer in targets {
            if let Err(err) = transport
                .send_reliable(peer.address, PacketType::SyncRequest, &request)
                .await
            {
                warn!("sync request to {} failed: {err}", peer.address);
            }
        }
    }
}

async fn heartbeat_loop(
    transport: Arc<ReliableTransport>,
    store: Arc<CrdtStore>,
    peers: Arc<PeerManager>,
    running: Arc<AtomicBool>,
    node_id: String,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    while running.load(Ordering::SeqCst) {
        ticker.tick().await;
        if !running.load(Ordering::SeqCst) {
            break;
        }

        let beat = Heartbeat {
            node_id: node_id.clone(),
            version: store.version(),
            timestamp: now_secs(),
        };
        for peer in peers.alive_peers() {
            if let Err(err) = transport
                .send_unreliable(peer.address, PacketType::Heartbeat, &beat)
                .await
            {
                debug!("heartbeat to {} failed: {err}", peer.address);
            }
        }
    }
}

async fn discovery_loop(
    transport: Arc<ReliableTransport>,
    peers: Arc<PeerManager>,
    running: Arc<AtomicBool>,
    node_id: String,
    port: u16,
) {
    tokio::time::sleep(DISCOVERY_INITIAL_DELAY).await;
    let mut ticker = tokio::time::interval(DISCOVERY_INTERVAL);
    while running.load(Ordering::SeqCst) {
        let advert = Discovery {
            node_id: node_id.clone(),
            port,
            peers: alive_adverts(&peers),
        };
        for addr in peers.bootstrap_peers() {
            if let Err(err) = transport.send_unreliable(addr, PacketType::Discovery, &advert).await {
                warn!("discovery send to {addr} failed: {err}");
            }
        }

        ticker.tick().await;
        if !running.load(Ordering::SeqCst) {
            break;
        }
    }
}

async fn health_check_loop(
    peers: Arc<PeerManager>,
    running: Arc<AtomicBool>,
    interval: Duration,
    peer_timeout: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    while running.load(Ordering::SeqCst) {
        ticker.tick().await;
        if !running.load(Ordering::SeqCst) {
            break;
        }
        for node_id in peers.stale_peers(peer_timeout) {
            peers.mark_failed(&node_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fast_node(node_id: &str, port: u16) -> Node {
        Node::with_intervals(
            node_id,
            port,
            Duration::from_millis(150),
            Duration::from_millis(100),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn two_nodes_converge_after_bootstrap() {
        let a = fast_node("a", 0);
        a.start().await.unwrap();
        let a_addr = loopback(a.status().port);

        let b = fast_node("b", 0);
        b.start().await.unwrap();
        let b_addr = loopback(b.status().port);

        a.add_bootstrap_peer(b_addr);
        b.add_bootstrap_peer(a_addr);

        a.set("x", json!("from-a"));
        b.set("y", json!("from-b"));

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if a.get("y") == Some(json!("from-b")) && b.get("x") == Some(json!("from-a")) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await
        .expect("nodes did not converge in time");

        a.stop().await;
        b.stop().await;
    }

    fn loopback(port: u16) -> SocketAddr {
        SocketAddr::new(std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST), port)
    }
}
