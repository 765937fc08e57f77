//! Peer discovery and liveness tracking. Mirrors the transport's choice of
//! [`DashMap`] for the peer table (§4.3): each peer is updated independently
//! and the health-check loop iterates a snapshot, so no crate-wide lock is
//! needed here the way the store needs one for merge.

use dashmap::{DashMap, DashSet};
use log::{info, warn};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

const FAILURE_THRESHOLD: u32 = 3;

/// What the manager knows about one remote node.
#[derive(Debug, Clone)]
pub struct PeerInfo {
    pub node_id: String,
    pub address: SocketAddr,
    pub last_seen: Instant,
    pub last_sync: Option<Instant>,
    pub version: u64,
    pub is_alive: bool,
    pub failed_pings: u32,
}

impl PeerInfo {
    fn new(node_id: String, address: SocketAddr) -> Self {
        PeerInfo {
            node_id,
            address,
            last_seen: Instant::now(),
            last_sync: None,
            version: 0,
            is_alive: true,
            failed_pings: 0,
        }
    }
}

pub struct PeerManager {
    self_node_id: String,
    peers: DashMap<String, PeerInfo>,
    bootstrap: DashSet<SocketAddr>,
}

impl PeerManager {
    pub fn new(self_node_id: impl Into<String>) -> Self {
        PeerManager {
            self_node_id: self_node_id.into(),
            peers: DashMap::new(),
            bootstrap: DashSet::new(),
        }
    }

    /// Records `addr` as a seed peer to contact from the discovery loop.
    /// The caller (the node orchestrator, which knows its own bound
    /// address) is responsible for filtering out its own address first.
    pub fn add_bootstrap(&self, addr: SocketAddr) {
        self.bootstrap.insert(addr);
    }

    pub fn bootstrap_peers(&self) -> Vec<SocketAddr> {
        self.bootstrap.iter().map(|a| *a).collect()
    }

    /// Admits or refreshes a peer. Returns `true` if this is a newly-seen
    /// `node_id`. A peer's address is overwritten on every update (it may
    /// have rebound); its `version`, if given, only ever rises.
    pub fn add_or_update(&self, node_id: impl Into<String>, addr: SocketAddr, version: Option<u64>) -> bool {
        let node_id = node_id.into();
        if node_id == self.self_node_id {
            return false;
        }

        let mut is_new = false;
        self.peers
            .entry(node_id.clone())
            .and_modify(|peer| {
                peer.last_seen = Instant::now();
                peer.failed_pings = 0;
                peer.is_alive = true;
                peer.address = addr;
                if let Some(v) = version {
                    peer.version = peer.version.max(v);
                }
            })
            .or_insert_with(|| {
                is_new = true;
                let mut peer = PeerInfo::new(node_id.clone(), addr);
                if let Some(v) = version {
                    peer.version = v;
                }
                peer
            });

        if is_new {
            info!("discovered peer {node_id} at {addr}");
        }
        is_new
    }

    pub fn mark_synced(&self, node_id: &str) {
        if let Some(mut peer) = self.peers.get_mut(node_id) {
            peer.last_sync = Some(Instant::now());
        }
    }

    /// Increments the peer's failure count; marks it dead once it reaches
    /// [`FAILURE_THRESHOLD`] consecutive misses.
    pub fn mark_failed(&self, node_id: &str) {
        if let Some(mut peer) = self.peers.get_mut(node_id) {
            peer.failed_pings += 1;
            if peer.failed_pings >= FAILURE_THRESHOLD && peer.is_alive {
                peer.is_alive = false;
                warn!("peer {node_id} marked dead after {FAILURE_THRESHOLD} missed heartbeats");
            }
        }
    }

    pub fn alive_peers(&self) -> Vec<PeerInfo> {
        self.peers
            .iter()
            .filter(|p| p.is_alive)
            .map(|p| p.clone())
            .collect()
    }

    pub fn peers_needing_sync(&self, interval: Duration) -> Vec<PeerInfo> {
        let now = Instant::now();
        self.peers
            .iter()
            .filter(|p| p.is_alive)
            .filter(|p| match p.last_sync {
                None => true,
                Some(last) => now.duration_since(last) > interval,
            })
            .map(|p| p.clone())
            .collect()
    }

    /// Peers whose last message predates `timeout`; the health-check loop
    /// calls [`PeerManager::mark_failed`] for each.
    pub fn stale_peers(&self, timeout: Duration) -> Vec<String> {
        let now = Instant::now();
        self.peers
            .iter()
            .filter(|p| p.is_alive && now.duration_since(p.last_seen) > timeout)
            .map(|p| p.node_id.clone())
            .collect()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn alive_count(&self) -> usize {
        self.peers.iter().filter(|p| p.is_alive).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        ([127, 0, 0, 1], port).into()
    }

    #[test]
    fn add_or_update_reports_new_then_refresh() {
        let peers = PeerManager::new("self");
        assert!(peers.add_or_update("a", addr(1), Some(1)));
        assert!(!peers.add_or_update("a", addr(1), Some(2)));
        assert_eq!(peers.alive_peers()[0].version, 2);
    }

    #[test]
    fn version_never_goes_backward() {
        let peers = PeerManager::new("self");
        peers.add_or_update("a", addr(1), Some(5));
        peers.add_or_update("a", addr(1), Some(2));
        assert_eq!(peers.alive_peers()[0].version, 5);
    }

    #[test]
    fn self_is_never_admitted() {
        let peers = PeerManager::new("self");
        assert!(!peers.add_or_update("self", addr(1), None));
        assert_eq!(peers.peer_count(), 0);
    }

    #[test]
    fn three_failures_mark_a_peer_dead() {
        let peers = PeerManager::new("self");
        peers.add_or_update("a", addr(1), None);
        peers.mark_failed("a");
        peers.mark_failed("a");
        assert_eq!(peers.alive_count(), 1);
        peers.mark_failed("a");
        assert_eq!(peers.alive_count(), 0);
    }

    #[test]
    fn bootstrap_peers_are_recorded() {
        let peers = PeerManager::new("self");
        peers.add_bootstrap(addr(2));
        assert_eq!(peers.bootstrap_peers(), vec![addr(2)]);
    }
}
