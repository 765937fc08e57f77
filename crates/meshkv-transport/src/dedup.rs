use dashmap::{DashMap, DashSet};
use std::net::SocketAddr;

/// Per-peer set of already-seen sequence numbers, keyed by source address.
/// Unbounded, as specified: a production deployment should cap this or turn
/// it into a sliding window (see DESIGN.md), but that redesign is out of
/// scope here.
#[derive(Default)]
pub struct ReceivedSeqs {
    by_peer: DashMap<SocketAddr, DashSet<u32>>,
}

impl ReceivedSeqs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if `(addr, seq)` was already recorded; otherwise
    /// records it and returns `false`.
    pub fn check_and_insert(&self, addr: SocketAddr, seq: u32) -> bool {
        let set = self.by_peer.entry(addr).or_default();
        !set.insert(seq)
    }
}
