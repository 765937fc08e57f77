//! Peer discovery, failure detection, and the node orchestrator that wires
//! a [`meshkv_store::CrdtStore`] to a [`meshkv_transport::ReliableTransport`]
//! and drives the sync, heartbeat, and discovery loops. See [`Node`].

pub mod messages;
pub mod node;
pub mod peer;

pub use messages::{Discovery, Heartbeat, PeerAdvert, SyncRequest, SyncResponse};
pub use node::{Node, NodeStatus, PeerStats, StateChange, StateChangeKind};
pub use peer::{PeerInfo, PeerManager};
