//! JSON payload shapes for the four application-level packet types, per the
//! wire protocol table. Plain `serde`-derived structs; the framing and
//! checksum live below this layer, in `meshkv-wire` and `meshkv-transport`.

use meshkv_store::StateSnapshot;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRequest {
    pub node_id: String,
    pub version: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncResponse {
    pub node_id: String,
    pub state: StateSnapshot,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    pub node_id: String,
    pub version: u64,
    pub timestamp: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerAdvert {
    pub node_id: String,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Discovery {
    pub node_id: String,
    pub port: u16,
    pub peers: Vec<PeerAdvert>,
}
