use crate::register::{Register, Tombstone};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Full replicated state as carried in a `SYNC_RESPONSE` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub data: HashMap<String, Register>,
    pub tombstones: HashMap<String, Tombstone>,
    pub vector_clock: HashMap<String, u64>,
    pub version: u64,
    pub node_id: String,
}
