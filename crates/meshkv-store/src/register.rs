use serde::{Deserialize, Serialize};

/// `(value, ts, origin)` for a live key. Serializes as a 3-element JSON
/// array, matching the wire shape `{k: [v, ts, org]}` in a `SYNC_RESPONSE`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Register(pub serde_json::Value, pub f64, pub String);

impl Register {
    pub fn new(value: serde_json::Value, ts: f64, origin: impl Into<String>) -> Self {
        Register(value, ts, origin.into())
    }

    pub fn value(&self) -> &serde_json::Value {
        &self.0
    }

    pub fn ts(&self) -> f64 {
        self.1
    }

    pub fn origin(&self) -> &str {
        &self.2
    }
}

/// `(ts, origin)` for a deleted key. Serializes as a 2-element JSON array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tombstone(pub f64, pub String);

impl Tombstone {
    pub fn new(ts: f64, origin: impl Into<String>) -> Self {
        Tombstone(ts, origin.into())
    }

    pub fn ts(&self) -> f64 {
        self.0
    }

    pub fn origin(&self) -> &str {
        &self.1
    }
}

/// Strict total order `≻` on `(ts, origin)` pairs: greater timestamp wins,
/// ties broken by the lexicographically greater origin id. Equal origins at
/// equal timestamps cannot arise from distinct replicas by construction, so
/// this only needs to be a valid total order, not to handle that case
/// specially.
pub fn dominates(ts_a: f64, origin_a: &str, ts_b: f64, origin_b: &str) -> bool {
    match ts_a.total_cmp(&ts_b) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Less => false,
        std::cmp::Ordering::Equal => origin_a > origin_b,
    }
}

/// `a ≻ b || a == b`, i.e. non-strict. Used where the reference merge rule
/// has a tombstone win outright ties against a live register at an
/// identical `(ts, origin)`.
pub fn dominates_or_equal(ts_a: f64, origin_a: &str, ts_b: f64, origin_b: &str) -> bool {
    match ts_a.total_cmp(&ts_b) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Less => false,
        std::cmp::Ordering::Equal => origin_a >= origin_b,
    }
}
