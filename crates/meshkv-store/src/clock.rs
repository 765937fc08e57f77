use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock seconds since the epoch, as an `f64`. This is the `ts` stamped
/// on every local write; monotonicity across calls is not required, only
/// comparability against timestamps received from other nodes.
pub fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
