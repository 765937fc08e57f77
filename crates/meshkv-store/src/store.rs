use crate::clock::now_secs;
use crate::register::{dominates, dominates_or_equal, Register, Tombstone};
use crate::snapshot::StateSnapshot;
use log::trace;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

struct Inner {
    data: HashMap<String, Register>,
    tombstones: HashMap<String, Tombstone>,
    vector_clock: HashMap<String, u64>,
    version: u64,
}

/// The replicated key/value map. One [`Mutex`] covers the register map, the
/// tombstone map, the vector clock, and the version counter together, since
/// `merge` must appear atomic across all four (see module docs on
/// [`CrdtStore::merge`]).
pub struct CrdtStore {
    node_id: String,
    inner: Mutex<Inner>,
}

impl CrdtStore {
    pub fn new(node_id: impl Into<String>) -> Self {
        CrdtStore {
            node_id: node_id.into(),
            inner: Mutex::new(Inner {
                data: HashMap::new(),
                tombstones: HashMap::new(),
                vector_clock: HashMap::new(),
                version: 0,
            }),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn version(&self) -> u64 {
        self.inner.lock().unwrap().version
    }

    /// Writes `value` under `key`, stamped with the current wall clock and
    /// this node's id. Eagerly drops any tombstone for `key` (an allowed
    /// optimization over the shadow-on-read/merge behavior, see DESIGN.md).
    pub fn set(&self, key: &str, value: Value) {
        let ts = now_secs();
        let mut inner = self.inner.lock().unwrap();
        inner
            .data
            .insert(key.to_string(), Register::new(value, ts, self.node_id.clone()));
        inner.tombstones.remove(key);
        bump(&mut inner, &self.node_id);
    }

    /// Returns the live value for `key`, or `None` if absent or shadowed by
    /// a tombstone.
    pub fn get(&self, key: &str) -> Option<Value> {
        let inner = self.inner.lock().unwrap();
        if inner.tombstones.contains_key(key) {
            return None;
        }
        inner.data.get(key).map(|r| r.value().clone())
    }

    /// Marks `key` deleted with a fresh tombstone. This implementation also
    /// removes the live register immediately (see DESIGN.md) rather than
    /// leaving `get`/`merge` to shadow it, since the two are observably
    /// equivalent and this keeps `data` from growing unboundedly with stale
    /// entries.
    pub fn delete(&self, key: &str) {
        let ts = now_secs();
        let mut inner = self.inner.lock().unwrap();
        inner
            .tombstones
            .insert(key.to_string(), Tombstone::new(ts, self.node_id.clone()));
        inner.data.remove(key);
        bump(&mut inner, &self.node_id);
    }

    /// Live keys: present in `data`, not shadowed by a tombstone.
    pub fn keys(&self) -> HashSet<String> {
        let inner = self.inner.lock().unwrap();
        inner
            .data
            .keys()
            .filter(|k| !inner.tombstones.contains_key(*k))
            .cloned()
            .collect()
    }

    /// Live key/value pairs.
    pub fn all_data(&self) -> HashMap<String, Value> {
        let inner = self.inner.lock().unwrap();
        inner
            .data
            .iter()
            .filter(|(k, _)| !inner.tombstones.contains_key(*k))
            .map(|(k, r)| (k.clone(), r.value().clone()))
            .collect()
    }

    pub fn snapshot(&self) -> StateSnapshot {
        let inner = self.inner.lock().unwrap();
        StateSnapshot {
            data: inner.data.clone(),
            tombstones: inner.tombstones.clone(),
            vector_clock: inner.vector_clock.clone(),
            version: inner.version,
            node_id: self.node_id.clone(),
        }
    }

    /// Merges a remote snapshot's register map, tombstone map, and vector
    /// clock into this store under a single lock acquisition, so concurrent
    /// readers see either the fully pre-merge or fully post-merge state.
    ///
    /// This is a pure join on the semilattice of `(register-map,
    /// tombstone-map)` pairs ordered by pointwise [`dominates`]: idempotent
    /// because `dominates` is strict (reapplying the same snapshot finds
    /// nothing left to update), commutative and associative because
    /// `dominates` totally orders every `(ts, origin)` quadruple that can
    /// arise.
    pub fn merge(
        &self,
        remote_data: &HashMap<String, Register>,
        remote_tombstones: &HashMap<String, Tombstone>,
        remote_vector_clock: &HashMap<String, u64>,
    ) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let mut modified = false;

        for (key, remote) in remote_data {
            let mut should_update = match inner.data.get(key) {
                Some(local) => dominates(remote.ts(), remote.origin(), local.ts(), local.origin()),
                None => true,
            };

            if let Some(tomb) = inner.tombstones.get(key) {
                if dominates_or_equal(tomb.ts(), tomb.origin(), remote.ts(), remote.origin()) {
                    should_update = false;
                }
            }

            if should_update {
                inner.data.insert(key.clone(), remote.clone());
                modified = true;
            }
        }

        for (key, remote_tomb) in remote_tombstones {
            let should_update = match inner.tombstones.get(key) {
                Some(local) => dominates(
                    remote_tomb.ts(),
                    remote_tomb.origin(),
                    local.ts(),
                    local.origin(),
                ),
                None => true,
            };

            if should_update {
                inner.tombstones.insert(key.clone(), remote_tomb.clone());

                if let Some(local_data) = inner.data.get(key) {
                    if dominates(
                        remote_tomb.ts(),
                        remote_tomb.origin(),
                        local_data.ts(),
                        local_data.origin(),
                    ) {
                        inner.data.remove(key);
                    }
                }
                modified = true;
            }
        }

        for (origin, seq) in remote_vector_clock {
            let entry = inner.vector_clock.entry(origin.clone()).or_insert(0);
            if *seq > *entry {
                *entry = *seq;
            }
        }

        if modified {
            inner.version += 1;
        }
        trace!(
            "merge on {}: modified={modified}, version={}",
            self.node_id,
            inner.version
        );
        modified
    }
}

fn bump(inner: &mut Inner, node_id: &str) {
    *inner.vector_clock.entry(node_id.to_string()).or_insert(0) += 1;
    inner.version += 1;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_then_get_round_trips() {
        let store = CrdtStore::new("a");
        store.set("x", json!("hello"));
        assert_eq!(store.get("x"), Some(json!("hello")));
    }

    #[test]
    fn delete_shadows_the_value() {
        let store = CrdtStore::new("a");
        store.set("x", json!(1));
        store.delete("x");
        assert_eq!(store.get("x"), None);
        assert!(!store.keys().contains("x"));
    }

    #[test]
    fn version_never_decreases() {
        let store = CrdtStore::new("a");
        let v0 = store.version();
        store.set("x", json!(1));
        let v1 = store.version();
        store.delete("x");
        let v2 = store.version();
        assert!(v1 > v0);
        assert!(v2 > v1);
    }

    #[test]
    fn lww_tie_break_prefers_greater_origin() {
        // Scenario 1: A.set("x","a") and B.set("x","b") at identical ts.
        let a = CrdtStore::new("A");
        let b = CrdtStore::new("B");
        a.set("x", json!("a"));
        b.set("x", json!("b"));

        // force identical timestamps as the scenario specifies
        let snap_a = identical_ts(a.snapshot(), 1.0);
        let snap_b = identical_ts(b.snapshot(), 1.0);

        a.merge(&snap_b.data, &snap_b.tombstones, &snap_b.vector_clock);
        b.merge(&snap_a.data, &snap_a.tombstones, &snap_a.vector_clock);

        assert_eq!(a.get("x"), Some(json!("b")));
        assert_eq!(b.get("x"), Some(json!("b")));
    }

    #[test]
    fn delete_wins_over_older_set_then_newer_set_wins() {
        // Scenario 2.
        let a = CrdtStore::new("A");
        let b = CrdtStore::new("B");

        a.set("k", json!("v1"));
        let snap1 = identical_ts(a.snapshot(), 1.0);
        b.merge(&snap1.data, &snap1.tombstones, &snap1.vector_clock);
        assert_eq!(b.get("k"), Some(json!("v1")));

        a.delete("k");
        let snap2 = tombstones_at_ts(a.snapshot(), 2.0);
        b.merge(&snap2.data, &snap2.tombstones, &snap2.vector_clock);
        assert_eq!(b.get("k"), None);

        a.set("k", json!("v2"));
        let snap3 = identical_ts(a.snapshot(), 3.0);
        b.merge(&snap3.data, &snap3.tombstones, &snap3.vector_clock);
        assert_eq!(b.get("k"), Some(json!("v2")));
    }

    #[test]
    fn merge_is_idempotent() {
        let a = CrdtStore::new("A");
        let b = CrdtStore::new("B");
        a.set("x", json!(1));
        a.set("y", json!(2));
        a.delete("y");
        let snap = a.snapshot();

        let first = b.merge(&snap.data, &snap.tombstones, &snap.vector_clock);
        let snap_after_first = b.snapshot();
        let second = b.merge(&snap.data, &snap.tombstones, &snap.vector_clock);
        let snap_after_second = b.snapshot();

        assert!(first);
        assert!(!second);
        assert_eq!(snap_after_first.data, snap_after_second.data);
        assert_eq!(snap_after_first.tombstones, snap_after_second.tombstones);
    }

    #[test]
    fn merge_is_commutative() {
        let a = CrdtStore::new("A");
        a.set("shared", json!("from-a"));
        let snap_a = identical_ts(a.snapshot(), 5.0);

        let b = CrdtStore::new("B");
        b.set("shared", json!("from-b"));
        let snap_b = identical_ts(b.snapshot(), 5.0);

        let order1 = CrdtStore::new("C");
        order1.merge(&snap_a.data, &snap_a.tombstones, &snap_a.vector_clock);
        order1.merge(&snap_b.data, &snap_b.tombstones, &snap_b.vector_clock);

        let order2 = CrdtStore::new("C");
        order2.merge(&snap_b.data, &snap_b.tombstones, &snap_b.vector_clock);
        order2.merge(&snap_a.data, &snap_a.tombstones, &snap_a.vector_clock);

        assert_eq!(order1.all_data(), order2.all_data());
    }

    fn identical_ts(mut snap: StateSnapshot, ts: f64) -> StateSnapshot {
        for reg in snap.data.values_mut() {
            reg.1 = ts;
        }
        snap
    }

    fn tombstones_at_ts(mut snap: StateSnapshot, ts: f64) -> StateSnapshot {
        for tomb in snap.tombstones.values_mut() {
            tomb.0 = ts;
        }
        snap
    }
}
