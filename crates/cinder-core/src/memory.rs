//! Memory accounting for the keyspace.
//!
//! The governor needs a current usage figure without scanning the map
//! or holding the store lock, so every mutation updates an atomic
//! byte gauge. Figures are estimates: key bytes + value bytes + a fixed
//! per-entry overhead covering the map's bookkeeping.
//!
//! Overestimating is harmless (eviction triggers a little early);
//! underestimating would let usage creep past the configured limit,
//! so the overhead constant leans high.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::types::Value;

/// Estimated fixed overhead per entry: the `String` key struct
/// (24 bytes ptr+len+cap), the `Entry` struct (value enum + expiry),
/// and hash-map per-slot bookkeeping with empty-slot waste.
pub(crate) const ENTRY_OVERHEAD: usize = 96;

/// Estimates the total memory footprint of a single entry.
pub fn entry_size(key: &str, value: &Value) -> usize {
    key.len() + value_size(value) + ENTRY_OVERHEAD
}

/// Returns the byte size of a value's payload.
pub fn value_size(value: &Value) -> usize {
    match value {
        Value::String(data) => data.len(),
    }
}

/// Atomic byte gauge for the keyspace.
///
/// Updates are explicit — the store calls `add` / `remove` / `replace`
/// on every mutation. Reads never take a lock.
#[derive(Debug, Default)]
pub struct MemoryGauge {
    used_bytes: AtomicUsize,
    key_count: AtomicUsize,
}

impl MemoryGauge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current estimated usage in bytes.
    pub fn used_bytes(&self) -> usize {
        self.used_bytes.load(Ordering::Acquire)
    }

    /// Number of tracked keys.
    pub fn key_count(&self) -> usize {
        self.key_count.load(Ordering::Acquire)
    }

    /// Records the insertion of a new entry.
    pub fn add(&self, key: &str, value: &Value) {
        self.used_bytes
            .fetch_add(entry_size(key, value), Ordering::AcqRel);
        self.key_count.fetch_add(1, Ordering::AcqRel);
    }

    /// Records the removal of an entry.
    pub fn remove(&self, key: &str, value: &Value) {
        saturating_sub(&self.used_bytes, entry_size(key, value));
        saturating_sub(&self.key_count, 1);
    }

    /// Adjusts for an overwrite: old value out, new value in, key count
    /// unchanged.
    pub fn replace(&self, key: &str, old: &Value, new: &Value) {
        self.used_bytes
            .fetch_add(entry_size(key, new), Ordering::AcqRel);
        saturating_sub(&self.used_bytes, entry_size(key, old));
    }

    /// Resets tracking to zero. Used when the whole keyspace is cleared.
    pub fn reset(&self) {
        self.used_bytes.store(0, Ordering::Release);
        self.key_count.store(0, Ordering::Release);
    }
}

/// Atomic saturating subtraction: usage never underflows even if an
/// accounting bug double-removes an entry.
fn saturating_sub(cell: &AtomicUsize, delta: usize) {
    let mut current = cell.load(Ordering::Acquire);
    loop {
        let next = current.saturating_sub(delta);
        match cell.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => return,
            Err(observed) => current = observed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn val(s: &str) -> Value {
        Value::from(s)
    }

    #[test]
    fn new_gauge_is_empty() {
        let g = MemoryGauge::new();
        assert_eq!(g.used_bytes(), 0);
        assert_eq!(g.key_count(), 0);
    }

    #[test]
    fn add_then_remove_balances() {
        let g = MemoryGauge::new();
        let v = val("hello");
        g.add("key", &v);
        assert_eq!(g.used_bytes(), entry_size("key", &v));
        assert_eq!(g.key_count(), 1);

        g.remove("key", &v);
        assert_eq!(g.used_bytes(), 0);
        assert_eq!(g.key_count(), 0);
    }

    #[test]
    fn replace_tracks_size_delta() {
        let g = MemoryGauge::new();
        let old = val("short");
        let new = val("a much longer value here");
        g.add("k", &old);
        g.replace("k", &old, &new);
        assert_eq!(g.used_bytes(), entry_size("k", &new));
        assert_eq!(g.key_count(), 1);
    }

    #[test]
    fn remove_saturates_at_zero() {
        let g = MemoryGauge::new();
        g.remove("never-added", &val("x"));
        assert_eq!(g.used_bytes(), 0);
        assert_eq!(g.key_count(), 0);
    }

    #[test]
    fn entry_size_accounts_for_key_and_value() {
        let v = val("test");
        assert_eq!(entry_size("mykey", &v), 5 + 4 + ENTRY_OVERHEAD);
    }

    /// ENTRY_OVERHEAD must cover the real struct sizes so usage is never
    /// underestimated.
    #[test]
    fn entry_overhead_not_too_small() {
        let key_struct = std::mem::size_of::<String>();
        let value_struct = std::mem::size_of::<Value>() + std::mem::size_of::<Option<i64>>();
        let hashmap_per_entry = 8;
        let minimum = key_struct + value_struct + hashmap_per_entry;
        assert!(
            ENTRY_OVERHEAD >= minimum,
            "ENTRY_OVERHEAD ({ENTRY_OVERHEAD}) below measured minimum ({minimum})"
        );
    }
}
