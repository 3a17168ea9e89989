//! The volatile-key index: keys that currently carry an expiry.
//!
//! Kept as a flat vector so the TTL sampler and `volatile-random`
//! eviction can draw uniformly in O(1). It is a hint structure, not a
//! source of truth — it may transiently hold a key that has since been
//! persisted or deleted, and consumers re-check the store under its
//! own lock.

use std::sync::RwLock;

use rand::Rng;

/// Ordered sequence of keys with an expiry set. Internally locked;
/// see module docs for the staleness contract.
#[derive(Debug, Default)]
pub struct VolatileIndex {
    keys: RwLock<Vec<String>>,
}

impl VolatileIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a key. Idempotent: a key already present is not added again.
    pub fn add(&self, key: &str) {
        let mut keys = self.keys.write().unwrap();
        if !keys.iter().any(|k| k == key) {
            keys.push(key.to_string());
        }
    }

    /// Removes a key if present.
    pub fn remove(&self, key: &str) {
        let mut keys = self.keys.write().unwrap();
        keys.retain(|k| k != key);
    }

    /// Removes every key.
    pub fn clear(&self) {
        self.keys.write().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.keys.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if the key is currently indexed. Test visibility
    /// for the idempotency invariant.
    pub fn contains(&self, key: &str) -> bool {
        self.keys.read().unwrap().iter().any(|k| k == key)
    }

    /// Number of occurrences of `key` — always 0 or 1 when the
    /// idempotency invariant holds.
    pub fn occurrences(&self, key: &str) -> usize {
        self.keys.read().unwrap().iter().filter(|k| *k == key).count()
    }

    /// Draws one key uniformly at random, or `None` when empty.
    pub fn random(&self) -> Option<String> {
        let keys = self.keys.read().unwrap();
        if keys.is_empty() {
            return None;
        }
        let idx = rand::thread_rng().gen_range(0..keys.len());
        Some(keys[idx].clone())
    }

    /// Draws up to `n` *distinct* keys uniformly at random, retrying on
    /// collision within the sample. The read lock is released before
    /// this returns, so callers can take the store lock afterwards
    /// without a nested-lock inversion.
    pub fn sample(&self, n: usize) -> Vec<String> {
        let keys = self.keys.read().unwrap();
        let sample_size = n.min(keys.len());
        let mut rng = rand::thread_rng();
        let mut sampled: Vec<String> = Vec::with_capacity(sample_size);
        while sampled.len() < sample_size {
            let idx = rng.gen_range(0..keys.len());
            let candidate = &keys[idx];
            if !sampled.iter().any(|k| k == candidate) {
                sampled.push(candidate.clone());
            }
        }
        sampled
    }
}
