//! The keyspace: cinder's core key-value store.
//!
//! A `Keyspace` owns a reader/writer-locked `AHashMap<String, Entry>`
//! and is the exclusive owner of values — every reader and writer goes
//! through it under its lock. Around the map it keeps the structures
//! that memory governance needs coherent: the volatile-key index, the
//! active eviction cache, and the byte gauge.
//!
//! Expired entries are never handed to a caller: `get_values` deletes
//! them lazily (directly when standalone or leader, by forwarding
//! otherwise), and the active sampler sweeps them in the background.
//!
//! Lock order, everywhere: store → eviction cache, store → volatile
//! index. The sampler reads the index, releases, then takes the store
//! lock — never the other way around.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::SyncSender;
use std::sync::{Arc, OnceLock, RwLock};

use ahash::AHashMap;
use tracing::{debug, warn};

use crate::barrier::SnapshotBarrier;
use crate::cache::{EvictionCache, EvictionPolicy};
use crate::clock::Clock;
use crate::cluster::{ApplyRequest, ClusterLinks};
use crate::context::SessionContext;
use crate::error::KeyspaceError;
use crate::memory::MemoryGauge;
use crate::persist::{PersistedEntry, SnapshotSink};
use crate::types::Value;
use crate::volatile::VolatileIndex;

mod governor;
mod sampler;
mod touch;

pub use touch::spawn_touch_worker;
pub(crate) use touch::TouchJob;

/// Default number of volatile keys the active sampler draws per cycle.
pub const DEFAULT_EVICTION_SAMPLE: usize = 20;

/// Configuration for a keyspace.
#[derive(Debug, Clone)]
pub struct KeyspaceConfig {
    /// Maximum estimated memory in bytes. `None` disables the governor
    /// and the eviction cache entirely.
    pub max_memory: Option<usize>,
    /// What to do when the limit is reached.
    pub eviction_policy: EvictionPolicy,
    /// Sample size for the active TTL sampler.
    pub eviction_sample: usize,
}

impl Default for KeyspaceConfig {
    fn default() -> Self {
        Self {
            max_memory: None,
            eviction_policy: EvictionPolicy::NoEviction,
            eviction_sample: DEFAULT_EVICTION_SAMPLE,
        }
    }
}

/// A single entry: a value plus optional absolute expiry.
#[derive(Debug, Clone)]
pub(crate) struct Entry {
    pub(crate) value: Value,
    /// Absolute expiry in unix ms; `None` means the key never expires.
    pub(crate) expire_at_ms: Option<i64>,
}

pub(crate) type EntryMap = AHashMap<String, Entry>;

/// Aggregated statistics for a keyspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyspaceStats {
    /// Number of live keys.
    pub key_count: usize,
    /// Estimated memory usage in bytes.
    pub used_bytes: usize,
    /// Keys currently tracked by the volatile index.
    pub keys_with_expiry: usize,
    /// Cumulative keys removed by expiration (lazy + sampler).
    pub keys_expired: u64,
    /// Cumulative keys removed by the memory governor.
    pub keys_evicted: u64,
}

/// The core key-value store.
pub struct Keyspace {
    pub(crate) entries: RwLock<EntryMap>,
    pub(crate) volatile: VolatileIndex,
    pub(crate) cache: EvictionCache,
    pub(crate) gauge: MemoryGauge,
    pub(crate) config: KeyspaceConfig,
    pub(crate) clock: Arc<dyn Clock>,
    barrier: SnapshotBarrier,
    pub(crate) cluster: Option<Arc<ClusterLinks>>,
    snapshots: Option<Arc<dyn SnapshotSink>>,
    touch_tx: OnceLock<SyncSender<TouchJob>>,
    expired_total: AtomicU64,
    pub(crate) evicted_total: AtomicU64,
}

impl Keyspace {
    /// Creates an empty keyspace for the given config and clock.
    pub fn new(config: KeyspaceConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(EntryMap::new()),
            volatile: VolatileIndex::new(),
            cache: EvictionCache::for_policy(config.eviction_policy),
            gauge: MemoryGauge::new(),
            config,
            clock,
            barrier: SnapshotBarrier::new(),
            cluster: None,
            snapshots: None,
            touch_tx: OnceLock::new(),
            expired_total: AtomicU64::new(0),
            evicted_total: AtomicU64::new(0),
        }
    }

    /// Wires the cluster collaborators. Must happen before the keyspace
    /// serves commands.
    pub fn set_cluster(&mut self, links: Arc<ClusterLinks>) {
        self.cluster = Some(links);
    }

    /// Wires the snapshot sink used for change counting.
    pub fn set_snapshot_sink(&mut self, sink: Arc<dyn SnapshotSink>) {
        self.snapshots = Some(sink);
    }

    pub(crate) fn in_cluster(&self) -> bool {
        self.cluster.is_some()
    }

    pub(crate) fn is_leader(&self) -> bool {
        self.cluster.as_ref().map(|l| l.is_leader()).unwrap_or(false)
    }

    /// The snapshot/mutation barrier for this keyspace.
    pub fn barrier(&self) -> &SnapshotBarrier {
        &self.barrier
    }

    /// Which of `keys` exist. Never mutates; an entry past its expiry
    /// counts as absent even though lazy deletion hasn't run yet.
    pub fn keys_exist(&self, keys: &[String]) -> AHashMap<String, bool> {
        let entries = self.entries.read().unwrap();
        let now = self.clock.now_ms();
        keys.iter()
            .map(|key| {
                let alive = entries
                    .get(key)
                    .map(|e| !is_expired(e, now))
                    .unwrap_or(false);
                (key.clone(), alive)
            })
            .collect()
    }

    /// Absolute expiry of `key` in unix ms. `None` when the key is
    /// missing or has no expiry.
    pub fn get_expiry(&self, key: &str) -> Option<i64> {
        let entries = self.entries.read().unwrap();
        entries.get(key).and_then(|e| e.expire_at_ms)
    }

    /// Every live key in the store. Order is unspecified.
    pub fn get_keys(&self) -> Vec<String> {
        let entries = self.entries.read().unwrap();
        entries.keys().cloned().collect()
    }

    /// Values for `keys`, lazily deleting any that have expired.
    ///
    /// Takes the write lock because expiry triggers deletion. After the
    /// lock is released, a cache update is scheduled for the surveyed
    /// keys.
    pub fn get_values(
        &self,
        ctx: &SessionContext,
        keys: &[String],
    ) -> AHashMap<String, Option<Value>> {
        let mut values = AHashMap::with_capacity(keys.len());
        {
            let mut entries = self.entries.write().unwrap();
            let now = self.clock.now_ms();
            for key in keys {
                match entries.get(key) {
                    None => {
                        values.insert(key.clone(), None);
                        continue;
                    }
                    Some(entry) if !is_expired(entry, now) => {
                        values.insert(key.clone(), Some(entry.value.clone()));
                        continue;
                    }
                    Some(_) => {}
                }
                self.drop_expired_locked(ctx, &mut entries, key);
                values.insert(key.clone(), None);
            }
        }
        self.schedule_touch(ctx, keys.to_vec());
        values
    }

    /// Inserts or replaces entries. An existing entry keeps its expiry.
    ///
    /// Fails when estimated usage has reached the limit and the policy
    /// is `noeviction`; under every other policy the write proceeds and
    /// the governor reclaims space afterwards.
    pub fn set_values(
        &self,
        ctx: &SessionContext,
        new_entries: Vec<(String, Value)>,
    ) -> Result<(), KeyspaceError> {
        {
            let mut entries = self.entries.write().unwrap();
            if let Some(max) = self.config.max_memory {
                if self.gauge.used_bytes() >= max
                    && self.config.eviction_policy == EvictionPolicy::NoEviction
                {
                    return Err(KeyspaceError::MaxMemoryReached);
                }
            }
            for (key, value) in &new_entries {
                match entries.get_mut(key) {
                    Some(entry) => {
                        self.gauge.replace(key, &entry.value, value);
                        entry.value = value.clone();
                    }
                    None => {
                        self.gauge.add(key, value);
                        entries.insert(
                            key.clone(),
                            Entry {
                                value: value.clone(),
                                expire_at_ms: None,
                            },
                        );
                    }
                }
                if !self.in_cluster() {
                    if let Some(sink) = &self.snapshots {
                        sink.record_change();
                    }
                }
            }
        }
        let keys = new_entries.into_iter().map(|(key, _)| key).collect();
        self.schedule_touch(ctx, keys);
        Ok(())
    }

    /// Rewrites a key's expiry, keeping its value, and indexes the key
    /// as volatile when the new expiry is set. A missing key is a no-op.
    ///
    /// When `touch` is set, a cache update is scheduled for the key.
    pub fn set_expiry(
        &self,
        ctx: &SessionContext,
        key: &str,
        expire_at_ms: Option<i64>,
        touch: bool,
    ) {
        {
            let mut entries = self.entries.write().unwrap();
            match entries.get_mut(key) {
                Some(entry) => entry.expire_at_ms = expire_at_ms,
                None => return,
            }
            if expire_at_ms.is_some() {
                self.volatile.add(key);
            }
            // a cleared expiry leaves the index entry behind: the index
            // is a hint, and consumers re-check the store
        }
        if touch {
            self.schedule_touch(ctx, vec![key.to_string()]);
        }
    }

    /// Deletes a key, taking the store write lock.
    pub fn delete_key(&self, key: &str) -> bool {
        let mut entries = self.entries.write().unwrap();
        self.delete_key_locked(&mut entries, key)
    }

    /// Deletes a key from the map, the volatile index, and the active
    /// eviction cache. The caller holds the store write lock.
    pub(crate) fn delete_key_locked(&self, entries: &mut EntryMap, key: &str) -> bool {
        let existed = self.remove_entry_locked(entries, key);
        self.cache.remove(key);
        existed
    }

    /// Map + volatile index + gauge removal, without touching the
    /// eviction cache. The governor uses this directly after popping a
    /// victim, since the pop already removed it from the heap it holds
    /// locked.
    pub(crate) fn remove_entry_locked(&self, entries: &mut EntryMap, key: &str) -> bool {
        self.volatile.remove(key);
        match entries.remove(key) {
            Some(entry) => {
                self.gauge.remove(key, &entry.value);
                debug!(key, "deleted key");
                true
            }
            None => false,
        }
    }

    /// Barrier-protected copy of the full state for persistence.
    pub fn get_state(&self) -> Vec<PersistedEntry> {
        let _copy = self.barrier.begin_copy();
        let entries = self.entries.read().unwrap();
        entries
            .iter()
            .map(|(key, entry)| PersistedEntry {
                key: key.clone(),
                value: entry.value.clone(),
                expire_at_ms: entry.expire_at_ms,
            })
            .collect()
    }

    /// Restores one entry during recovery, bypassing limit checks.
    pub fn restore(&self, key: String, value: Value, expire_at_ms: Option<i64>) {
        let mut entries = self.entries.write().unwrap();
        if expire_at_ms.is_some() {
            self.volatile.add(&key);
        }
        match entries.get_mut(&key) {
            Some(entry) => {
                self.gauge.replace(&key, &entry.value, &value);
                entry.value = value;
                entry.expire_at_ms = expire_at_ms;
            }
            None => {
                self.gauge.add(&key, &value);
                entries.insert(
                    key,
                    Entry {
                        value,
                        expire_at_ms,
                    },
                );
            }
        }
    }

    /// Current aggregate statistics.
    pub fn stats(&self) -> KeyspaceStats {
        KeyspaceStats {
            key_count: self.gauge.key_count(),
            used_bytes: self.gauge.used_bytes(),
            keys_with_expiry: self.volatile.len(),
            keys_expired: self.expired_total.load(Ordering::Relaxed),
            keys_evicted: self.evicted_total.load(Ordering::Relaxed),
        }
    }

    /// Deletes an expired key according to this node's role: directly
    /// when standalone, through consensus when leader, by forwarding to
    /// the leader otherwise. The caller holds the store write lock.
    fn drop_expired_locked(&self, ctx: &SessionContext, entries: &mut EntryMap, key: &str) {
        match &self.cluster {
            None => {
                self.delete_key_locked(entries, key);
            }
            Some(links) if links.is_leader() => {
                let req = ApplyRequest::delete_key(ctx, key);
                if let Err(e) = links.consensus.apply(ctx, req) {
                    warn!(key, "failed to replicate expired-key deletion: {e}");
                }
            }
            Some(links) => {
                // forwarded even when command forwarding is disabled:
                // expired keys must be removed cluster-wide
                links.gossip.forward_delete_key(ctx, key);
            }
        }
        self.expired_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_expired(&self, n: u64) {
        self.expired_total.fetch_add(n, Ordering::Relaxed);
    }

    /// Hands `keys` to the touch worker, falling back to a synchronous
    /// update when no worker is attached. Lost updates are tolerated —
    /// the cache is a hint — so a full queue just drops the job.
    pub(crate) fn schedule_touch(&self, ctx: &SessionContext, keys: Vec<String>) {
        if keys.is_empty() {
            return;
        }
        match self.touch_tx.get() {
            Some(tx) => {
                let _ = tx.try_send(TouchJob {
                    ctx: ctx.clone(),
                    keys,
                });
            }
            None => {
                if let Err(e) = self.update_keys_in_cache(ctx, &keys) {
                    warn!("cache update failed: {e}");
                }
            }
        }
    }

    pub(crate) fn attach_touch_sender(&self, tx: SyncSender<TouchJob>) {
        let _ = self.touch_tx.set(tx);
    }
}

/// Whether an entry is past its expiry at `now_ms`.
pub(crate) fn is_expired(entry: &Entry, now_ms: i64) -> bool {
    entry.expire_at_ms.map(|at| at < now_ms).unwrap_or(false)
}
