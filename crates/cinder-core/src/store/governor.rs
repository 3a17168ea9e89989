//! The memory governor: policy-driven eviction under memory pressure.
//!
//! Runs after every cache touch. When estimated usage has reached the
//! configured limit, keys are evicted one at a time — from the active
//! heap, or at random — re-measuring after each eviction until usage
//! drops under the limit or the eviction source runs dry.
//!
//! Only a standalone node or the cluster leader ever evicts; leaders
//! replicate each eviction as a delete-key envelope instead of deleting
//! locally.

use std::sync::atomic::Ordering;

use rand::seq::IteratorRandom;
use tracing::debug;

use super::{EntryMap, Keyspace};
use crate::cache::EvictionPolicy;
use crate::cluster::ApplyRequest;
use crate::context::SessionContext;
use crate::error::EvictionError;

impl Keyspace {
    /// Checks estimated usage against the limit and evicts per policy
    /// until back under it.
    ///
    /// Returns an error only when eviction was required but the source
    /// of victims ran out; under `noeviction` this is a no-op — writes
    /// refuse instead.
    pub fn enforce_memory_limit(&self, ctx: &SessionContext) -> Result<(), EvictionError> {
        let Some(max) = self.config.max_memory else {
            return Ok(());
        };
        if self.in_cluster() && !self.is_leader() {
            return Ok(());
        }
        if self.gauge.used_bytes() < max {
            return Ok(());
        }

        match self.config.eviction_policy {
            EvictionPolicy::NoEviction => Ok(()),
            EvictionPolicy::AllKeysLfu
            | EvictionPolicy::VolatileLfu
            | EvictionPolicy::AllKeysLru
            | EvictionPolicy::VolatileLru => self.evict_from_heap(ctx, max),
            EvictionPolicy::AllKeysRandom => self.evict_random_all(ctx, max),
            EvictionPolicy::VolatileRandom => self.evict_random_volatile(ctx, max),
        }
    }

    /// Pops heap roots until under the limit. Store lock first, then
    /// the cache lock, held across the loop.
    fn evict_from_heap(&self, ctx: &SessionContext, max: usize) -> Result<(), EvictionError> {
        let mut entries = self.entries.write().unwrap();
        let Some(mut heap) = self.cache.heap() else {
            return Err(EvictionError::CacheEmpty);
        };
        loop {
            let Some(key) = heap.pop() else {
                return Err(EvictionError::CacheEmpty);
            };
            // the pop already removed the key from the heap we hold,
            // so only map/index/gauge cleanup remains
            self.evict_one(ctx, &mut entries, &key, false)?;
            if self.gauge.used_bytes() < max {
                return Ok(());
            }
        }
    }

    /// Evicts uniformly random keys from the whole store.
    fn evict_random_all(&self, ctx: &SessionContext, max: usize) -> Result<(), EvictionError> {
        let mut entries = self.entries.write().unwrap();
        loop {
            let Some(key) = entries.keys().choose(&mut rand::thread_rng()).cloned() else {
                return Err(EvictionError::NoKeysToEvict);
            };
            self.evict_one(ctx, &mut entries, &key, true)?;
            if self.gauge.used_bytes() < max {
                return Ok(());
            }
        }
    }

    /// Evicts uniformly random keys from the volatile index. A stale
    /// index entry still shrinks the index, so the loop always makes
    /// progress toward either the limit or an empty source.
    fn evict_random_volatile(&self, ctx: &SessionContext, max: usize) -> Result<(), EvictionError> {
        let mut entries = self.entries.write().unwrap();
        loop {
            let Some(key) = self.volatile.random() else {
                return Err(EvictionError::NoKeysToEvict);
            };
            self.evict_one(ctx, &mut entries, &key, true)?;
            if self.gauge.used_bytes() < max {
                return Ok(());
            }
        }
    }

    /// Evicts one key according to role. `clean_cache` is false on the
    /// heap path, where the victim was already popped from the guard
    /// the caller holds.
    fn evict_one(
        &self,
        ctx: &SessionContext,
        entries: &mut EntryMap,
        key: &str,
        clean_cache: bool,
    ) -> Result<(), EvictionError> {
        if !self.in_cluster() {
            self.remove_entry_locked(entries, key);
            if clean_cache {
                self.cache.remove(key);
            }
        } else {
            // leader-only: followers never reach the governor
            let req = ApplyRequest::delete_key(ctx, key);
            self.cluster
                .as_ref()
                .expect("cluster links present in cluster mode")
                .consensus
                .apply(ctx, req)?;
            // drop the local hint so the victim can't be drawn again
            // before the replicated delete lands
            self.volatile.remove(key);
        }
        self.evicted_total.fetch_add(1, Ordering::Relaxed);
        debug!(key, policy = self.config.eviction_policy.as_str(), "evicted key");
        Ok(())
    }
}
