//! Eviction caches: the LFU and LRU access heaps.
//!
//! An [`AccessHeap`] is an indexed binary min-heap over accessed keys.
//! The root is always the next eviction victim: least frequently used
//! (ties broken by oldest access) for LFU, least recently used for LRU.
//! A position map gives O(log n) `update`/`delete` by key.
//!
//! Exactly one variant is instantiated per process, chosen from the
//! configured eviction policy. Under the volatile policies the heap is
//! only updated for keys that carry an expiry at access time.

use std::sync::{Mutex, MutexGuard};

use ahash::AHashMap;

/// How the keyspace handles writes once the memory limit is reached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EvictionPolicy {
    /// Refuse writes when memory is full.
    #[default]
    NoEviction,
    /// Evict the least-frequently-used key, considering all keys.
    AllKeysLfu,
    /// Evict the least-recently-used key, considering all keys.
    AllKeysLru,
    /// LFU over keys that carry an expiry.
    VolatileLfu,
    /// LRU over keys that carry an expiry.
    VolatileLru,
    /// Evict a uniformly random key.
    AllKeysRandom,
    /// Evict a uniformly random key among those with an expiry.
    VolatileRandom,
}

impl EvictionPolicy {
    /// The heap ordering this policy drives, if any. Random and
    /// no-eviction policies don't maintain a cache.
    pub fn heap_kind(self) -> Option<HeapKind> {
        match self {
            EvictionPolicy::AllKeysLfu | EvictionPolicy::VolatileLfu => Some(HeapKind::Lfu),
            EvictionPolicy::AllKeysLru | EvictionPolicy::VolatileLru => Some(HeapKind::Lru),
            _ => None,
        }
    }

    /// Whether cache updates are restricted to keys with an expiry.
    pub fn volatile_only(self) -> bool {
        matches!(
            self,
            EvictionPolicy::VolatileLfu | EvictionPolicy::VolatileLru
        )
    }

    /// The configuration name of this policy.
    pub fn as_str(self) -> &'static str {
        match self {
            EvictionPolicy::NoEviction => "noeviction",
            EvictionPolicy::AllKeysLfu => "allkeys-lfu",
            EvictionPolicy::AllKeysLru => "allkeys-lru",
            EvictionPolicy::VolatileLfu => "volatile-lfu",
            EvictionPolicy::VolatileLru => "volatile-lru",
            EvictionPolicy::AllKeysRandom => "allkeys-random",
            EvictionPolicy::VolatileRandom => "volatile-random",
        }
    }
}

/// Heap ordering variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapKind {
    /// Root is the key with the lowest `(access_count, last_access)`.
    Lfu,
    /// Root is the key with the oldest `last_access`.
    Lru,
}

#[derive(Debug, Clone)]
struct Slot {
    key: String,
    access_count: u64,
    last_access_ms: i64,
}

/// Indexed binary min-heap over accessed keys.
#[derive(Debug)]
pub struct AccessHeap {
    kind: HeapKind,
    slots: Vec<Slot>,
    pos: AHashMap<String, usize>,
}

impl AccessHeap {
    pub fn new(kind: HeapKind) -> Self {
        Self {
            kind,
            slots: Vec::new(),
            pos: AHashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.pos.contains_key(key)
    }

    /// The current eviction victim without removing it.
    pub fn peek(&self) -> Option<&str> {
        self.slots.first().map(|s| s.key.as_str())
    }

    /// Records an access: bumps the key's count and access time,
    /// inserting it if absent, and restores heap order.
    pub fn update(&mut self, key: &str, now_ms: i64) {
        match self.pos.get(key).copied() {
            Some(i) => {
                self.slots[i].access_count += 1;
                self.slots[i].last_access_ms = now_ms;
                self.restore(i);
            }
            None => {
                let i = self.slots.len();
                self.slots.push(Slot {
                    key: key.to_string(),
                    access_count: 1,
                    last_access_ms: now_ms,
                });
                self.pos.insert(key.to_string(), i);
                self.sift_up(i);
            }
        }
    }

    /// Removes a key from the heap. Returns `false` if it wasn't there.
    pub fn delete(&mut self, key: &str) -> bool {
        match self.pos.get(key).copied() {
            Some(i) => {
                self.remove_at(i);
                true
            }
            None => false,
        }
    }

    /// Removes and returns the eviction victim at the root.
    pub fn pop(&mut self) -> Option<String> {
        if self.slots.is_empty() {
            return None;
        }
        let key = self.slots[0].key.clone();
        self.remove_at(0);
        Some(key)
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.pos.clear();
    }

    fn remove_at(&mut self, i: usize) {
        let last = self.slots.len() - 1;
        self.swap(i, last);
        let removed = self.slots.pop().expect("slot exists");
        self.pos.remove(&removed.key);
        if i < self.slots.len() {
            self.restore(i);
        }
    }

    /// Re-establishes heap order for a slot whose ordering key changed.
    fn restore(&mut self, i: usize) {
        let key = self.slots[i].key.clone();
        self.sift_up(i);
        // sift_up may have moved the slot; re-resolve before sifting down
        let i = self.pos[&key];
        self.sift_down(i);
    }

    fn less(&self, a: usize, b: usize) -> bool {
        let (x, y) = (&self.slots[a], &self.slots[b]);
        match self.kind {
            HeapKind::Lfu => {
                (x.access_count, x.last_access_ms) < (y.access_count, y.last_access_ms)
            }
            HeapKind::Lru => x.last_access_ms < y.last_access_ms,
        }
    }

    fn swap(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        self.slots.swap(a, b);
        self.pos.insert(self.slots[a].key.clone(), a);
        self.pos.insert(self.slots[b].key.clone(), b);
    }

    fn sift_up(&mut self, mut i: usize) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if self.less(i, parent) {
                self.swap(i, parent);
                i = parent;
            } else {
                break;
            }
        }
    }

    fn sift_down(&mut self, mut i: usize) {
        loop {
            let mut smallest = i;
            for child in [2 * i + 1, 2 * i + 2] {
                if child < self.slots.len() && self.less(child, smallest) {
                    smallest = child;
                }
            }
            if smallest == i {
                return;
            }
            self.swap(i, smallest);
            i = smallest;
        }
    }
}

/// The single active eviction cache for a keyspace.
///
/// Owns its own lock; callers that need multi-step access (the
/// governor's pop loop) take the guard via [`EvictionCache::heap`] after
/// acquiring the store lock, preserving the fixed store→cache order.
#[derive(Debug)]
pub struct EvictionCache {
    heap: Option<Mutex<AccessHeap>>,
    volatile_only: bool,
}

impl EvictionCache {
    pub fn for_policy(policy: EvictionPolicy) -> Self {
        Self {
            heap: policy.heap_kind().map(|kind| Mutex::new(AccessHeap::new(kind))),
            volatile_only: policy.volatile_only(),
        }
    }

    /// Whether this policy maintains a heap at all.
    pub fn is_enabled(&self) -> bool {
        self.heap.is_some()
    }

    /// Records an access. Under volatile policies, keys without an
    /// expiry are ignored.
    pub fn touch(&self, key: &str, has_expiry: bool, now_ms: i64) {
        let Some(heap) = &self.heap else { return };
        if self.volatile_only && !has_expiry {
            return;
        }
        heap.lock().unwrap().update(key, now_ms);
    }

    /// Drops a key from the heap, if present.
    pub fn remove(&self, key: &str) {
        if let Some(heap) = &self.heap {
            heap.lock().unwrap().delete(key);
        }
    }

    /// Locks and returns the heap for multi-step access. `None` when the
    /// policy doesn't maintain one.
    pub fn heap(&self) -> Option<MutexGuard<'_, AccessHeap>> {
        self.heap.as_ref().map(|h| h.lock().unwrap())
    }

    pub fn len(&self) -> usize {
        self.heap
            .as_ref()
            .map(|h| h.lock().unwrap().len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &str) -> bool {
        self.heap
            .as_ref()
            .map(|h| h.lock().unwrap().contains(key))
            .unwrap_or(false)
    }

    pub fn clear(&self) {
        if let Some(heap) = &self.heap {
            heap.lock().unwrap().clear();
        }
    }
}
