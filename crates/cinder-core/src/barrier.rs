//! Snapshot/mutation exclusion.
//!
//! A state copy must observe either all of a given write or none of it.
//! The snapshotter is the unique "writer" here: it takes the exclusive
//! side while copying the store, and every mutating command holds the
//! shared side for the duration of its handler. Mutations run freely
//! against each other — the store's own lock serializes them.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Two-sided barrier between state copies and write commands.
#[derive(Debug, Default)]
pub struct SnapshotBarrier {
    lock: RwLock<()>,
}

/// Held by the dispatcher around a write command's execution.
pub struct MutationGuard<'a>(#[allow(dead_code)] RwLockReadGuard<'a, ()>);

/// Held by the snapshotter while copying the store.
pub struct CopyGuard<'a>(#[allow(dead_code)] RwLockWriteGuard<'a, ()>);

impl SnapshotBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks while a state copy is in progress, then marks a mutation
    /// as in flight until the guard drops.
    pub fn begin_mutation(&self) -> MutationGuard<'_> {
        MutationGuard(self.lock.read().unwrap())
    }

    /// Blocks while mutations are in flight, then excludes them until
    /// the guard drops.
    pub fn begin_copy(&self) -> CopyGuard<'_> {
        CopyGuard(self.lock.write().unwrap())
    }

    /// Non-blocking variant of [`Self::begin_copy`], used by tests to
    /// observe that a mutation is in flight.
    pub fn try_begin_copy(&self) -> Option<CopyGuard<'_>> {
        self.lock.try_write().ok().map(CopyGuard)
    }
}
