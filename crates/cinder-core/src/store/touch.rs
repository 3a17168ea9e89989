//! Asynchronous eviction-cache updates.
//!
//! Handlers touch keys on every read and write, but cache maintenance
//! must not extend the store's critical sections. Touched keys are
//! handed to a dedicated worker thread through a bounded channel:
//! `try_send`, never block, and a full queue simply drops the job —
//! the cache is a hint and tolerates lost updates.
//!
//! The worker holds only a `Weak` reference to the keyspace, so it can
//! never outlive the engine: once the last strong reference drops, the
//! next job (or channel disconnect) ends the thread.

use std::sync::mpsc;
use std::sync::Arc;

use tracing::warn;

use super::Keyspace;
use crate::context::SessionContext;
use crate::error::EvictionError;

/// Bounded queue depth for pending touch jobs.
const TOUCH_CHANNEL_CAPACITY: usize = 4096;

/// One batch of keys to touch, with the session that surveyed them.
#[derive(Debug, Clone)]
pub(crate) struct TouchJob {
    pub(crate) ctx: SessionContext,
    pub(crate) keys: Vec<String>,
}

/// Spawns the cache-touch worker for `keyspace` and attaches its
/// sender. Without a worker attached, touches run synchronously on the
/// scheduling thread (the mode unit tests rely on).
pub fn spawn_touch_worker(keyspace: &Arc<Keyspace>) {
    let (tx, rx) = mpsc::sync_channel::<TouchJob>(TOUCH_CHANNEL_CAPACITY);
    let weak = Arc::downgrade(keyspace);

    let spawned = std::thread::Builder::new()
        .name("cinder-touch".into())
        .spawn(move || {
            while let Ok(job) = rx.recv() {
                let Some(ks) = weak.upgrade() else { break };
                if let Err(e) = ks.update_keys_in_cache(&job.ctx, &job.keys) {
                    warn!("cache update failed: {e}");
                }
            }
        });

    match spawned {
        Ok(_) => keyspace.attach_touch_sender(tx),
        Err(e) => warn!("failed to spawn touch worker, cache updates will run inline: {e}"),
    }
}

impl Keyspace {
    /// Updates the access count / recency of `keys` in the active
    /// eviction cache, then lets the memory governor react.
    ///
    /// Runs only in standalone mode or on the cluster leader, and only
    /// when a memory limit is configured. Under volatile policies, keys
    /// without an expiry at access time are skipped by the cache.
    pub(crate) fn update_keys_in_cache(
        &self,
        ctx: &SessionContext,
        keys: &[String],
    ) -> Result<(), EvictionError> {
        if self.in_cluster() && !self.is_leader() {
            return Ok(());
        }
        if self.config.max_memory.is_none() {
            return Ok(());
        }
        for key in keys {
            let has_expiry = {
                let entries = self.entries.read().unwrap();
                entries
                    .get(key)
                    .map(|e| e.expire_at_ms.is_some())
                    .unwrap_or(false)
            };
            self.cache.touch(key, has_expiry, self.clock.now_ms());
            self.enforce_memory_limit(ctx)?;
        }
        Ok(())
    }
}
