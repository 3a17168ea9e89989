//! Active TTL expiration via random sampling.
//!
//! Waiting for lazy expiry alone would let cold expired keys pile up,
//! so a periodic sweep draws random keys from the volatile index and
//! deletes the expired ones. A hot sample — at least 20% expired —
//! means many more are likely out there, so the sweep runs again
//! immediately.
//!
//! The index is read and released before the store lock is taken; the
//! two are never held together in that direction.

use tracing::debug;

use super::{is_expired, Keyspace};
use crate::cluster::ApplyRequest;
use crate::context::SessionContext;

/// Re-sample immediately when at least this percentage of the sample
/// turned out to be expired.
const RESAMPLE_THRESHOLD_PERCENT: usize = 20;

impl Keyspace {
    /// Runs one expiration sweep. No-op on cluster followers.
    ///
    /// Returns the total number of keys deleted, across immediate
    /// re-samples.
    pub fn sweep_expired(&self, ctx: &SessionContext) -> usize {
        if self.in_cluster() && !self.is_leader() {
            return 0;
        }

        let mut total_deleted = 0usize;
        loop {
            let sampled = self.volatile.sample(self.config.eviction_sample);
            let sample_size = sampled.len();
            if sample_size == 0 {
                return total_deleted;
            }

            let mut deleted = 0usize;
            {
                let mut entries = self.entries.write().unwrap();
                let now = self.clock.now_ms();
                for key in &sampled {
                    let expired = entries
                        .get(key)
                        .map(|e| is_expired(e, now))
                        .unwrap_or(false);
                    if !expired {
                        continue;
                    }
                    if !self.in_cluster() {
                        self.delete_key_locked(&mut entries, key);
                    } else {
                        // leader: replicate the deletion
                        let req = ApplyRequest::delete_key(ctx, key);
                        if let Err(e) = self
                            .cluster
                            .as_ref()
                            .expect("cluster links present in cluster mode")
                            .consensus
                            .apply(ctx, req)
                        {
                            tracing::warn!(key, "failed to replicate sampled expiry: {e}");
                            continue;
                        }
                        // drop the local hint now; re-sampling the key
                        // before the replicated delete lands would stall
                        // the sweep
                        self.volatile.remove(key);
                    }
                    deleted += 1;
                }
            }

            self.note_expired(deleted as u64);
            total_deleted += deleted;
            debug!(sampled = sample_size, deleted, "expiry sweep");

            // integer percent without premature truncation
            if deleted * 100 / sample_size < RESAMPLE_THRESHOLD_PERCENT {
                return total_deleted;
            }
        }
    }
}
