//! Persistence collaborator seams.
//!
//! The core never writes files. The dispatcher enqueues raw command
//! bytes to a [`CommandLog`]; the snapshotter pulls a barrier-protected
//! state copy and hands it to a [`SnapshotSink`]. Concrete writers live
//! in `cinder-persistence`.

use std::io;

use crate::types::Value;

/// One entry of a state copy handed to the persistence layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedEntry {
    pub key: String,
    pub value: Value,
    /// Absolute expiry in unix ms, or `None` for no expiry.
    pub expire_at_ms: Option<i64>,
}

/// The append-only command log.
pub trait CommandLog: Send + Sync {
    /// Enqueues one raw client command for appending. Non-blocking by
    /// design — the queue drains on its own worker.
    fn queue(&self, raw: &[u8]);

    /// Compacts the log to the given state copy.
    fn rewrite(&self, state: Vec<PersistedEntry>) -> io::Result<()>;
}

/// The point-in-time snapshot writer.
pub trait SnapshotSink: Send + Sync {
    /// Notes one keyspace change since the last snapshot. Drives
    /// change-count-based snapshot scheduling.
    fn record_change(&self);

    /// Writes a snapshot of the given state copy taken at `now_ms`.
    fn take(&self, state: Vec<PersistedEntry>, now_ms: i64) -> io::Result<()>;

    /// Timestamp of the most recent successful snapshot in unix ms,
    /// or 0 when none has been taken.
    fn latest_snapshot_ms(&self) -> i64;
}
