//! cinder-persistence: file-backed collaborators for the engine.
//!
//! Implements the core's [`cinder_core::CommandLog`] and
//! [`cinder_core::SnapshotSink`] seams: an append-only log of raw
//! command arrays and a point-in-time snapshot of the keyspace.
//! Both formats carry a magic/version header and CRC32 checksums;
//! snapshot writes land in a temp file and are atomically renamed so a
//! crash never corrupts the previous snapshot.

pub mod aof;
pub mod format;
pub mod snapshot;

pub use aof::{AofLog, FsyncPolicy};
pub use format::FormatError;
pub use snapshot::{SnapshotData, SnapshotStore};
