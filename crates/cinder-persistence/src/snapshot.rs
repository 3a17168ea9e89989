//! Point-in-time snapshot files.
//!
//! A snapshot stores the full keyspace state plus the timestamp it was
//! taken at. Writes go to a `.tmp` file and are atomically renamed, so
//! a crashed snapshot never corrupts the previous one.
//!
//! File layout:
//! ```text
//! [CSNP magic: 4B][version: 1B]
//! [taken_at_ms: 8B][entry_count: 4B]
//! ([key][value][expire_ms: 8B])*      # key/value are length-prefixed
//! [crc32 over all entry bytes: 4B]
//! ```
//!
//! `expire_ms` is the absolute expiry in unix ms, or -1 for none.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use bytes::Bytes;

use cinder_core::{PersistedEntry, SnapshotSink, Value};

use crate::format::{self, FormatError};

/// File name of the snapshot inside the data directory.
const SNAPSHOT_FILE: &str = "cinder.snap";

/// A loaded snapshot: the state map and when it was taken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotData {
    pub entries: Vec<PersistedEntry>,
    pub taken_at_ms: i64,
}

/// Snapshot writer/loader rooted in a data directory.
pub struct SnapshotStore {
    path: PathBuf,
    change_count: AtomicU64,
    latest_ms: AtomicI64,
}

impl SnapshotStore {
    /// Opens the store in `dir`, creating the directory if needed and
    /// picking up the timestamp of an existing snapshot.
    pub fn open(dir: impl AsRef<Path>) -> io::Result<Self> {
        fs::create_dir_all(dir.as_ref())?;
        let path = dir.as_ref().join(SNAPSHOT_FILE);
        let latest = match Self::load_file(&path) {
            Ok(Some(data)) => data.taken_at_ms,
            _ => 0,
        };
        Ok(Self {
            path,
            change_count: AtomicU64::new(0),
            latest_ms: AtomicI64::new(latest),
        })
    }

    /// Number of keyspace changes recorded since the last snapshot.
    pub fn change_count(&self) -> u64 {
        self.change_count.load(Ordering::Relaxed)
    }

    /// Loads the current snapshot, or `None` when none exists.
    pub fn load(&self) -> Result<Option<SnapshotData>, FormatError> {
        Self::load_file(&self.path)
    }

    fn load_file(path: &Path) -> Result<Option<SnapshotData>, FormatError> {
        let handle = match File::open(path) {
            Ok(h) => h,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut reader = BufReader::new(handle);
        format::read_header(&mut reader, format::SNAP_MAGIC)?;
        let taken_at_ms = format::read_i64(&mut reader)?;
        let count = format::read_u32(&mut reader)?;

        let mut hasher = crc32fast::Hasher::new();
        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let key_bytes = format::read_bytes(&mut reader)?;
            let value_bytes = format::read_bytes(&mut reader)?;
            let expire_ms = format::read_i64(&mut reader)?;

            hash_entry(&mut hasher, &key_bytes, &value_bytes, expire_ms);

            let key = String::from_utf8(key_bytes).map_err(|_| {
                FormatError::Io(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "snapshot key is not valid utf-8",
                ))
            })?;
            entries.push(PersistedEntry {
                key,
                value: Value::String(Bytes::from(value_bytes)),
                expire_at_ms: (expire_ms >= 0).then_some(expire_ms),
            });
        }

        let stored_crc = format::read_u32(&mut reader)?;
        if hasher.finalize() != stored_crc {
            return Err(FormatError::ChecksumMismatch);
        }
        Ok(Some(SnapshotData {
            entries,
            taken_at_ms,
        }))
    }

    fn write_snapshot(&self, state: &[PersistedEntry], now_ms: i64) -> io::Result<()> {
        let tmp_path = self.path.with_extension("snap.tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp_path)?);
            format::write_header(&mut writer, format::SNAP_MAGIC)?;
            format::write_i64(&mut writer, now_ms)?;
            format::write_u32(&mut writer, state.len() as u32)?;

            let mut hasher = crc32fast::Hasher::new();
            for entry in state {
                let value_bytes = entry.value.as_bytes();
                let expire_ms = entry.expire_at_ms.unwrap_or(-1);
                format::write_bytes(&mut writer, entry.key.as_bytes())?;
                format::write_bytes(&mut writer, value_bytes)?;
                format::write_i64(&mut writer, expire_ms)?;
                hash_entry(&mut hasher, entry.key.as_bytes(), value_bytes, expire_ms);
            }
            format::write_u32(&mut writer, hasher.finalize())?;
            writer.flush()?;
            writer.get_ref().sync_data()?;
        }
        fs::rename(&tmp_path, &self.path)
    }
}

fn hash_entry(hasher: &mut crc32fast::Hasher, key: &[u8], value: &[u8], expire_ms: i64) {
    hasher.update(key);
    hasher.update(value);
    hasher.update(&expire_ms.to_le_bytes());
}

impl SnapshotSink for SnapshotStore {
    fn record_change(&self) {
        self.change_count.fetch_add(1, Ordering::Relaxed);
    }

    fn take(&self, state: Vec<PersistedEntry>, now_ms: i64) -> io::Result<()> {
        self.write_snapshot(&state, now_ms)?;
        self.latest_ms.store(now_ms, Ordering::Release);
        self.change_count.store(0, Ordering::Relaxed);
        Ok(())
    }

    fn latest_snapshot_ms(&self) -> i64 {
        self.latest_ms.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(key: &str, value: &str, expire_at_ms: Option<i64>) -> PersistedEntry {
        PersistedEntry {
            key: key.into(),
            value: Value::from(value),
            expire_at_ms,
        }
    }

    #[test]
    fn empty_store_has_no_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::open(dir.path()).unwrap();
        assert_eq!(store.load().unwrap(), None);
        assert_eq!(store.latest_snapshot_ms(), 0);
    }

    #[test]
    fn take_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::open(dir.path()).unwrap();

        let state = vec![
            entry("plain", "value", None),
            entry("volatile", "other", Some(90_000)),
        ];
        store.take(state.clone(), 42_000).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.taken_at_ms, 42_000);
        assert_eq!(loaded.entries, state);
        assert_eq!(store.latest_snapshot_ms(), 42_000);
    }

    #[test]
    fn reopen_recovers_latest_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = SnapshotStore::open(dir.path()).unwrap();
            store.take(vec![entry("k", "v", None)], 7_000).unwrap();
        }
        let reopened = SnapshotStore::open(dir.path()).unwrap();
        assert_eq!(reopened.latest_snapshot_ms(), 7_000);
    }

    #[test]
    fn change_count_resets_on_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::open(dir.path()).unwrap();
        store.record_change();
        store.record_change();
        assert_eq!(store.change_count(), 2);

        store.take(Vec::new(), 1_000).unwrap();
        assert_eq!(store.change_count(), 0);
    }

    #[test]
    fn corrupt_snapshot_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::open(dir.path()).unwrap();
        store.take(vec![entry("k", "value", None)], 1_000).unwrap();

        let path = dir.path().join(SNAPSHOT_FILE);
        let mut bytes = fs::read(&path).unwrap();
        let idx = bytes.len() - 14;
        bytes[idx] ^= 0xff;
        fs::write(&path, &bytes).unwrap();

        let err = store.load().unwrap_err();
        assert!(matches!(err, FormatError::ChecksumMismatch));
    }

    #[test]
    fn no_temp_file_left_after_take() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::open(dir.path()).unwrap();
        store.take(vec![entry("k", "v", None)], 1_000).unwrap();
        assert!(!dir.path().join("cinder.snap.tmp").exists());
    }
}
