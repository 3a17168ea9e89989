//! The append-only command log.
//!
//! The dispatcher enqueues raw RESP command arrays after successful
//! writes; a worker thread drains the queue to disk so command latency
//! never includes file I/O. Each record is the raw bytes framed with a
//! length prefix and a CRC32:
//!
//! ```text
//! [CAOF magic: 4B][version: 1B]
//! ([len: 4B][raw command bytes][crc32: 4B])*
//! ```
//!
//! Rewrite compacts the log to the current state: one SET record per
//! key plus a PEXPIREAT record for volatile keys, written to a temp
//! file and atomically renamed.

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::warn;

use cinder_core::{CommandLog, PersistedEntry};
use cinder_protocol::encode_command;

use crate::format::{self, FormatError};

/// Queue depth for pending appends.
const QUEUE_CAPACITY: usize = 4096;

/// Flush cadence for the `EverySec` policy.
const FSYNC_INTERVAL: Duration = Duration::from_secs(1);

/// When to fsync appended records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsyncPolicy {
    /// fsync after every record. Durable and slow.
    Always,
    /// fsync roughly once per second.
    EverySec,
    /// Leave flushing to the OS.
    No,
}

struct AofFile {
    writer: BufWriter<File>,
    path: PathBuf,
    fsync: FsyncPolicy,
}

impl AofFile {
    fn append(&mut self, raw: &[u8]) -> io::Result<()> {
        format::write_bytes(&mut self.writer, raw)?;
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(raw);
        format::write_u32(&mut self.writer, hasher.finalize())?;
        if self.fsync == FsyncPolicy::Always {
            self.writer.flush()?;
            self.writer.get_ref().sync_data()?;
        }
        Ok(())
    }

    fn sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_data()
    }
}

/// The live command log: a bounded queue in front of a worker thread.
pub struct AofLog {
    tx: SyncSender<Vec<u8>>,
    file: Arc<Mutex<AofFile>>,
}

impl AofLog {
    /// Opens (or creates) the log at `path` and starts the drain worker.
    pub fn open(path: impl Into<PathBuf>, fsync: FsyncPolicy) -> io::Result<Arc<Self>> {
        let path = path.into();
        let mut handle = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        if handle.seek(io::SeekFrom::End(0))? == 0 {
            format::write_header(&mut handle, format::AOF_MAGIC)?;
            handle.sync_data()?;
        }

        let file = Arc::new(Mutex::new(AofFile {
            writer: BufWriter::new(handle),
            path: path.clone(),
            fsync,
        }));

        let (tx, rx) = mpsc::sync_channel::<Vec<u8>>(QUEUE_CAPACITY);
        let worker_file = file.clone();
        std::thread::Builder::new()
            .name("cinder-aof".into())
            .spawn(move || loop {
                match rx.recv_timeout(FSYNC_INTERVAL) {
                    Ok(raw) => {
                        let mut file = worker_file.lock().unwrap();
                        if let Err(e) = file.append(&raw) {
                            warn!("aof append failed: {e}");
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => {
                        let mut file = worker_file.lock().unwrap();
                        if file.fsync == FsyncPolicy::EverySec {
                            if let Err(e) = file.sync() {
                                warn!("aof sync failed: {e}");
                            }
                        }
                    }
                    Err(RecvTimeoutError::Disconnected) => {
                        let mut file = worker_file.lock().unwrap();
                        if let Err(e) = file.sync() {
                            warn!("final aof sync failed: {e}");
                        }
                        return;
                    }
                }
            })?;

        Ok(Arc::new(Self { tx, file }))
    }

    /// Reads every record from a log file. A checksum mismatch or torn
    /// record aborts the read — replay must not continue past corrupt
    /// history.
    pub fn read_records(path: &Path) -> Result<Vec<Vec<u8>>, FormatError> {
        let handle = match File::open(path) {
            Ok(h) => h,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut reader = BufReader::new(handle);
        format::read_header(&mut reader, format::AOF_MAGIC)?;

        let mut records = Vec::new();
        loop {
            let raw = match format::read_bytes(&mut reader) {
                Ok(raw) => raw,
                Err(FormatError::Io(e)) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            };
            let stored_crc = format::read_u32(&mut reader)?;
            let mut hasher = crc32fast::Hasher::new();
            hasher.update(&raw);
            if hasher.finalize() != stored_crc {
                return Err(FormatError::ChecksumMismatch);
            }
            records.push(raw);
        }
        Ok(records)
    }

    /// Flushes any queued records that have already been drained and
    /// syncs the file. Queued-but-undrained records are not waited for.
    pub fn sync(&self) -> io::Result<()> {
        self.file.lock().unwrap().sync()
    }

    fn rewrite_to_state(&self, state: Vec<PersistedEntry>) -> io::Result<()> {
        let mut file = self.file.lock().unwrap();
        let tmp_path = file.path.with_extension("aof.tmp");

        {
            let mut tmp = BufWriter::new(File::create(&tmp_path)?);
            format::write_header(&mut tmp, format::AOF_MAGIC)?;
            for entry in &state {
                let value = String::from_utf8_lossy(entry.value.as_bytes()).into_owned();
                write_record(
                    &mut tmp,
                    &encode_command(&["SET".to_string(), entry.key.clone(), value]),
                )?;
                if let Some(at) = entry.expire_at_ms {
                    write_record(
                        &mut tmp,
                        &encode_command(&[
                            "PEXPIREAT".to_string(),
                            entry.key.clone(),
                            at.to_string(),
                        ]),
                    )?;
                }
            }
            tmp.flush()?;
            tmp.get_ref().sync_data()?;
        }

        std::fs::rename(&tmp_path, &file.path)?;

        // swap the writer onto the compacted file
        let handle = OpenOptions::new().append(true).open(&file.path)?;
        file.writer = BufWriter::new(handle);
        Ok(())
    }
}

fn write_record(w: &mut impl Write, raw: &[u8]) -> io::Result<()> {
    format::write_bytes(w, raw)?;
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(raw);
    format::write_u32(w, hasher.finalize())
}

impl CommandLog for AofLog {
    fn queue(&self, raw: &[u8]) {
        // non-blocking: a full queue drops the record rather than
        // stalling the dispatcher
        if self.tx.try_send(raw.to_vec()).is_err() {
            warn!("aof queue full, dropping record");
        }
    }

    fn rewrite(&self, state: Vec<PersistedEntry>) -> io::Result<()> {
        self.rewrite_to_state(state)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use cinder_core::Value;

    fn raw_set(key: &str, value: &str) -> Vec<u8> {
        encode_command(&["SET".to_string(), key.to_string(), value.to_string()])
    }

    #[test]
    fn queued_records_reach_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.aof");
        let log = AofLog::open(&path, FsyncPolicy::No).unwrap();

        log.queue(&raw_set("a", "1"));
        log.queue(&raw_set("b", "2"));

        // the worker drains asynchronously — poll until both land
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            log.sync().unwrap();
            let records = AofLog::read_records(&path).unwrap();
            if records.len() == 2 {
                assert_eq!(records[0], raw_set("a", "1"));
                assert_eq!(records[1], raw_set("b", "2"));
                break;
            }
            assert!(Instant::now() < deadline, "records never drained");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn missing_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let records = AofLog::read_records(&dir.path().join("absent.aof")).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn corrupt_record_aborts_replay() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corrupt.aof");
        {
            let log = AofLog::open(&path, FsyncPolicy::No).unwrap();
            log.queue(&raw_set("a", "1"));
            let deadline = Instant::now() + Duration::from_secs(2);
            loop {
                log.sync().unwrap();
                if AofLog::read_records(&path).unwrap().len() == 1 {
                    break;
                }
                assert!(Instant::now() < deadline);
                std::thread::sleep(Duration::from_millis(5));
            }
        }
        // flip a payload byte past the header and length prefix
        let mut bytes = std::fs::read(&path).unwrap();
        let idx = bytes.len() - 6;
        bytes[idx] ^= 0xff;
        std::fs::write(&path, &bytes).unwrap();

        let err = AofLog::read_records(&path).unwrap_err();
        assert!(matches!(err, FormatError::ChecksumMismatch));
    }

    #[test]
    fn rewrite_compacts_to_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rewrite.aof");
        let log = AofLog::open(&path, FsyncPolicy::No).unwrap();

        let state = vec![
            PersistedEntry {
                key: "plain".into(),
                value: Value::from("v"),
                expire_at_ms: None,
            },
            PersistedEntry {
                key: "volatile".into(),
                value: Value::from("w"),
                expire_at_ms: Some(99_000),
            },
        ];
        log.rewrite(state).unwrap();

        let records = AofLog::read_records(&path).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0], raw_set("plain", "v"));
        assert_eq!(records[1], raw_set("volatile", "w"));
        assert_eq!(
            records[2],
            encode_command(&[
                "PEXPIREAT".to_string(),
                "volatile".to_string(),
                "99000".to_string()
            ])
        );
        // no temp file left behind
        assert!(!path.with_extension("aof.tmp").exists());
    }

    #[test]
    fn append_resumes_after_rewrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("resume.aof");
        let log = AofLog::open(&path, FsyncPolicy::No).unwrap();

        log.rewrite(vec![PersistedEntry {
            key: "k".into(),
            value: Value::from("v"),
            expire_at_ms: None,
        }])
        .unwrap();
        log.queue(&raw_set("k2", "v2"));

        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            log.sync().unwrap();
            let records = AofLog::read_records(&path).unwrap();
            if records.len() == 2 {
                assert_eq!(records[1], raw_set("k2", "v2"));
                break;
            }
            assert!(Instant::now() < deadline, "append after rewrite never landed");
            std::thread::sleep(Duration::from_millis(5));
        }
    }
}
