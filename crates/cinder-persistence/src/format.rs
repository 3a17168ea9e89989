//! Shared binary framing for persistence files.
//!
//! File layout:
//! ```text
//! [magic: 4B][version: 1B]
//! [payload...]
//! ```
//!
//! All integers are little-endian. Variable-length fields are
//! `u32`-length-prefixed.

use std::io::{self, Read, Write};

use thiserror::Error;

/// Magic for append-only log files.
pub const AOF_MAGIC: [u8; 4] = *b"CAOF";

/// Magic for snapshot files.
pub const SNAP_MAGIC: [u8; 4] = *b"CSNP";

/// Current on-disk format version.
pub const FORMAT_VERSION: u8 = 1;

/// Maximum length accepted for a length-prefixed field (64 MB). Guards
/// against reading a corrupt length and allocating wildly.
const MAX_FIELD_LEN: u32 = 64 * 1024 * 1024;

/// Errors reading or writing persistence files.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error(transparent)]
    Io(#[from] io::Error),

    /// The file doesn't start with the expected magic bytes.
    #[error("bad magic: not a cinder persistence file")]
    BadMagic,

    /// The file was written by an unknown format version.
    #[error("unsupported format version: {0}")]
    UnsupportedVersion(u8),

    /// A record's checksum didn't match its content.
    #[error("checksum mismatch: file is corrupt")]
    ChecksumMismatch,

    /// A declared field length exceeds the sanity limit.
    #[error("field length {0} exceeds limit")]
    FieldTooLarge(u32),
}

impl From<FormatError> for io::Error {
    fn from(e: FormatError) -> Self {
        match e {
            FormatError::Io(io) => io,
            other => io::Error::new(io::ErrorKind::InvalidData, other.to_string()),
        }
    }
}

pub fn write_header(w: &mut impl Write, magic: [u8; 4]) -> io::Result<()> {
    w.write_all(&magic)?;
    w.write_all(&[FORMAT_VERSION])
}

pub fn read_header(r: &mut impl Read, magic: [u8; 4]) -> Result<(), FormatError> {
    let mut buf = [0u8; 5];
    r.read_exact(&mut buf)?;
    if buf[..4] != magic {
        return Err(FormatError::BadMagic);
    }
    if buf[4] != FORMAT_VERSION {
        return Err(FormatError::UnsupportedVersion(buf[4]));
    }
    Ok(())
}

pub fn write_u32(w: &mut impl Write, val: u32) -> io::Result<()> {
    w.write_all(&val.to_le_bytes())
}

pub fn read_u32(r: &mut impl Read) -> Result<u32, FormatError> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

pub fn write_i64(w: &mut impl Write, val: i64) -> io::Result<()> {
    w.write_all(&val.to_le_bytes())
}

pub fn read_i64(r: &mut impl Read) -> Result<i64, FormatError> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(i64::from_le_bytes(buf))
}

/// Writes a `u32`-length-prefixed byte field.
pub fn write_bytes(w: &mut impl Write, data: &[u8]) -> io::Result<()> {
    write_u32(w, data.len() as u32)?;
    w.write_all(data)
}

/// Reads a `u32`-length-prefixed byte field.
pub fn read_bytes(r: &mut impl Read) -> Result<Vec<u8>, FormatError> {
    let len = read_u32(r)?;
    if len > MAX_FIELD_LEN {
        return Err(FormatError::FieldTooLarge(len));
    }
    let mut buf = vec![0u8; len as usize];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn header_round_trip() {
        let mut buf = Vec::new();
        write_header(&mut buf, AOF_MAGIC).unwrap();
        read_header(&mut Cursor::new(&buf), AOF_MAGIC).unwrap();
    }

    #[test]
    fn wrong_magic_is_rejected() {
        let mut buf = Vec::new();
        write_header(&mut buf, AOF_MAGIC).unwrap();
        let err = read_header(&mut Cursor::new(&buf), SNAP_MAGIC).unwrap_err();
        assert!(matches!(err, FormatError::BadMagic));
    }

    #[test]
    fn unknown_version_is_rejected() {
        let buf = [b'C', b'A', b'O', b'F', 99];
        let err = read_header(&mut Cursor::new(&buf[..]), AOF_MAGIC).unwrap_err();
        assert!(matches!(err, FormatError::UnsupportedVersion(99)));
    }

    #[test]
    fn field_round_trip() {
        let mut buf = Vec::new();
        write_bytes(&mut buf, b"payload").unwrap();
        write_i64(&mut buf, -42).unwrap();
        let mut cursor = Cursor::new(&buf);
        assert_eq!(read_bytes(&mut cursor).unwrap(), b"payload");
        assert_eq!(read_i64(&mut cursor).unwrap(), -42);
    }

    #[test]
    fn oversized_field_is_rejected() {
        let mut buf = Vec::new();
        write_u32(&mut buf, u32::MAX).unwrap();
        let err = read_bytes(&mut Cursor::new(&buf)).unwrap_err();
        assert!(matches!(err, FormatError::FieldTooLarge(_)));
    }
}
