//! Incremental RESP2 parser.
//!
//! Operates on buffered byte slices. The caller is responsible for
//! reading data from the network into a buffer — this parser is purely
//! synchronous. A short buffer yields `Ok(None)` so the caller can read
//! more data and retry.
//!
//! Two entry points:
//!
//! - [`decode_command`] parses a client request (an array of bulk
//!   strings) into a `Vec<String>` of command tokens.
//! - [`parse_reply`] parses any server reply frame. Used by the
//!   integration tests and the embedded client path.

use std::io::Cursor;

use bytes::Bytes;

use crate::error::ProtocolError;
use crate::types::Reply;

/// Maximum number of elements in a command array. Prevents memory
/// amplification from a tiny declared-huge header.
const MAX_ARRAY_ELEMENTS: usize = 1_048_576;

/// Maximum nesting depth for reply arrays. Prevents stack overflow
/// from malformed deeply-nested frames.
const MAX_NESTING_DEPTH: usize = 64;

/// Maximum length of a bulk string in bytes (512 MB, matching Redis).
const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;

/// Cap for `Vec::with_capacity` when parsing arrays. Lets the Vec grow
/// organically instead of trusting a hostile element count.
const PREALLOC_CAP: usize = 1024;

/// Parses one complete client command from `buf`.
///
/// Returns `Ok(Some((tokens, consumed)))` when a full array of bulk
/// strings was parsed, `Ok(None)` when the buffer doesn't contain a
/// complete command yet, or an error for malformed input.
pub fn decode_command(buf: &[u8]) -> Result<Option<(Vec<String>, usize)>, ProtocolError> {
    if buf.is_empty() {
        return Ok(None);
    }

    let mut cursor = Cursor::new(buf);

    let prefix = match read_byte(&mut cursor) {
        Ok(b) => b,
        Err(Incomplete) => return Ok(None),
    };
    if prefix != b'*' {
        return Err(ProtocolError::InvalidPrefix(prefix));
    }

    let count = match read_integer_line(&mut cursor) {
        Ok(Ok(n)) => n,
        Ok(Err(e)) => return Err(e),
        Err(Incomplete) => return Ok(None),
    };
    if count < 0 || count as usize > MAX_ARRAY_ELEMENTS {
        return Err(ProtocolError::InvalidFrameLength(count));
    }

    let mut tokens = Vec::with_capacity((count as usize).min(PREALLOC_CAP));
    for _ in 0..count {
        match parse_string_element(&mut cursor) {
            Ok(Ok(s)) => tokens.push(s),
            Ok(Err(e)) => return Err(e),
            Err(Incomplete) => return Ok(None),
        }
    }

    Ok(Some((tokens, cursor.position() as usize)))
}

/// Parses one complete server reply from `buf`.
///
/// Returns `Ok(Some((reply, consumed)))`, `Ok(None)` on a short buffer,
/// or an error for malformed input.
pub fn parse_reply(buf: &[u8]) -> Result<Option<(Reply, usize)>, ProtocolError> {
    if buf.is_empty() {
        return Ok(None);
    }
    let mut cursor = Cursor::new(buf);
    match try_parse_reply(&mut cursor, 0) {
        Ok(Ok(reply)) => Ok(Some((reply, cursor.position() as usize))),
        Ok(Err(e)) => Err(e),
        Err(Incomplete) => Ok(None),
    }
}

// ---------------------------------------------------------------------------
// internals
// ---------------------------------------------------------------------------

/// Marker for "the buffer ends before the frame does".
///
/// Kept separate from [`ProtocolError`] so short reads can't be confused
/// with malformed input: the public entry points translate it to `Ok(None)`.
struct Incomplete;

type ParseStep<T> = Result<Result<T, ProtocolError>, Incomplete>;

fn try_parse_reply(cursor: &mut Cursor<&[u8]>, depth: usize) -> ParseStep<Reply> {
    let prefix = read_byte(cursor)?;
    if depth > MAX_NESTING_DEPTH {
        return Ok(Err(ProtocolError::InvalidFrameLength(depth as i64)));
    }
    match prefix {
        b'+' => {
            let line = match read_line(cursor)? {
                Ok(l) => l,
                Err(e) => return Ok(Err(e)),
            };
            Ok(utf8(line).map(Reply::Simple))
        }
        b'-' => {
            let line = match read_line(cursor)? {
                Ok(l) => l,
                Err(e) => return Ok(Err(e)),
            };
            Ok(utf8(line).map(Reply::Error))
        }
        b':' => {
            let val = match read_integer_line(cursor)? {
                Ok(v) => v,
                Err(e) => return Ok(Err(e)),
            };
            Ok(Ok(Reply::Integer(val)))
        }
        b'$' => {
            let len = match read_integer_line(cursor)? {
                Ok(v) => v,
                Err(e) => return Ok(Err(e)),
            };
            if len == -1 {
                return Ok(Ok(Reply::Null));
            }
            match read_bulk_payload(cursor, len)? {
                Ok(data) => Ok(Ok(Reply::Bulk(data))),
                Err(e) => Ok(Err(e)),
            }
        }
        b'*' => {
            let count = match read_integer_line(cursor)? {
                Ok(v) => v,
                Err(e) => return Ok(Err(e)),
            };
            if count == -1 {
                return Ok(Ok(Reply::Null));
            }
            if count < 0 || count as usize > MAX_ARRAY_ELEMENTS {
                return Ok(Err(ProtocolError::InvalidFrameLength(count)));
            }
            let mut items = Vec::with_capacity((count as usize).min(PREALLOC_CAP));
            for _ in 0..count {
                match try_parse_reply(cursor, depth + 1)? {
                    Ok(item) => items.push(item),
                    Err(e) => return Ok(Err(e)),
                }
            }
            Ok(Ok(Reply::Array(items)))
        }
        other => Ok(Err(ProtocolError::InvalidPrefix(other))),
    }
}

/// Parses one command element: a bulk string (or a simple string, which
/// some clients send inline) decoded as UTF-8.
fn parse_string_element(cursor: &mut Cursor<&[u8]>) -> ParseStep<String> {
    let prefix = read_byte(cursor)?;
    match prefix {
        b'$' => {
            let len = match read_integer_line(cursor)? {
                Ok(v) => v,
                Err(e) => return Ok(Err(e)),
            };
            match read_bulk_payload(cursor, len)? {
                Ok(data) => Ok(String::from_utf8(data.to_vec())
                    .map_err(|_| ProtocolError::InvalidUtf8)),
                Err(e) => Ok(Err(e)),
            }
        }
        b'+' => {
            let line = match read_line(cursor)? {
                Ok(l) => l,
                Err(e) => return Ok(Err(e)),
            };
            Ok(utf8(line))
        }
        _ => Ok(Err(ProtocolError::NonStringElement)),
    }
}

fn read_bulk_payload(cursor: &mut Cursor<&[u8]>, len: i64) -> ParseStep<Bytes> {
    if len < 0 || len > MAX_BULK_LEN {
        return Ok(Err(ProtocolError::InvalidFrameLength(len)));
    }
    let len = len as usize;

    let pos = cursor.position() as usize;
    let buf = *cursor.get_ref();
    // need `len` bytes of data + \r\n
    if buf.len() - pos < len + 2 {
        return Err(Incomplete);
    }
    if buf[pos + len] != b'\r' || buf[pos + len + 1] != b'\n' {
        return Ok(Err(ProtocolError::InvalidFrameLength(len as i64)));
    }
    let data = Bytes::copy_from_slice(&buf[pos..pos + len]);
    cursor.set_position((pos + len + 2) as u64);
    Ok(Ok(data))
}

fn read_byte(cursor: &mut Cursor<&[u8]>) -> Result<u8, Incomplete> {
    let pos = cursor.position() as usize;
    let buf = *cursor.get_ref();
    if pos >= buf.len() {
        return Err(Incomplete);
    }
    cursor.set_position((pos + 1) as u64);
    Ok(buf[pos])
}

/// Reads up to (not including) the next `\r\n`, advancing past it.
///
/// The scan jumps between `\r` candidates with `memchr` — SIMD-width
/// strides instead of one byte per step — and verifies `\n` follows.
/// A bare `\r` inside the line is skipped and the scan continues.
fn read_line<'a>(cursor: &mut Cursor<&'a [u8]>) -> ParseStep<&'a [u8]> {
    let start = cursor.position() as usize;
    let buf = *cursor.get_ref();
    let mut pos = start;
    while let Some(offset) = memchr::memchr(b'\r', &buf[pos..]) {
        let cr = pos + offset;
        if cr + 1 >= buf.len() {
            // \r at the buffer edge: can't see whether \n follows yet
            break;
        }
        if buf[cr + 1] == b'\n' {
            cursor.set_position((cr + 2) as u64);
            return Ok(Ok(&buf[start..cr]));
        }
        pos = cr + 1;
    }
    Err(Incomplete)
}

fn read_integer_line(cursor: &mut Cursor<&[u8]>) -> ParseStep<i64> {
    let line = match read_line(cursor)? {
        Ok(l) => l,
        Err(e) => return Ok(Err(e)),
    };
    let s = match std::str::from_utf8(line) {
        Ok(s) => s,
        Err(_) => return Ok(Err(ProtocolError::InvalidInteger)),
    };
    Ok(s.parse::<i64>().map_err(|_| ProtocolError::InvalidInteger))
}

fn utf8(line: &[u8]) -> Result<String, ProtocolError> {
    std::str::from_utf8(line)
        .map(|s| s.to_owned())
        .map_err(|_| ProtocolError::InvalidUtf8)
}
