//! Direct-to-buffer RESP2 serialization.
//!
//! Replies and re-encoded commands share three primitives — a
//! CRLF-terminated header line, a decimal header, and a length-prefixed
//! bulk payload — written straight into a `BytesMut` with no
//! intermediate allocations. Integer formatting goes through `itoa`.

use bytes::BufMut;
use bytes::BytesMut;

use crate::types::Reply;

const CRLF: &[u8] = b"\r\n";

/// The RESP2 null bulk string.
const NULL_BULK: &[u8] = b"$-1\r\n";

/// Writes `<prefix><text>\r\n`.
fn put_line(dst: &mut BytesMut, prefix: u8, text: &[u8]) {
    dst.reserve(text.len() + 3);
    dst.put_u8(prefix);
    dst.put_slice(text);
    dst.put_slice(CRLF);
}

/// Writes `<prefix><decimal>\r\n` — the header form shared by integers,
/// bulk lengths, and array counts.
fn put_decimal_line(dst: &mut BytesMut, prefix: u8, val: i64) {
    let mut digits = itoa::Buffer::new();
    put_line(dst, prefix, digits.format(val).as_bytes());
}

/// Writes a complete bulk string: length header, payload, terminator.
fn put_bulk(dst: &mut BytesMut, data: &[u8]) {
    put_decimal_line(dst, b'$', data.len() as i64);
    dst.reserve(data.len() + 2);
    dst.put_slice(data);
    dst.put_slice(CRLF);
}

impl Reply {
    /// Serializes this reply into the provided buffer, including type
    /// prefix and trailing `\r\n` delimiters.
    pub fn serialize(&self, dst: &mut BytesMut) {
        match self {
            Reply::Simple(s) => put_line(dst, b'+', s.as_bytes()),
            Reply::Error(msg) => put_line(dst, b'-', msg.as_bytes()),
            Reply::Integer(n) => put_decimal_line(dst, b':', *n),
            Reply::Bulk(data) => put_bulk(dst, data),
            Reply::Array(items) => {
                put_decimal_line(dst, b'*', items.len() as i64);
                for item in items {
                    item.serialize(dst);
                }
            }
            Reply::Null => dst.put_slice(NULL_BULK),
        }
    }

    /// Serializes into a standalone byte vector.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        self.serialize(&mut buf);
        buf.to_vec()
    }
}

/// Re-encodes command tokens as a RESP2 array of bulk strings.
///
/// The dispatcher logs raw request bytes, but replicated and replayed
/// commands travel as token vectors and need to be put back on the wire.
pub fn encode_command(tokens: &[String]) -> Vec<u8> {
    let mut buf = BytesMut::new();
    put_decimal_line(&mut buf, b'*', tokens.len() as i64);
    for token in tokens {
        put_bulk(&mut buf, token.as_bytes());
    }
    buf.to_vec()
}
