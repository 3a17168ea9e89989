//! Server reply frames for the RESP2 protocol.

use bytes::Bytes;

/// A server reply, covering the six RESP2 reply shapes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `+OK\r\n` — a short status line.
    Simple(String),
    /// `-ERR message\r\n` — an error line.
    Error(String),
    /// `:42\r\n` — a signed 64-bit integer.
    Integer(i64),
    /// `$5\r\nhello\r\n` — a binary-safe string.
    Bulk(Bytes),
    /// `*N\r\n...` — an array of replies.
    Array(Vec<Reply>),
    /// `$-1\r\n` — the RESP2 null bulk string.
    Null,
}

impl Reply {
    /// Convenience constructor for the canonical `+OK` reply.
    pub fn ok() -> Reply {
        Reply::Simple("OK".into())
    }

    /// Builds a bulk reply from anything that converts to bytes.
    pub fn bulk(data: impl Into<Bytes>) -> Reply {
        Reply::Bulk(data.into())
    }
}
