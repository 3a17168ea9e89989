//! Value payloads stored in the keyspace.
//!
//! The engine treats values as opaque: it only ever compares expiry
//! timestamps. Handlers decide what the payload means. Additional data
//! types plug in as new variants alongside their command modules.

use bytes::Bytes;

/// A stored payload.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Value {
    /// A binary-safe string — also the carrier for integers-in-strings
    /// manipulated by INCR/DECR.
    String(Bytes),
}

impl Value {
    /// Builds a string value from anything byte-like.
    pub fn string(data: impl Into<Bytes>) -> Value {
        Value::String(data.into())
    }

    /// The raw bytes of a string value.
    pub fn as_bytes(&self) -> &Bytes {
        match self {
            Value::String(data) => data,
        }
    }

    /// Interprets a string value as a signed 64-bit integer.
    ///
    /// Returns `None` when the payload is not valid UTF-8 or not a
    /// well-formed integer.
    pub fn as_i64(&self) -> Option<i64> {
        let s = std::str::from_utf8(self.as_bytes()).ok()?;
        s.parse::<i64>().ok()
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(Bytes::from(s.into_bytes()))
    }
}
