//! Protocol error types for RESP2 parsing.

use thiserror::Error;

/// Errors that can occur when parsing the RESP2 wire format.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The first byte of a frame didn't match any known RESP2 type prefix.
    #[error("invalid type prefix: {0:#04x}")]
    InvalidPrefix(u8),

    /// Failed to parse an integer value from the frame content.
    #[error("invalid integer encoding")]
    InvalidInteger,

    /// A bulk string or array declared an invalid length.
    #[error("invalid frame length: {0}")]
    InvalidFrameLength(i64),

    /// A command element was not a bulk or simple string.
    #[error("command element is not a string")]
    NonStringElement,

    /// A command element contained bytes that are not valid UTF-8.
    #[error("command element is not valid utf-8")]
    InvalidUtf8,
}
