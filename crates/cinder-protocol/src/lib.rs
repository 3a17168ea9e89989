//! cinder-protocol: RESP2 wire protocol implementation.
//!
//! Provides incremental parsing of client command arrays and
//! direct-to-buffer serialization of server replies.
//!
//! # quick start
//!
//! ```
//! use bytes::BytesMut;
//! use cinder_protocol::{decode_command, encode_command, Reply};
//!
//! // decode a client command array
//! let input = b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n";
//! let (cmd, consumed) = decode_command(input).unwrap().unwrap();
//! assert_eq!(cmd, vec!["GET".to_string(), "foo".to_string()]);
//! assert_eq!(consumed, input.len());
//!
//! // serialize a reply
//! let mut buf = BytesMut::new();
//! Reply::Simple("OK".into()).serialize(&mut buf);
//! assert_eq!(&buf[..], b"+OK\r\n");
//!
//! // re-encode a command for the append log
//! assert_eq!(encode_command(&["GET".into(), "foo".into()]), input);
//! ```

pub mod error;
pub mod parse;
mod serialize;
pub mod types;

pub use error::ProtocolError;
pub use parse::{decode_command, parse_reply};
pub use serialize::encode_command;
pub use types::Reply;
