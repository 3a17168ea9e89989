//! Per-connection command loop.
//!
//! Reads bytes into a buffer, carves out complete RESP command arrays,
//! hands the raw bytes to the dispatcher, and writes the replies back.
//! Commands from one connection execute serially in arrival order.
//! Handler errors become protocol error replies; the end-of-stream
//! sentinel (`quit`) closes the connection.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use cinder_core::{ClientHandle, Engine};
use cinder_protocol::{decode_command, Reply};

/// Initial read buffer capacity per connection.
const BUF_CAPACITY: usize = 16 * 1024;

/// A connection accumulating more than this without completing a
/// command is misbehaving; close it.
const MAX_BUF_SIZE: usize = 64 * 1024 * 1024;

/// Serves one client connection until EOF, `quit`, or an error.
pub async fn handle(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    connection_id: u64,
    engine: Arc<Engine>,
) -> Result<(), Box<dyn std::error::Error>> {
    stream.set_nodelay(true)?;

    let client = ClientHandle {
        id: connection_id,
        peer_addr: peer_addr.to_string(),
    };
    let session = engine.session(connection_id.to_string());

    let mut buf = BytesMut::with_capacity(BUF_CAPACITY);
    let mut out = BytesMut::with_capacity(BUF_CAPACITY);

    loop {
        if stream.read_buf(&mut buf).await? == 0 {
            return Ok(());
        }
        if buf.len() > MAX_BUF_SIZE {
            Reply::Error("max buffer size exceeded, closing connection".into())
                .serialize(&mut out);
            let _ = stream.write_all(&out).await;
            return Ok(());
        }

        out.clear();
        loop {
            let consumed = match decode_command(&buf) {
                Ok(Some((_, consumed))) => consumed,
                Ok(None) => break,
                Err(e) => {
                    Reply::Error(format!("protocol error: {e}")).serialize(&mut out);
                    stream.write_all(&out).await?;
                    return Ok(());
                }
            };
            let raw = buf.split_to(consumed);

            // the engine is synchronous inside; store critical sections
            // are short, but a clustered consensus apply may wait
            let result = tokio::task::block_in_place(|| {
                engine.handle_command(&session, &raw, Some(&client), false, false)
            });

            match result {
                Ok(reply) => out.extend_from_slice(&reply),
                Err(e) if e.is_end_of_stream() => {
                    if !out.is_empty() {
                        stream.write_all(&out).await?;
                    }
                    debug!(%peer_addr, "client quit");
                    return Ok(());
                }
                Err(e) => Reply::Error(e.to_string()).serialize(&mut out),
            }
        }

        if !out.is_empty() {
            stream.write_all(&out).await?;
        }
    }
}
