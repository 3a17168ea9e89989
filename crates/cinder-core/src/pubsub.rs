//! Channel fan-out reachable from the capability context.
//!
//! Message delivery is best-effort: a broadcast channel per topic,
//! lagging subscribers lose messages. Command modules that speak the
//! pub/sub surface reach this through their handler context.

use std::sync::Mutex;

use ahash::AHashMap;
use bytes::Bytes;
use tokio::sync::broadcast;

/// Per-channel buffer. Slow subscribers past this depth see `Lagged`.
const CHANNEL_CAPACITY: usize = 256;

/// Topic registry with broadcast fan-out.
#[derive(Debug, Default)]
pub struct PubSub {
    channels: Mutex<AHashMap<String, broadcast::Sender<Bytes>>>,
}

impl PubSub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to a channel, creating it on first use.
    pub fn subscribe(&self, channel: &str) -> broadcast::Receiver<Bytes> {
        let mut channels = self.channels.lock().unwrap();
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Publishes to a channel. Returns the number of subscribers that
    /// received the message.
    pub fn publish(&self, channel: &str, message: Bytes) -> usize {
        let channels = self.channels.lock().unwrap();
        match channels.get(channel) {
            Some(tx) => tx.send(message).unwrap_or(0),
            None => 0,
        }
    }

    /// Drops channels with no remaining subscribers.
    pub fn prune(&self) {
        let mut channels = self.channels.lock().unwrap();
        channels.retain(|_, tx| tx.receiver_count() > 0);
    }
}
