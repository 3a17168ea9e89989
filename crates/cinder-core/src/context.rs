//! The capability context handed to command handlers.
//!
//! Handlers never hold a reference to the engine. They receive a
//! [`HandlerContext`] carrying the decoded tokens, the client
//! connection handle, the session identity, and a [`Capabilities`]
//! trait object — the record of callbacks into the keyspace and its
//! collaborators. This keeps loaded modules free of engine back-
//! references and makes every handler unit-testable against a mock.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ahash::AHashMap;

use crate::acl::Acl;
use crate::clock::Clock;
use crate::error::{KeyspaceError, RegistryError};
use crate::pubsub::PubSub;
use crate::registry::CommandSpec;
use crate::types::Value;

/// Cooperative cancellation signal for a session.
///
/// Local store mutations are short and non-cancellable; the token is
/// honored only by operations that actually suspend, such as a
/// consensus apply waiting on the cluster. Clones share the flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signals cancellation to every clone of this token.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Identity of the session a command executes under. Carried into the
/// cluster apply envelope for replicated mutations, together with the
/// session's cancellation token.
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    pub server_id: String,
    pub connection_id: String,
    pub cancel: CancelToken,
}

impl SessionContext {
    pub fn new(server_id: impl Into<String>, connection_id: impl Into<String>) -> Self {
        Self {
            server_id: server_id.into(),
            connection_id: connection_id.into(),
            cancel: CancelToken::new(),
        }
    }

    /// Session identity for engine-internal work (sampler, governor,
    /// replay) that has no originating connection.
    pub fn background(server_id: impl Into<String>) -> Self {
        Self::new(server_id, "")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_is_shared_across_clones() {
        let ctx = SessionContext::new("s", "c");
        let clone = ctx.clone();
        assert!(!clone.cancel.is_cancelled());
        ctx.cancel.cancel();
        assert!(clone.cancel.is_cancelled());
    }
}

/// The client connection a command arrived on. Read-only for handlers —
/// they return reply bytes rather than writing to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHandle {
    pub id: u64,
    pub peer_addr: String,
}

/// The callback surface available to command handlers.
pub trait Capabilities: Send + Sync {
    /// Which of `keys` exist (expired entries count as absent).
    fn keys_exist(&self, keys: &[String]) -> AHashMap<String, bool>;

    /// Absolute expiry of `key` in unix ms; `None` when the key is
    /// missing or carries no expiry.
    fn get_expiry(&self, key: &str) -> Option<i64>;

    /// Every live key in the store.
    fn get_keys(&self) -> Vec<String>;

    /// Values for `keys`, with lazy expiry applied. Missing and expired
    /// keys yield `None`.
    fn get_values(
        &self,
        ctx: &SessionContext,
        keys: &[String],
    ) -> AHashMap<String, Option<Value>>;

    /// Inserts or replaces entries, preserving existing expiries.
    fn set_values(
        &self,
        ctx: &SessionContext,
        entries: Vec<(String, Value)>,
    ) -> Result<(), KeyspaceError>;

    /// Rewrites a key's expiry, keeping its value. `touch` additionally
    /// schedules an eviction-cache update for the key.
    fn set_expiry(&self, ctx: &SessionContext, key: &str, expire_at_ms: Option<i64>, touch: bool);

    /// Deletes a key from the store, the volatile index, and the active
    /// eviction cache. Returns whether the key existed.
    fn delete_key(&self, key: &str) -> bool;

    /// Triggers a point-in-time snapshot.
    fn take_snapshot(&self) -> io::Result<()>;

    /// Timestamp of the latest snapshot in unix ms, or 0.
    fn latest_snapshot_ms(&self) -> i64;

    /// Triggers a compaction of the append-only command log.
    fn rewrite_command_log(&self) -> io::Result<()>;

    /// Loads a command module at runtime.
    fn load_extension(&self, commands: Vec<CommandSpec>) -> Result<(), RegistryError>;

    /// Unloads every command belonging to `module`.
    fn unload_extension(&self, module: &str);

    /// Distinct module tags currently loaded.
    fn list_extensions(&self) -> Vec<String>;

    /// The pub/sub fan-out.
    fn pubsub(&self) -> Arc<PubSub>;

    /// The ACL collaborator, when configured.
    fn acl(&self) -> Option<Arc<dyn Acl>>;

    /// Every loaded command descriptor.
    fn all_commands(&self) -> Vec<CommandSpec>;

    /// The engine clock. Handlers use this instead of the system time
    /// so tests can inject a manual clock.
    fn clock(&self) -> Arc<dyn Clock>;
}

/// Everything a handler invocation receives.
pub struct HandlerContext<'a> {
    /// The decoded command tokens, e.g. `["SET", "key", "value"]`.
    pub cmd: &'a [String],
    /// The originating connection, absent for replayed and internal
    /// commands.
    pub conn: Option<&'a ClientHandle>,
    /// Session identity for replication envelopes.
    pub session: &'a SessionContext,
    /// The capability record.
    pub caps: &'a dyn Capabilities,
}
