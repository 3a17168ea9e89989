//! The engine: command dispatch over the keyspace.
//!
//! [`Engine::handle_command`] is the single entry point for every
//! command — client connections, replayed log records, and replicated
//! envelopes all pass through it. It resolves the command in the plugin
//! registry, authorizes it, serializes writes against state copies, and
//! routes execution locally or through the cluster collaborators.
//!
//! The engine also implements [`Capabilities`], the callback record
//! handed to command handlers; handlers themselves never see the engine.

use std::io;
use std::sync::Arc;

use ahash::AHashMap;
use tracing::debug;

use crate::acl::Acl;
use crate::clock::{Clock, SystemClock};
use crate::cluster::{ApplyRequest, ClusterLinks};
use crate::commands;
use crate::context::{Capabilities, ClientHandle, HandlerContext, SessionContext};
use crate::error::{DispatchError, KeyspaceError, RegistryError};
use crate::persist::{CommandLog, SnapshotSink};
use crate::pubsub::PubSub;
use crate::registry::{CommandRegistry, CommandSpec};
use crate::store::{spawn_touch_worker, Keyspace, KeyspaceConfig, KeyspaceStats};
use crate::types::Value;

/// The reply a follower sends after forwarding a mutation.
const OK_RESPONSE: &[u8] = b"+OK\r\n";

/// Builder for [`Engine`]. Collaborators default to absent; the clock
/// defaults to the system clock.
pub struct EngineBuilder {
    server_id: String,
    keyspace: KeyspaceConfig,
    clock: Arc<dyn Clock>,
    acl: Option<Arc<dyn Acl>>,
    log: Option<Arc<dyn CommandLog>>,
    snapshots: Option<Arc<dyn SnapshotSink>>,
    cluster: Option<Arc<ClusterLinks>>,
    background_touches: bool,
}

impl EngineBuilder {
    pub fn new(server_id: impl Into<String>) -> Self {
        Self {
            server_id: server_id.into(),
            keyspace: KeyspaceConfig::default(),
            clock: Arc::new(SystemClock),
            acl: None,
            log: None,
            snapshots: None,
            cluster: None,
            background_touches: true,
        }
    }

    pub fn keyspace_config(mut self, config: KeyspaceConfig) -> Self {
        self.keyspace = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn acl(mut self, acl: Arc<dyn Acl>) -> Self {
        self.acl = Some(acl);
        self
    }

    pub fn command_log(mut self, log: Arc<dyn CommandLog>) -> Self {
        self.log = Some(log);
        self
    }

    pub fn snapshot_sink(mut self, sink: Arc<dyn SnapshotSink>) -> Self {
        self.snapshots = Some(sink);
        self
    }

    pub fn cluster(mut self, links: Arc<ClusterLinks>) -> Self {
        self.cluster = Some(links);
        self
    }

    /// Applies cache touches synchronously instead of spawning the
    /// background worker. Deterministic mode for tests.
    pub fn synchronous_cache_updates(mut self) -> Self {
        self.background_touches = false;
        self
    }

    pub fn build(self) -> Arc<Engine> {
        let mut keyspace = Keyspace::new(self.keyspace, self.clock.clone());
        if let Some(links) = &self.cluster {
            keyspace.set_cluster(links.clone());
        }
        if let Some(sink) = &self.snapshots {
            keyspace.set_snapshot_sink(sink.clone());
        }
        let keyspace = Arc::new(keyspace);
        if self.background_touches {
            spawn_touch_worker(&keyspace);
        }

        let registry = CommandRegistry::new();
        registry
            .load(commands::connection::commands())
            .expect("built-in connection commands are unique");
        registry
            .load(commands::generic::commands())
            .expect("built-in generic commands are unique");

        Arc::new(Engine {
            server_id: self.server_id,
            keyspace,
            registry,
            pubsub: Arc::new(PubSub::new()),
            acl: self.acl,
            log: self.log,
            snapshots: self.snapshots,
            cluster: self.cluster,
            clock: self.clock,
        })
    }
}

/// The command dispatcher and capability provider.
pub struct Engine {
    server_id: String,
    keyspace: Arc<Keyspace>,
    registry: CommandRegistry,
    pubsub: Arc<PubSub>,
    acl: Option<Arc<dyn Acl>>,
    log: Option<Arc<dyn CommandLog>>,
    snapshots: Option<Arc<dyn SnapshotSink>>,
    cluster: Option<Arc<ClusterLinks>>,
    clock: Arc<dyn Clock>,
}

impl Engine {
    pub fn builder(server_id: impl Into<String>) -> EngineBuilder {
        EngineBuilder::new(server_id)
    }

    /// This node's identity in apply envelopes.
    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    /// Builds the session identity for a connection.
    pub fn session(&self, connection_id: impl Into<String>) -> SessionContext {
        SessionContext::new(self.server_id.clone(), connection_id)
    }

    /// Executes one raw client command and returns the encoded reply.
    ///
    /// `replay` suppresses command-log appending (the record is already
    /// in the log); `embedded` bypasses ACL checks for engine-internal
    /// invocations such as replicated envelopes.
    pub fn handle_command(
        &self,
        ctx: &SessionContext,
        raw: &[u8],
        conn: Option<&ClientHandle>,
        replay: bool,
        embedded: bool,
    ) -> Result<Vec<u8>, DispatchError> {
        let tokens = match cinder_protocol::decode_command(raw)? {
            Some((tokens, _)) => tokens,
            None => return Err(DispatchError::Incomplete),
        };

        if tokens.is_empty() {
            return Err(DispatchError::EmptyCommand);
        }
        if tokens[0].eq_ignore_ascii_case("quit") {
            return Err(DispatchError::EndOfStream);
        }

        let command = self
            .registry
            .resolve(&tokens[0])
            .ok_or_else(|| DispatchError::UnknownCommand(tokens[0].clone()))?;

        // a matching sub-command takes over the handler and sync flag
        let sub = command.sub_for(&tokens).cloned();
        let (synchronize, keys_fn, handler) = match &sub {
            Some(sub) => (sub.sync, sub.keys.clone(), sub.handler.clone()),
            None => (command.sync, command.keys.clone(), command.handler.clone()),
        };

        if let (Some(conn), Some(acl)) = (conn, &self.acl) {
            if !embedded {
                acl.authorize(conn, &tokens, &command, sub.as_ref())?;
            }
        }

        // a command with write keys mutates state: hold the mutation
        // side of the snapshot barrier for the rest of the dispatch
        let is_write = !(*keys_fn)(&tokens)?.write_keys.is_empty();
        let _mutation = is_write.then(|| self.keyspace.barrier().begin_mutation());

        // replayed records (log recovery, replicated envelopes) always
        // execute locally: routing them again would re-replicate
        if self.cluster.is_none() || !synchronize || replay {
            let reply = (*handler)(HandlerContext {
                cmd: &tokens,
                conn,
                session: ctx,
                caps: self,
            })?;

            if is_write && !replay {
                if let Some(log) = &self.log {
                    log.queue(raw);
                }
            }
            return Ok(reply);
        }

        let links = self.cluster.as_ref().expect("checked above");
        if links.is_leader() {
            let req = ApplyRequest::command(ctx, tokens);
            return Ok(links.consensus.apply(ctx, req)?);
        }

        if links.forward_command {
            links.gossip.forward_mutation(ctx, raw);
            debug!("forwarded mutation to leader");
            return Ok(OK_RESPONSE.to_vec());
        }

        Err(DispatchError::NotLeader)
    }

    /// Runs one active-expiration sweep. Called on a timer by the host.
    pub fn sweep_expired(&self) -> usize {
        let ctx = SessionContext::background(self.server_id.clone());
        self.keyspace.sweep_expired(&ctx)
    }

    /// Current keyspace statistics.
    pub fn stats(&self) -> KeyspaceStats {
        self.keyspace.stats()
    }

    /// Restores one entry during recovery.
    pub fn restore(&self, key: String, value: Value, expire_at_ms: Option<i64>) {
        self.keyspace.restore(key, value, expire_at_ms);
    }
}

impl Capabilities for Engine {
    fn keys_exist(&self, keys: &[String]) -> AHashMap<String, bool> {
        self.keyspace.keys_exist(keys)
    }

    fn get_expiry(&self, key: &str) -> Option<i64> {
        self.keyspace.get_expiry(key)
    }

    fn get_keys(&self) -> Vec<String> {
        self.keyspace.get_keys()
    }

    fn get_values(
        &self,
        ctx: &SessionContext,
        keys: &[String],
    ) -> AHashMap<String, Option<Value>> {
        self.keyspace.get_values(ctx, keys)
    }

    fn set_values(
        &self,
        ctx: &SessionContext,
        entries: Vec<(String, Value)>,
    ) -> Result<(), KeyspaceError> {
        self.keyspace.set_values(ctx, entries)
    }

    fn set_expiry(&self, ctx: &SessionContext, key: &str, expire_at_ms: Option<i64>, touch: bool) {
        self.keyspace.set_expiry(ctx, key, expire_at_ms, touch);
    }

    fn delete_key(&self, key: &str) -> bool {
        self.keyspace.delete_key(key)
    }

    fn take_snapshot(&self) -> io::Result<()> {
        let Some(sink) = &self.snapshots else {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "snapshots not configured",
            ));
        };
        let state = self.keyspace.get_state();
        sink.take(state, self.clock.now_ms())
    }

    fn latest_snapshot_ms(&self) -> i64 {
        self.snapshots
            .as_ref()
            .map(|s| s.latest_snapshot_ms())
            .unwrap_or(0)
    }

    fn rewrite_command_log(&self) -> io::Result<()> {
        let Some(log) = &self.log else {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "command log not configured",
            ));
        };
        let state = self.keyspace.get_state();
        log.rewrite(state)
    }

    fn load_extension(&self, commands: Vec<CommandSpec>) -> Result<(), RegistryError> {
        self.registry.load(commands)
    }

    fn unload_extension(&self, module: &str) {
        self.registry.unload_module(module);
    }

    fn list_extensions(&self) -> Vec<String> {
        self.registry.modules()
    }

    fn pubsub(&self) -> Arc<PubSub> {
        self.pubsub.clone()
    }

    fn acl(&self) -> Option<Arc<dyn Acl>> {
        self.acl.clone()
    }

    fn all_commands(&self) -> Vec<CommandSpec> {
        self.registry.all()
    }

    fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }
}
