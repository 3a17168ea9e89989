//! Error types for the core engine.

use thiserror::Error;

use cinder_protocol::ProtocolError;

/// Errors surfaced by command handlers, encoded back to the client as
/// protocol-level error replies.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Arity mismatch for the named command.
    #[error("wrong number of arguments for '{0}' command")]
    WrongArity(String),

    /// Malformed argument, e.g. a non-integer where an integer is required.
    #[error("{0}")]
    Parse(String),

    /// Option conflicts, unknown options, or existence-condition failures.
    #[error("{0}")]
    Semantic(String),

    /// The stored value is not a valid signed 64-bit integer.
    #[error("value is not an integer or out of range")]
    NotAnInteger,

    /// Memory limit reached under the `noeviction` policy.
    #[error("max memory reached, key value not set")]
    MaxMemoryReached,
}

/// Errors returned by keyspace write operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyspaceError {
    /// Memory limit reached under the `noeviction` policy.
    #[error("max memory reached, key value not set")]
    MaxMemoryReached,
}

impl From<KeyspaceError> for CommandError {
    fn from(e: KeyspaceError) -> Self {
        match e {
            KeyspaceError::MaxMemoryReached => CommandError::MaxMemoryReached,
        }
    }
}

/// Errors from the cluster collaborators.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClusterError {
    /// The consensus-apply collaborator rejected or failed the request.
    #[error("consensus apply failed: {0}")]
    Apply(String),
}

/// Errors from the memory governor's eviction loop.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EvictionError {
    /// The active eviction cache ran out of keys before usage dropped
    /// under the limit.
    #[error("eviction cache empty")]
    CacheEmpty,

    /// The eviction source (store or volatile index) has no keys left.
    #[error("no keys to evict")]
    NoKeysToEvict,

    #[error(transparent)]
    Cluster(#[from] ClusterError),
}

/// Errors from the plugin registry.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// A command with this keyword is already loaded.
    #[error("command {0} already loaded")]
    Duplicate(String),
}

/// ACL authorization failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct AclError(pub String);

/// Errors surfaced by [`crate::engine::Engine::handle_command`].
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The decoded request array was empty.
    #[error("empty command")]
    EmptyCommand,

    /// The client sent `quit`; the connection handler should close.
    #[error("end of stream")]
    EndOfStream,

    /// The raw bytes did not contain a complete command array.
    #[error("incomplete command")]
    Incomplete,

    /// No loaded command matches the keyword.
    #[error("command {0} not supported")]
    UnknownCommand(String),

    /// A synced write reached a non-leader with forwarding disabled.
    #[error("not cluster leader, cannot carry out command")]
    NotLeader,

    /// The ACL collaborator denied the connection.
    #[error("{0}")]
    Denied(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Cluster(#[from] ClusterError),
}

impl From<AclError> for DispatchError {
    fn from(e: AclError) -> Self {
        DispatchError::Denied(e.0)
    }
}

impl DispatchError {
    /// Returns `true` for the `quit` sentinel, which is not an error to
    /// report but a signal to close the connection.
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, DispatchError::EndOfStream)
    }
}
