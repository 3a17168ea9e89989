//! cinder-core: the keyspace engine.
//!
//! Owns the store, the volatile-key index, the eviction caches, memory
//! governance, active TTL sampling, and the command-dispatch path that
//! ties them together. Persistence, consensus, gossip, and ACL are
//! collaborators reached through narrow traits — the engine never
//! depends on their implementations.

pub mod acl;
pub mod barrier;
pub mod cache;
pub mod clock;
pub mod cluster;
pub mod commands;
pub mod context;
pub mod engine;
pub mod error;
pub mod memory;
pub mod persist;
pub mod pubsub;
pub mod registry;
pub mod store;
pub mod types;
pub mod volatile;

pub use acl::Acl;
pub use cache::{AccessHeap, EvictionCache, EvictionPolicy, HeapKind};
pub use clock::{Clock, ManualClock, SystemClock};
pub use cluster::{ApplyKind, ApplyRequest, ClusterLinks, ConsensusApply, Gossip};
pub use context::{CancelToken, Capabilities, ClientHandle, HandlerContext, SessionContext};
pub use engine::{Engine, EngineBuilder};
pub use error::{
    AclError, ClusterError, CommandError, DispatchError, EvictionError, KeyspaceError,
    RegistryError,
};
pub use persist::{CommandLog, PersistedEntry, SnapshotSink};
pub use pubsub::PubSub;
pub use registry::{CommandKeys, CommandRegistry, CommandSpec, SubCommandSpec};
pub use store::{Keyspace, KeyspaceConfig, KeyspaceStats, DEFAULT_EVICTION_SAMPLE};
pub use types::Value;
pub use volatile::VolatileIndex;
