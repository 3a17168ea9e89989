//! Cluster collaborator seams.
//!
//! The engine never talks to a consensus transport or a gossip layer
//! directly — it hands envelopes to these traits. The leader applies
//! replicated mutations through [`ConsensusApply`]; followers forward
//! through [`Gossip`]. Followers receive applied commands from the
//! transport and replay them via
//! `handle_command(.., replay = true, embedded = true)` so the command
//! log is not re-triggered.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::context::SessionContext;
use crate::error::ClusterError;

/// Envelope handed to the consensus-apply collaborator.
///
/// Field names match the wire tags used by peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyRequest {
    #[serde(rename = "Type")]
    pub kind: ApplyKind,
    #[serde(rename = "ServerID")]
    pub server_id: String,
    #[serde(rename = "ConnectionID")]
    pub connection_id: String,
    #[serde(rename = "CMD")]
    pub cmd: Vec<String>,
    #[serde(rename = "Key")]
    pub key: String,
}

/// What a replicated envelope asks the state machine to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApplyKind {
    /// Execute a full client command.
    #[serde(rename = "command")]
    Command,
    /// Delete a single key (expiry and eviction deletions).
    #[serde(rename = "delete-key")]
    DeleteKey,
}

impl ApplyRequest {
    /// Envelope for replicating a client command.
    pub fn command(ctx: &SessionContext, cmd: Vec<String>) -> Self {
        Self {
            kind: ApplyKind::Command,
            server_id: ctx.server_id.clone(),
            connection_id: ctx.connection_id.clone(),
            cmd,
            key: String::new(),
        }
    }

    /// Envelope for replicating a single-key deletion.
    pub fn delete_key(ctx: &SessionContext, key: &str) -> Self {
        Self {
            kind: ApplyKind::DeleteKey,
            server_id: ctx.server_id.clone(),
            connection_id: ctx.connection_id.clone(),
            cmd: Vec::new(),
            key: key.to_string(),
        }
    }
}

/// Entry point that totally orders replicated mutations.
///
/// `apply` must not call back into the store operation that invoked it:
/// lazy-expiry deletions are issued while the store write lock is held.
pub trait ConsensusApply: Send + Sync {
    /// Whether this node currently leads the cluster.
    fn is_leader(&self) -> bool;

    /// Replicates the envelope and returns the reply bytes produced by
    /// the state machine.
    fn apply(&self, ctx: &SessionContext, req: ApplyRequest) -> Result<Vec<u8>, ClusterError>;
}

/// Peer gossip used by followers. Fire-and-forget, at-least-once;
/// there is no response correlation.
pub trait Gossip: Send + Sync {
    /// Forwards a raw client mutation to the leader.
    fn forward_mutation(&self, ctx: &SessionContext, raw: &[u8]);

    /// Forwards a key deletion to the leader. Called for expired keys
    /// even when command forwarding is disabled.
    fn forward_delete_key(&self, ctx: &SessionContext, key: &str);
}

/// The collaborator bundle a clustered node is wired with.
pub struct ClusterLinks {
    pub consensus: Arc<dyn ConsensusApply>,
    pub gossip: Arc<dyn Gossip>,
    /// When `true`, followers forward synced writes to the leader and
    /// answer `+OK` immediately instead of refusing them.
    pub forward_command: bool,
}

impl ClusterLinks {
    pub fn is_leader(&self) -> bool {
        self.consensus.is_leader()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_serializes_with_wire_tags() {
        let ctx = SessionContext::new("server-1", "conn-9");
        let req = ApplyRequest::delete_key(&ctx, "stale");
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"Type\":\"delete-key\""));
        assert!(json.contains("\"ServerID\":\"server-1\""));
        assert!(json.contains("\"ConnectionID\":\"conn-9\""));
        assert!(json.contains("\"Key\":\"stale\""));
    }

    #[test]
    fn envelope_round_trips() {
        let ctx = SessionContext::new("s", "c");
        let req = ApplyRequest::command(&ctx, vec!["SET".into(), "k".into(), "v".into()]);
        let json = serde_json::to_string(&req).unwrap();
        let back: ApplyRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, req);
    }
}
