//! Access-control collaborator seam.
//!
//! Rule evaluation lives outside the core; the dispatcher only asks a
//! yes/no question per command. The key-extraction callback on each
//! command descriptor supplies the channels and read/write key sets an
//! implementation needs to make that call.

use crate::context::ClientHandle;
use crate::error::AclError;
use crate::registry::{CommandSpec, SubCommandSpec};

/// Authorizes client connections against loaded ACL rules.
pub trait Acl: Send + Sync {
    /// Returns `Ok(())` when `conn` may run `cmd`. The resolved command
    /// descriptor (and sub-command, when one matched) are provided so
    /// implementations can consult categories and extracted keys.
    fn authorize(
        &self,
        conn: &ClientHandle,
        cmd: &[String],
        command: &CommandSpec,
        sub: Option<&SubCommandSpec>,
    ) -> Result<(), AclError>;
}
