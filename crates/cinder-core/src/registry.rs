//! The plugin registry: loaded command definitions.
//!
//! Command modules — built-in or loaded at runtime — contribute lists
//! of [`CommandSpec`] descriptors. Dispatch looks commands up under a
//! read lock; loading and unloading take the write lock.

use std::sync::{Arc, RwLock};

use crate::context::HandlerContext;
use crate::error::{CommandError, RegistryError};

/// Channels and key sets a command touches, extracted from the concrete
/// token array. Consumed by ACL checks and by write detection: a command
/// with non-empty `write_keys` is a write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandKeys {
    pub channels: Vec<String>,
    pub read_keys: Vec<String>,
    pub write_keys: Vec<String>,
}

impl CommandKeys {
    /// A command that touches no keys or channels (PING, ECHO, ...).
    pub fn none() -> Self {
        Self::default()
    }

    pub fn read(keys: Vec<String>) -> Self {
        Self {
            read_keys: keys,
            ..Self::default()
        }
    }

    pub fn write(keys: Vec<String>) -> Self {
        Self {
            write_keys: keys,
            ..Self::default()
        }
    }
}

/// Extracts [`CommandKeys`] from a decoded command. Also the natural
/// place for arity validation, since malformed commands have no
/// meaningful key set.
pub type KeyExtractor = Arc<dyn Fn(&[String]) -> Result<CommandKeys, CommandError> + Send + Sync>;

/// Executes a command and returns the encoded reply bytes.
pub type Handler = Arc<dyn Fn(HandlerContext<'_>) -> Result<Vec<u8>, CommandError> + Send + Sync>;

/// A sub-command descriptor (e.g. `ACL GETUSER`).
#[derive(Clone)]
pub struct SubCommandSpec {
    /// The sub-command keyword at token position 1.
    pub name: String,
    /// ACL categories.
    pub categories: Vec<String>,
    /// Human-readable syntax and description.
    pub description: String,
    /// Whether this sub-command is replicated across the cluster.
    pub sync: bool,
    pub keys: KeyExtractor,
    pub handler: Handler,
}

/// A top-level command descriptor.
#[derive(Clone)]
pub struct CommandSpec {
    /// The command keyword (matched case-insensitively).
    pub name: String,
    /// The module this command belongs to; unloading removes the whole
    /// module's commands.
    pub module: String,
    /// ACL categories.
    pub categories: Vec<String>,
    /// Human-readable syntax and description.
    pub description: String,
    pub sub_commands: Vec<SubCommandSpec>,
    /// Whether this command is replicated across the cluster.
    pub sync: bool,
    pub keys: KeyExtractor,
    pub handler: Handler,
}

impl CommandSpec {
    /// Finds the sub-command matching token position 1, if any.
    pub fn sub_for(&self, cmd: &[String]) -> Option<&SubCommandSpec> {
        let keyword = cmd.get(1)?;
        self.sub_commands
            .iter()
            .find(|sub| sub.name.eq_ignore_ascii_case(keyword))
    }
}

/// Mutable list of loaded command definitions.
#[derive(Default)]
pub struct CommandRegistry {
    commands: RwLock<Vec<CommandSpec>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a command by keyword, case-insensitively. Returns a
    /// clone so dispatch doesn't execute under the registry lock.
    pub fn resolve(&self, keyword: &str) -> Option<CommandSpec> {
        let commands = self.commands.read().unwrap();
        commands
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(keyword))
            .cloned()
    }

    /// Adds a module's commands. Fails without loading anything if any
    /// keyword is already taken.
    pub fn load(&self, specs: Vec<CommandSpec>) -> Result<(), RegistryError> {
        let mut commands = self.commands.write().unwrap();
        for spec in &specs {
            if commands.iter().any(|c| c.name.eq_ignore_ascii_case(&spec.name)) {
                return Err(RegistryError::Duplicate(spec.name.clone()));
            }
        }
        commands.extend(specs);
        Ok(())
    }

    /// Removes every command belonging to `module`.
    pub fn unload_module(&self, module: &str) {
        let mut commands = self.commands.write().unwrap();
        commands.retain(|c| !c.module.eq_ignore_ascii_case(module));
    }

    /// Distinct module tags currently loaded, in load order.
    pub fn modules(&self) -> Vec<String> {
        let commands = self.commands.read().unwrap();
        let mut modules: Vec<String> = Vec::new();
        for command in commands.iter() {
            if !modules.iter().any(|m| m == &command.module) {
                modules.push(command.module.clone());
            }
        }
        modules
    }

    /// Snapshot of every loaded command descriptor.
    pub fn all(&self) -> Vec<CommandSpec> {
        self.commands.read().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.commands.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinder_protocol::Reply;

    fn spec(name: &str, module: &str) -> CommandSpec {
        CommandSpec {
            name: name.into(),
            module: module.into(),
            categories: vec![],
            description: String::new(),
            sub_commands: vec![],
            sync: false,
            keys: Arc::new(|_: &[String]| Ok(CommandKeys::none())),
            handler: Arc::new(|_: HandlerContext<'_>| Ok(Reply::ok().to_bytes())),
        }
    }

    #[test]
    fn resolve_is_case_insensitive() {
        let registry = CommandRegistry::new();
        registry.load(vec![spec("get", "generic")]).unwrap();
        assert!(registry.resolve("GET").is_some());
        assert!(registry.resolve("GeT").is_some());
        assert!(registry.resolve("set").is_none());
    }

    #[test]
    fn duplicate_keyword_is_rejected() {
        let registry = CommandRegistry::new();
        registry.load(vec![spec("get", "generic")]).unwrap();
        let err = registry.load(vec![spec("GET", "other")]).unwrap_err();
        assert_eq!(err, RegistryError::Duplicate("GET".into()));
        // nothing from the failed batch is loaded
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn unload_removes_whole_module() {
        let registry = CommandRegistry::new();
        registry
            .load(vec![spec("get", "generic"), spec("set", "generic")])
            .unwrap();
        registry.load(vec![spec("ping", "connection")]).unwrap();

        registry.unload_module("generic");
        assert!(registry.resolve("get").is_none());
        assert!(registry.resolve("set").is_none());
        assert!(registry.resolve("ping").is_some());
        assert_eq!(registry.modules(), vec!["connection".to_string()]);
    }

    #[test]
    fn sub_command_matches_position_one() {
        let mut command = spec("acl", "admin");
        command.sub_commands.push(SubCommandSpec {
            name: "list".into(),
            categories: vec![],
            description: String::new(),
            sync: false,
            keys: Arc::new(|_: &[String]| Ok(CommandKeys::none())),
            handler: Arc::new(|_: HandlerContext<'_>| Ok(Reply::ok().to_bytes())),
        });

        let cmd = vec!["ACL".to_string(), "LIST".to_string()];
        assert!(command.sub_for(&cmd).is_some());
        let cmd = vec!["ACL".to_string(), "nope".to_string()];
        assert!(command.sub_for(&cmd).is_none());
        let cmd = vec!["ACL".to_string()];
        assert!(command.sub_for(&cmd).is_none());
    }
}
