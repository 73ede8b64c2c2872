//! CLI command contributions.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::{scoped_key, validate_local_name};
use crate::error::{BridgeError, BridgeResult};
use crate::permissions::{Permission, PermissionChecker};

/// A CLI command declared by a plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliCommand {
    /// Local command name, unique within the owning plugin.
    pub name: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Alternative names for the command.
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Parent command for subcommand nesting.
    #[serde(default)]
    pub parent: Option<String>,
    /// Tags for filtering.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Explicit sort order within listings.
    #[serde(default)]
    pub order: i64,
    /// Whether the command is deprecated.
    #[serde(default)]
    pub deprecated: bool,
    /// Whether the command is hidden from default listings.
    #[serde(default)]
    pub hidden: bool,
}

impl CliCommand {
    /// Create a command with just a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            aliases: Vec::new(),
            parent: None,
            tags: Vec::new(),
            order: 0,
            deprecated: false,
            hidden: false,
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Add an alias.
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    /// Add a tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Set the sort order.
    pub fn with_order(mut self, order: i64) -> Self {
        self.order = order;
        self
    }
}

/// A command accepted by the registry.
#[derive(Debug, Clone, Serialize)]
pub struct RegisteredCommand {
    /// Owning plugin id (back-reference, not ownership).
    pub plugin_id: String,
    /// Scoped key `"<plugin_id>.<name>"`.
    pub key: String,
    /// The contribution itself.
    pub command: CliCommand,
}

/// Registry of plugin CLI commands.
#[derive(Debug)]
pub struct CliRegistry {
    checker: Arc<PermissionChecker>,
    commands: RwLock<BTreeMap<String, RegisteredCommand>>,
}

impl CliRegistry {
    /// Create an empty registry backed by the given permission checker.
    pub fn new(checker: Arc<PermissionChecker>) -> Self {
        Self {
            checker,
            commands: RwLock::new(BTreeMap::new()),
        }
    }

    /// Register a command for a plugin.
    ///
    /// Fails with `Validation` on a bad or conflicting name and with
    /// `PermissionDenied` when the plugin lacks `register_cli`. Nothing is
    /// registered on failure.
    pub fn register(
        &self,
        plugin_id: &str,
        command: CliCommand,
        check_permissions: bool,
    ) -> BridgeResult<RegisteredCommand> {
        validate_local_name(&command.name)?;
        for alias in &command.aliases {
            validate_local_name(alias)?;
        }

        if check_permissions {
            self.checker.check(plugin_id, Permission::RegisterCli)?;
        }

        let key = scoped_key(plugin_id, &command.name);
        let mut commands = self.commands.write();
        if commands.contains_key(&key) {
            return Err(BridgeError::Validation(format!(
                "Command '{key}' is already registered"
            )));
        }

        let registered = RegisteredCommand {
            plugin_id: plugin_id.to_string(),
            key: key.clone(),
            command,
        };
        commands.insert(key.clone(), registered.clone());

        tracing::debug!(plugin = plugin_id, command = %key, "Registered CLI command");
        Ok(registered)
    }

    /// Remove one command. Returns whether anything was removed.
    pub fn unregister(&self, plugin_id: &str, name: &str) -> bool {
        self.commands
            .write()
            .remove(&scoped_key(plugin_id, name))
            .is_some()
    }

    /// Remove every command owned by a plugin. Returns the removed count.
    pub fn unregister_all(&self, plugin_id: &str) -> usize {
        let mut commands = self.commands.write();
        let before = commands.len();
        commands.retain(|_, c| c.plugin_id != plugin_id);
        before - commands.len()
    }

    /// Look up one command.
    pub fn get(&self, plugin_id: &str, name: &str) -> Option<RegisteredCommand> {
        self.commands.read().get(&scoped_key(plugin_id, name)).cloned()
    }

    /// All commands, sorted by explicit order, then plugin id, then name.
    pub fn get_all(&self) -> Vec<RegisteredCommand> {
        let mut all: Vec<RegisteredCommand> = self.commands.read().values().cloned().collect();
        all.sort_by(|a, b| {
            a.command
                .order
                .cmp(&b.command.order)
                .then_with(|| a.plugin_id.cmp(&b.plugin_id))
                .then_with(|| a.command.name.cmp(&b.command.name))
        });
        all
    }

    /// Commands carrying a tag.
    pub fn by_tag(&self, tag: &str) -> Vec<RegisteredCommand> {
        self.get_all()
            .into_iter()
            .filter(|c| c.command.tags.iter().any(|t| t == tag))
            .collect()
    }

    /// Commands owned by one plugin.
    pub fn by_plugin(&self, plugin_id: &str) -> Vec<RegisteredCommand> {
        self.get_all()
            .into_iter()
            .filter(|c| c.plugin_id == plugin_id)
            .collect()
    }

    /// Number of registered commands.
    pub fn len(&self) -> usize {
        self.commands.read().len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.commands.read().is_empty()
    }
}
