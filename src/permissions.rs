//! Plugin permission model and enforcement.
//!
//! Permissions form a closed set declared in a plugin's manifest. Checks run
//! once, when a contribution is registered, not on every invocation.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, BridgeResult};
use crate::manifest::PluginManifest;

/// A capability a plugin may request in its manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    /// Read files from the host workspace.
    FilesystemRead,
    /// Write files in the host workspace.
    FilesystemWrite,
    /// Run external commands.
    RunCommands,
    /// Outbound network access.
    Network,
    /// Read/write host configuration.
    Config,
    /// Emit events on the shared bus.
    Events,
    /// Register CLI commands.
    RegisterCli,
    /// Register API routes.
    RegisterApi,
    /// Register UI panels and menu items.
    RegisterUi,
}

impl Permission {
    /// Every permission in the closed set.
    pub const ALL: [Self; 9] = [
        Self::FilesystemRead,
        Self::FilesystemWrite,
        Self::RunCommands,
        Self::Network,
        Self::Config,
        Self::Events,
        Self::RegisterCli,
        Self::RegisterApi,
        Self::RegisterUi,
    ];

    /// Wire name as used in manifests.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FilesystemRead => "filesystem_read",
            Self::FilesystemWrite => "filesystem_write",
            Self::RunCommands => "run_commands",
            Self::Network => "network",
            Self::Config => "config",
            Self::Events => "events",
            Self::RegisterCli => "register_cli",
            Self::RegisterApi => "register_api",
            Self::RegisterUi => "register_ui",
        }
    }

    /// Parse a wire name back into a permission.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|p| p.as_str() == name)
    }
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Decides allow/deny for a plugin's capability requests.
///
/// The grant table is populated from manifests at discovery time and mutated
/// only through the bridge. Core plugins are granted the full set.
#[derive(Debug, Default)]
pub struct PermissionChecker {
    grants: RwLock<HashMap<String, HashSet<Permission>>>,
}

impl PermissionChecker {
    /// Create a checker with an empty grant table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the permission set a manifest declares.
    pub fn grant_from_manifest(&self, manifest: &PluginManifest) {
        self.grants
            .write()
            .insert(manifest.id.clone(), manifest.permissions.clone());
    }

    /// Grant the full permission set (used for core plugins).
    pub fn grant_all(&self, plugin_id: &str) {
        self.grants
            .write()
            .insert(plugin_id.to_string(), Permission::ALL.iter().copied().collect());
    }

    /// Drop every grant for a plugin.
    pub fn revoke_all(&self, plugin_id: &str) {
        self.grants.write().remove(plugin_id);
    }

    /// Check whether a plugin holds a permission.
    pub fn has(&self, plugin_id: &str, permission: Permission) -> bool {
        self.grants
            .read()
            .get(plugin_id)
            .is_some_and(|set| set.contains(&permission))
    }

    /// Check a capability request, failing with `PermissionDenied` on a miss.
    pub fn check(&self, plugin_id: &str, permission: Permission) -> BridgeResult<()> {
        if self.has(plugin_id, permission) {
            Ok(())
        } else {
            Err(BridgeError::PermissionDenied {
                plugin_id: plugin_id.to_string(),
                permission,
            })
        }
    }

    /// The permissions currently granted to a plugin.
    pub fn granted(&self, plugin_id: &str) -> HashSet<Permission> {
        self.grants.read().get(plugin_id).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_wire_names_round_trip() {
        for permission in Permission::ALL {
            assert_eq!(Permission::parse(permission.as_str()), Some(permission));
        }
        assert_eq!(Permission::parse("world_domination"), None);
    }

    #[test]
    fn test_check_denied_without_grant() {
        let checker = PermissionChecker::new();

        let err = checker.check("sample", Permission::RegisterCli).unwrap_err();
        match err {
            BridgeError::PermissionDenied { plugin_id, permission } => {
                assert_eq!(plugin_id, "sample");
                assert_eq!(permission, Permission::RegisterCli);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_check_allowed_after_manifest_grant() {
        let checker = PermissionChecker::new();
        let manifest = PluginManifest::synthesize_for_legacy("sample", "Sample", "1.0.0", "", None);

        // Synthesized manifests carry no permissions.
        checker.grant_from_manifest(&manifest);
        assert!(checker.check("sample", Permission::Events).is_err());

        checker.grant_all("sample");
        assert!(checker.check("sample", Permission::Events).is_ok());
        assert_eq!(checker.granted("sample").len(), Permission::ALL.len());
    }

    #[test]
    fn test_revoke_all() {
        let checker = PermissionChecker::new();
        checker.grant_all("sample");
        checker.revoke_all("sample");

        assert!(!checker.has("sample", Permission::Network));
    }
}
