//! Contribution registries.
//!
//! Three independent namespaced registries accept CLI command, API route, and
//! UI panel/menu contributions from plugins. Every contribution is keyed by
//! `(plugin_id, local_name)` and exposed under the scoped key
//! `"<plugin_id>.<local_name>"`, so two plugins can use the same local name
//! without conflict. A fixed set of top-level names is reserved for the host
//! and can never be claimed by a plugin, regardless of permissions.

mod api;
mod cli;
mod ui;

pub use api::{ApiRegistry, ApiRoute, HttpMethod, RegisteredRoute, StandardEndpoints};
pub use cli::{CliCommand, CliRegistry, RegisteredCommand};
pub use ui::{
    MenuItem, MenuNode, PanelLocation, RegisteredMenuItem, RegisteredPanel, UiPanel, UiRegistry,
};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{BridgeError, BridgeResult};

/// Top-level names owned by the host. No plugin contribution may claim them.
pub const RESERVED_NAMES: &[&str] = &[
    "help", "version", "plugins", "config", "health", "metrics", "logs", "reload", "events",
];

static NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9][a-z0-9_-]*$").expect("valid name pattern"));

/// Validate a contribution's local name.
pub(crate) fn validate_local_name(name: &str) -> BridgeResult<()> {
    if name.is_empty() {
        return Err(BridgeError::Validation(
            "Contribution name cannot be empty".to_string(),
        ));
    }

    if !NAME_PATTERN.is_match(name) {
        return Err(BridgeError::Validation(format!(
            "Invalid contribution name '{name}': must match [a-z0-9][a-z0-9_-]*"
        )));
    }

    if RESERVED_NAMES.contains(&name) {
        return Err(BridgeError::Validation(format!(
            "Name '{name}' is reserved by the host"
        )));
    }

    Ok(())
}

/// Scoped registry key for a plugin contribution.
pub(crate) fn scoped_key(plugin_id: &str, name: &str) -> String {
    format!("{plugin_id}.{name}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_names() {
        assert!(validate_local_name("scan").is_ok());
        assert!(validate_local_name("scan-all").is_ok());
        assert!(validate_local_name("scan_all2").is_ok());
    }

    #[test]
    fn test_empty_name_rejected() {
        assert!(validate_local_name("").is_err());
    }

    #[test]
    fn test_bad_characters_rejected() {
        assert!(validate_local_name("Scan").is_err());
        assert!(validate_local_name("-scan").is_err());
        assert!(validate_local_name("scan all").is_err());
    }

    #[test]
    fn test_reserved_names_rejected() {
        for name in RESERVED_NAMES {
            assert!(validate_local_name(name).is_err(), "{name} should be reserved");
        }
    }

    #[test]
    fn test_scoped_key() {
        assert_eq!(scoped_key("sample", "scan"), "sample.scan");
    }
}
