//! Bridge error types.

use thiserror::Error;

use crate::permissions::Permission;
use crate::reload::ReloadPhase;

/// Result type for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Errors that can occur during bridge operations.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Plugin manifest is unreadable, malformed, or failed schema validation.
    #[error("Invalid manifest for plugin '{plugin_id}': {}", .violations.join("; "))]
    Manifest {
        plugin_id: String,
        violations: Vec<String>,
    },

    /// A declared dependency cannot be satisfied.
    #[error("Dependency error for plugin '{plugin_id}': {message}")]
    Dependency { plugin_id: String, message: String },

    /// Plugins depend on each other in a cycle.
    #[error("Circular dependency detected for plugin '{plugin_id}': {}", .cycle.join(" -> "))]
    CircularDependency {
        plugin_id: String,
        cycle: Vec<String>,
    },

    /// Capability not granted by the plugin's manifest.
    #[error("Plugin '{plugin_id}' requires permission '{permission}' which is not granted")]
    PermissionDenied {
        plugin_id: String,
        permission: Permission,
    },

    /// Bad contribution name/path or config violation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Invalid lifecycle state or transition.
    #[error("Lifecycle error for plugin '{plugin_id}': {message}")]
    Lifecycle { plugin_id: String, message: String },

    /// The host never registered a service under this name.
    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    /// A hot-reload phase failed.
    #[error("Hot reload failed during {phase}: {message}")]
    HotReload {
        phase: ReloadPhase,
        message: String,
    },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Build a manifest error with a single violation.
    pub fn manifest(plugin_id: impl Into<String>, violation: impl Into<String>) -> Self {
        Self::Manifest {
            plugin_id: plugin_id.into(),
            violations: vec![violation.into()],
        }
    }

    /// Build a lifecycle error.
    pub fn lifecycle(plugin_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Lifecycle {
            plugin_id: plugin_id.into(),
            message: message.into(),
        }
    }
}
