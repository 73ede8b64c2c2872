//! # Plugbridge
//!
//! Plugin runtime ("bridge") for extensible host applications: discovers,
//! loads, versions, and supervises extension plugins, and mediates every
//! capability a plugin may use.
//!
//! ## Features
//!
//! - **Manifest-driven plugins**: declarative `plugin.toml` descriptors with
//!   schema validation, plus auto-adaptation of legacy hook-style plugins
//! - **Permission enforcement**: a closed capability set checked once, at
//!   contribution-registration time
//! - **Namespaced contribution registries**: CLI commands, API routes, and
//!   UI panels, conflict-free across plugins
//! - **Supervised lifecycle**: category + dependency ordering with cycle
//!   detection, per-plugin error isolation
//! - **Hot reload**: per-plugin locks with bounded waits, phase-tagged
//!   results, bounded attempt history
//!
//! ## Quick Start
//!
//! ```no_run
//! use plugbridge::{Bridge, BridgeConfig};
//!
//! let bridge = Bridge::new(BridgeConfig::default());
//! bridge.discover();
//! bridge.initialize(None)?;
//! bridge.ready();
//! # Ok::<(), plugbridge::BridgeError>(())
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]
// Allow common patterns that are intentional in this codebase
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::trivially_copy_pass_by_ref)]
#![allow(clippy::significant_drop_tightening)]
#![allow(clippy::uninlined_format_args)]

pub mod config;
pub mod discovery;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod manifest;
pub mod permissions;
pub mod plugin;
pub mod registry;
pub mod reload;
pub mod services;

pub use error::{BridgeError, BridgeResult};
pub use events::{topics, EventBus, ScopedEventBus, SubscriptionId};
pub use lifecycle::{Bridge, BridgeConfig, UiManifest, CORE_PLUGINS};
pub use manifest::{
    CapabilityFlags, PluginCategory, PluginManifest, TrustLevel, MANIFEST_FILE,
};
pub use permissions::{Permission, PermissionChecker};
pub use plugin::{
    HealthCheck, HealthReport, HealthStatus, LegacyHooks, LegacyPlugin, MetricValue,
    MetricsSource, Plugin, PluginInstance, PluginOverview, PluginState,
};
pub use registry::{
    ApiRegistry, ApiRoute, CliCommand, CliRegistry, HttpMethod, MenuItem, PanelLocation,
    RegisteredCommand, RegisteredMenuItem, RegisteredPanel, RegisteredRoute, StandardEndpoints,
    UiPanel, UiRegistry, RESERVED_NAMES,
};
pub use reload::{
    HotReloader, ReloadCheck, ReloadPhase, ReloadResult, ReloadStats, RELOAD_HISTORY_CAPACITY,
    RELOAD_LOCK_TIMEOUT,
};
pub use services::{PluginLogger, ServiceLocator};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name.
pub const APP_NAME: &str = "plugbridge";
