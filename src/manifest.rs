//! Plugin manifest parsing and validation.
//!
//! A plugin manifest is a TOML file (`plugin.toml`) describing a plugin's
//! identity, permissions, dependencies, and contributions. Manifests are
//! immutable once loaded; a hot reload replaces the whole manifest rather
//! than mutating it in place. Legacy plugins that only implement the old
//! hook protocol get a minimal synthesized manifest instead.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, BridgeResult};
use crate::permissions::Permission;
use crate::registry::{ApiRoute, CliCommand, MenuItem, StandardEndpoints, UiPanel};

/// Plugin manifest file name.
pub const MANIFEST_FILE: &str = "plugin.toml";

static ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9][a-z0-9_-]*$").expect("valid id pattern"));

/// Load-order/trust category of a plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginCategory {
    /// Built into the host; always present, loads first, never reloaded.
    Core,
    /// Infrastructure plugins, loaded before tools.
    System,
    /// Ordinary feature plugins.
    Tool,
}

impl PluginCategory {
    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Core => "core",
            Self::System => "system",
            Self::Tool => "tool",
        }
    }

    /// Categories in load order.
    pub const LOAD_ORDER: [Self; 3] = [Self::Core, Self::System, Self::Tool];
}

impl std::fmt::Display for PluginCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Declared provenance/maturity tier of a plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustLevel {
    /// Unvetted plugin; the default for synthesized manifests.
    Experimental,
    /// Community-maintained plugin.
    Community,
    /// Vetted first-party plugin. Manifests may also spell this
    /// `trusted` or `stable`.
    #[serde(alias = "trusted", alias = "stable")]
    Official,
}

impl Default for TrustLevel {
    fn default() -> Self {
        Self::Experimental
    }
}

impl TrustLevel {
    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Experimental => "experimental",
            Self::Community => "community",
            Self::Official => "official",
        }
    }
}

impl std::fmt::Display for TrustLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Optional capability flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CapabilityFlags {
    /// Plugin exposes a metrics source.
    pub metrics: bool,
    /// Plugin schedules background jobs.
    pub background_jobs: bool,
    /// Maximum concurrent background jobs.
    pub max_background_jobs: usize,
    /// Plugin exposes a health check.
    pub health_check: bool,
}

impl Default for CapabilityFlags {
    fn default() -> Self {
        Self {
            metrics: false,
            background_jobs: false,
            max_background_jobs: 1,
            health_check: false,
        }
    }
}

/// Declared CLI contributions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CliContributions {
    /// Commands to register at initialization.
    pub commands: Vec<CliCommand>,
}

/// Declared API contributions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiContributions {
    /// Routes to register at initialization.
    pub routes: Vec<ApiRoute>,
    /// Mount prefix for an opaque host-provided router, as an alternative
    /// to individual routes.
    pub router: Option<String>,
    /// Standard generated endpoints to opt into.
    pub standard: StandardEndpoints,
}

/// Declared UI contributions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UiContributions {
    /// Panels to register at initialization.
    pub panels: Vec<UiPanel>,
    /// Menu items to register at initialization.
    pub menu: Vec<MenuItem>,
}

/// Declared configuration schema and defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigSection {
    /// Schema used for auto-generated settings forms.
    pub schema: toml::Table,
    /// Default values, the lowest layer of the merged configuration.
    pub defaults: toml::Table,
}

/// Immutable descriptor of a plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginManifest {
    /// Globally unique plugin id.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Plugin version (semver).
    pub version: String,
    /// Human-readable description.
    pub description: String,
    /// Load-order category.
    #[serde(rename = "type")]
    pub category: PluginCategory,
    /// Minimum host version required.
    pub host_version: String,
    /// Plugin author.
    #[serde(default)]
    pub author: Option<String>,
    /// Plugin license.
    #[serde(default)]
    pub license: Option<String>,
    /// Declared trust tier.
    #[serde(default)]
    pub trust_level: TrustLevel,
    /// Declared permission set.
    #[serde(default)]
    pub permissions: HashSet<Permission>,
    /// Plugin id -> version constraint.
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
    /// Optional capability flags.
    #[serde(default)]
    pub capabilities: CapabilityFlags,
    /// Factory name used to instantiate the plugin. Defaults to the id.
    #[serde(default)]
    pub entry_point: Option<String>,
    /// Declared CLI contributions.
    #[serde(default)]
    pub cli: CliContributions,
    /// Declared API contributions.
    #[serde(default)]
    pub api: ApiContributions,
    /// Declared UI contributions.
    #[serde(default)]
    pub ui: UiContributions,
    /// Configuration schema and defaults.
    #[serde(default)]
    pub config: ConfigSection,
    /// Directory the manifest was loaded from. None for synthesized
    /// manifests.
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

impl PluginManifest {
    /// Parse a manifest from a TOML string.
    pub fn from_toml(content: &str) -> BridgeResult<Self> {
        let table: toml::Table = toml::from_str(content).map_err(|e| {
            BridgeError::manifest("unknown", format!("Malformed TOML: {e}"))
        })?;

        let plugin_id = table
            .get("id")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();

        let violations = validate_table(&table);
        if !violations.is_empty() {
            return Err(BridgeError::Manifest { plugin_id, violations });
        }

        table
            .try_into()
            .map_err(|e: toml::de::Error| BridgeError::manifest(plugin_id, e.to_string()))
    }

    /// Load a manifest from a file, recording its source directory.
    pub fn load(path: &Path) -> BridgeResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            BridgeError::manifest("unknown", format!("Unreadable manifest file: {e}"))
        })?;

        let mut manifest = Self::from_toml(&content)?;
        manifest.source = path.parent().map(Path::to_path_buf);
        Ok(manifest)
    }

    /// Serialize back to a TOML string.
    pub fn to_toml(&self) -> BridgeResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| BridgeError::manifest(self.id.clone(), e.to_string()))
    }

    /// Build a minimal manifest for a plugin that only implements the old
    /// duck-typed hook protocol.
    pub fn synthesize_for_legacy(
        id: &str,
        name: &str,
        version: &str,
        description: &str,
        ui_hint: Option<&str>,
    ) -> Self {
        let ui = ui_hint
            .map(|title| UiContributions {
                panels: vec![UiPanel::new("panel", title)],
                menu: Vec::new(),
            })
            .unwrap_or_default();

        Self {
            id: id.to_string(),
            name: name.to_string(),
            version: version.to_string(),
            description: description.to_string(),
            category: PluginCategory::Tool,
            host_version: "0.0.0".to_string(),
            author: None,
            license: None,
            trust_level: TrustLevel::Experimental,
            permissions: HashSet::new(),
            dependencies: BTreeMap::new(),
            capabilities: CapabilityFlags::default(),
            entry_point: None,
            cli: CliContributions::default(),
            api: ApiContributions::default(),
            ui,
            config: ConfigSection::default(),
            source: None,
        }
    }

    /// Build the manifest of a built-in core plugin.
    pub(crate) fn synthesize_core(id: &str, name: &str, description: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            version: crate::VERSION.to_string(),
            description: description.to_string(),
            category: PluginCategory::Core,
            host_version: "0.0.0".to_string(),
            author: None,
            license: None,
            trust_level: TrustLevel::Official,
            permissions: Permission::ALL.iter().copied().collect(),
            dependencies: BTreeMap::new(),
            capabilities: CapabilityFlags {
                health_check: true,
                ..CapabilityFlags::default()
            },
            entry_point: None,
            cli: CliContributions::default(),
            api: ApiContributions::default(),
            ui: UiContributions::default(),
            config: ConfigSection::default(),
            source: None,
        }
    }

    /// Factory name used to instantiate this plugin.
    pub fn entry_point(&self) -> &str {
        self.entry_point.as_deref().unwrap_or(&self.id)
    }

    /// Check the minimum-host-version constraint against a host version.
    ///
    /// `0.0.0` means no constraint. Otherwise the major version must match
    /// and the host's minor/patch must be at least the required ones.
    pub fn is_compatible_with_host(&self, host_version: &str) -> bool {
        let Some(required) = parse_version(&self.host_version) else {
            return false;
        };
        if required == (0, 0, 0) {
            return true;
        }
        let Some(host) = parse_version(host_version) else {
            return false;
        };

        required.0 == host.0 && (host.1, host.2) >= (required.1, required.2)
    }
}

/// Validate a raw manifest table against the schema, collecting every
/// violation instead of stopping at the first.
fn validate_table(table: &toml::Table) -> Vec<String> {
    let mut violations = Vec::new();

    for field in ["id", "name", "version", "description", "type", "host_version"] {
        match table.get(field) {
            None => violations.push(format!("Missing required field: {field}")),
            Some(value) if !value.is_str() => {
                violations.push(format!("Field '{field}' must be a string"));
            }
            Some(_) => {}
        }
    }

    if let Some(id) = table.get("id").and_then(|v| v.as_str()) {
        if !ID_PATTERN.is_match(id) {
            violations.push(format!(
                "Field 'id' must match pattern [a-z0-9][a-z0-9_-]* (got '{id}')"
            ));
        }
    }

    for field in ["version", "host_version"] {
        if let Some(version) = table.get(field).and_then(|v| v.as_str()) {
            if parse_version(version).is_none() {
                violations.push(format!(
                    "Field '{field}' must be in semver format (e.g. 1.0.0), got '{version}'"
                ));
            }
        }
    }

    if let Some(category) = table.get("type").and_then(|v| v.as_str()) {
        if !["core", "system", "tool"].contains(&category) {
            violations.push(format!(
                "Field 'type' must be one of: core, system, tool (got '{category}')"
            ));
        }
    }

    if let Some(trust) = table.get("trust_level") {
        match trust.as_str() {
            Some(value)
                if ["experimental", "community", "official", "trusted", "stable"]
                    .contains(&value) => {}
            Some(value) => violations.push(format!(
                "Field 'trust_level' must be one of: experimental, community, official \
                 (got '{value}')"
            )),
            None => violations.push("Field 'trust_level' must be a string".to_string()),
        }
    }

    if let Some(permissions) = table.get("permissions") {
        match permissions.as_array() {
            Some(entries) => {
                for entry in entries {
                    match entry.as_str() {
                        Some(name) if Permission::parse(name).is_some() => {}
                        Some(name) => violations.push(format!("Unknown permission: '{name}'")),
                        None => violations
                            .push("Field 'permissions' must be an array of strings".to_string()),
                    }
                }
            }
            None => {
                violations.push("Field 'permissions' must be an array of strings".to_string());
            }
        }
    }

    if let Some(dependencies) = table.get("dependencies") {
        match dependencies.as_table() {
            Some(entries) => {
                for (dep_id, constraint) in entries {
                    if !constraint.is_str() {
                        violations.push(format!(
                            "Dependency '{dep_id}' must map to a version constraint string"
                        ));
                    }
                }
            }
            None => violations.push("Field 'dependencies' must be a table".to_string()),
        }
    }

    for section in ["capabilities", "cli", "api", "ui", "config"] {
        if let Some(value) = table.get(section) {
            if !value.is_table() {
                violations.push(format!("Field '{section}' must be a table"));
            }
        }
    }

    violations
}

/// Parse `X.Y` or `X.Y.Z` (pre-release suffixes ignored).
pub(crate) fn parse_version(version: &str) -> Option<(u64, u64, u64)> {
    let core = version.split('-').next()?;
    let parts: Vec<u64> = core.split('.').map(|p| p.parse().ok()).collect::<Option<_>>()?;

    match parts.as_slice() {
        [major, minor] => Some((*major, *minor, 0)),
        [major, minor, patch] => Some((*major, *minor, *patch)),
        _ => None,
    }
}

/// Check a version against a dependency constraint.
///
/// Supported forms: `*` (any), `^X.Y.Z` (same major, at least the given
/// version), `>=X.Y.Z`, and an exact version.
pub(crate) fn version_satisfies(version: &str, constraint: &str) -> bool {
    let constraint = constraint.trim();
    if constraint.is_empty() || constraint == "*" {
        return true;
    }

    let Some(actual) = parse_version(version) else {
        return false;
    };

    if let Some(rest) = constraint.strip_prefix('^') {
        return parse_version(rest)
            .is_some_and(|wanted| actual.0 == wanted.0 && actual >= wanted);
    }
    if let Some(rest) = constraint.strip_prefix(">=") {
        return parse_version(rest).is_some_and(|wanted| actual >= wanted);
    }

    parse_version(constraint).is_some_and(|wanted| actual == wanted)
}
