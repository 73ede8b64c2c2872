//! Plugin contracts and per-plugin bookkeeping.
//!
//! Two generations of plugins are supported. The v2 contract is the
//! [`Plugin`] trait: `init`/`shutdown` plus optional health and metrics
//! capabilities exposed through accessor methods (absence means default
//! behavior). The legacy contract is the [`LegacyPlugin`] trait: a name, a
//! version, and at least one of the `on_scan`/`on_analyze`/`configure`
//! hooks; such plugins are auto-adapted with a synthesized manifest.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::BridgeResult;
use crate::manifest::PluginManifest;
use crate::services::ServiceLocator;

/// Lifecycle state of a plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginState {
    /// Manifest registered; nothing instantiated.
    Discovered,
    /// Instantiation and contribution registration in progress.
    Loading,
    /// Initialized and serving.
    Ready,
    /// Shutdown in progress.
    Unloading,
    /// Shut down.
    Disabled,
    /// Discovery or initialization failed; see `last_error`.
    Error,
}

impl PluginState {
    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovered => "discovered",
            Self::Loading => "loading",
            Self::Ready => "ready",
            Self::Unloading => "unloading",
            Self::Disabled => "disabled",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for PluginState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Health status reported by a plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Unknown,
}

/// Health report from a plugin's health-check capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    /// Overall status.
    pub status: HealthStatus,
    /// Optional human-readable message.
    #[serde(default)]
    pub message: Option<String>,
    /// Free-form detail map.
    #[serde(default)]
    pub details: BTreeMap<String, String>,
}

impl HealthReport {
    /// A healthy report with no message.
    pub fn healthy() -> Self {
        Self {
            status: HealthStatus::Healthy,
            message: None,
            details: BTreeMap::new(),
        }
    }

    /// An unhealthy report with a message.
    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            message: Some(message.into()),
            details: BTreeMap::new(),
        }
    }

    /// The default report for plugins without the capability.
    pub fn unknown() -> Self {
        Self {
            status: HealthStatus::Unknown,
            message: None,
            details: BTreeMap::new(),
        }
    }
}

/// A metric value exposed by a plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Integer(i64),
    Float(f64),
    Text(String),
}

/// Optional health-check capability.
pub trait HealthCheck: Send + Sync {
    /// Current health of the plugin.
    fn health(&self) -> HealthReport;
}

/// Optional metrics capability.
pub trait MetricsSource: Send + Sync {
    /// Named metric values.
    fn metrics(&self) -> BTreeMap<String, MetricValue>;
}

/// The v2 plugin contract.
pub trait Plugin: Send + Sync {
    /// Called once after instantiation with the plugin's service facade.
    fn init(&mut self, _services: &ServiceLocator) -> BridgeResult<()> {
        Ok(())
    }

    /// Called when the plugin is shut down or reloaded.
    fn shutdown(&mut self) -> BridgeResult<()> {
        Ok(())
    }

    /// Health-check capability, if implemented.
    fn health_check(&self) -> Option<&dyn HealthCheck> {
        None
    }

    /// Metrics capability, if implemented.
    fn metrics_source(&self) -> Option<&dyn MetricsSource> {
        None
    }
}

/// Which legacy hooks a plugin implements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LegacyHooks {
    /// Implements `on_scan`.
    pub scan: bool,
    /// Implements `on_analyze`.
    pub analyze: bool,
    /// Implements `configure`.
    pub configure: bool,
}

impl LegacyHooks {
    /// Whether at least one hook is implemented. A candidate without any
    /// hook does not satisfy the legacy contract.
    pub fn any(&self) -> bool {
        self.scan || self.analyze || self.configure
    }
}

/// The legacy duck-typed plugin contract, made explicit.
pub trait LegacyPlugin: Send + Sync {
    /// Plugin name (doubles as id, lowercased by the adapter).
    fn name(&self) -> &str;

    /// Plugin version.
    fn version(&self) -> &str;

    /// Optional description for the synthesized manifest.
    fn description(&self) -> Option<&str> {
        None
    }

    /// Optional UI hint; seeds a panel in the synthesized manifest.
    fn ui_hint(&self) -> Option<&str> {
        None
    }

    /// Which hooks this plugin implements.
    fn hooks(&self) -> LegacyHooks;

    /// Enrich a scan report in place.
    fn on_scan(&mut self, _report: &mut serde_json::Value) {}

    /// Enrich an analysis summary in place.
    fn on_analyze(&mut self, _summary: &mut serde_json::Value) {}

    /// Receive the merged configuration.
    fn configure(&mut self, _config: &toml::Table) {}
}

/// A live plugin instance of either generation.
pub enum PluginInstance {
    V2(Box<dyn Plugin>),
    Legacy(Box<dyn LegacyPlugin>),
}

impl std::fmt::Debug for PluginInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::V2(_) => write!(f, "PluginInstance::V2"),
            Self::Legacy(_) => write!(f, "PluginInstance::Legacy"),
        }
    }
}

/// Factory producing v2 plugin instances; the unit that "loads" under the
/// factory-registry model of dynamic loading.
pub type PluginFactory = Arc<dyn Fn() -> Box<dyn Plugin> + Send + Sync>;

/// Constructor producing legacy plugin instances.
pub type LegacyConstructor = Arc<dyn Fn() -> Box<dyn LegacyPlugin> + Send + Sync>;

/// Mutable per-plugin record, exclusively owned by the bridge.
pub struct PluginRecord {
    /// The immutable manifest. Replaced wholesale on reload.
    pub manifest: PluginManifest,
    /// Live instance, present between initialization and shutdown.
    pub instance: Option<PluginInstance>,
    /// Resolved factory handle for v2 plugins.
    pub factory: Option<PluginFactory>,
    /// Constructor for legacy plugins.
    pub legacy_ctor: Option<LegacyConstructor>,
    /// Current lifecycle state.
    pub state: PluginState,
    /// Message of the last failure, if any.
    pub last_error: Option<String>,
    /// Whether the record was adapted from a legacy plugin.
    pub legacy_adapted: bool,
    /// Monotonic load-order slot, renumbered on reload.
    pub load_order: u64,
}

impl std::fmt::Debug for PluginRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRecord")
            .field("id", &self.manifest.id)
            .field("state", &self.state)
            .field("legacy_adapted", &self.legacy_adapted)
            .field("load_order", &self.load_order)
            .finish()
    }
}

impl PluginRecord {
    /// Create a freshly discovered record.
    pub fn discovered(manifest: PluginManifest, legacy_adapted: bool, load_order: u64) -> Self {
        Self {
            manifest,
            instance: None,
            factory: None,
            legacy_ctor: None,
            state: PluginState::Discovered,
            last_error: None,
            legacy_adapted,
            load_order,
        }
    }

    /// Consumer-facing summary of this record.
    pub fn overview(&self) -> PluginOverview {
        let mut permissions: Vec<_> = self.manifest.permissions.iter().copied().collect();
        permissions.sort();

        PluginOverview {
            id: self.manifest.id.clone(),
            name: self.manifest.name.clone(),
            version: self.manifest.version.clone(),
            description: self.manifest.description.clone(),
            category: self.manifest.category,
            trust_level: self.manifest.trust_level,
            state: self.state,
            permissions,
            last_error: self.last_error.clone(),
            legacy_adapted: self.legacy_adapted,
            load_order: self.load_order,
        }
    }
}

/// Serializable plugin summary served to the host's HTTP layer and CLI.
#[derive(Debug, Clone, Serialize)]
pub struct PluginOverview {
    pub id: String,
    pub name: String,
    pub version: String,
    pub description: String,
    pub category: crate::manifest::PluginCategory,
    pub trust_level: crate::manifest::TrustLevel,
    pub state: PluginState,
    pub permissions: Vec<crate::permissions::Permission>,
    pub last_error: Option<String>,
    pub legacy_adapted: bool,
    pub load_order: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BareV2;
    impl Plugin for BareV2 {}

    struct Instrumented;

    impl Plugin for Instrumented {
        fn health_check(&self) -> Option<&dyn HealthCheck> {
            Some(self)
        }

        fn metrics_source(&self) -> Option<&dyn MetricsSource> {
            Some(self)
        }
    }

    impl HealthCheck for Instrumented {
        fn health(&self) -> HealthReport {
            HealthReport::healthy()
        }
    }

    impl MetricsSource for Instrumented {
        fn metrics(&self) -> BTreeMap<String, MetricValue> {
            BTreeMap::from([("requests".to_string(), MetricValue::Integer(7))])
        }
    }

    #[test]
    fn test_capabilities_default_to_absent() {
        let plugin = BareV2;
        assert!(plugin.health_check().is_none());
        assert!(plugin.metrics_source().is_none());
    }

    #[test]
    fn test_capabilities_when_implemented() {
        let plugin = Instrumented;

        let health = plugin.health_check().unwrap().health();
        assert_eq!(health.status, HealthStatus::Healthy);

        let metrics = plugin.metrics_source().unwrap().metrics();
        assert_eq!(metrics.get("requests"), Some(&MetricValue::Integer(7)));
    }

    #[test]
    fn test_legacy_hooks_any() {
        assert!(!LegacyHooks::default().any());
        assert!(LegacyHooks {
            scan: true,
            ..LegacyHooks::default()
        }
        .any());
    }

    #[test]
    fn test_record_overview() {
        let manifest =
            PluginManifest::synthesize_for_legacy("old", "Old", "1.0.0", "legacy", None);
        let record = PluginRecord::discovered(manifest, true, 3);

        let overview = record.overview();
        assert_eq!(overview.id, "old");
        assert_eq!(overview.state, PluginState::Discovered);
        assert!(overview.legacy_adapted);
        assert_eq!(overview.load_order, 3);
    }

    #[test]
    fn test_state_wire_names() {
        assert_eq!(PluginState::Ready.as_str(), "ready");
        assert_eq!(
            serde_json::to_string(&PluginState::Error).unwrap(),
            "\"error\""
        );
    }

    #[test]
    fn test_metric_value_untagged_serialization() {
        let metrics = BTreeMap::from([
            ("count".to_string(), MetricValue::Integer(3)),
            ("ratio".to_string(), MetricValue::Float(0.5)),
            ("mode".to_string(), MetricValue::Text("fast".to_string())),
        ]);

        let json = serde_json::to_value(&metrics).unwrap();
        assert_eq!(json["count"], 3);
        assert_eq!(json["ratio"], 0.5);
        assert_eq!(json["mode"], "fast");
    }
}
