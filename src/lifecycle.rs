//! Bridge core: the plugin lifecycle manager.
//!
//! Owns the plugin table, runs discovery, orders plugins by category and
//! dependency, drives each plugin through its state machine, and registers
//! its contributions. One plugin's failure never blocks the others; the
//! failing record transitions to `error` with the stored message and
//! processing continues.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{merge_config, plugin_section};
use crate::discovery::discover_manifests;
use crate::error::{BridgeError, BridgeResult};
use crate::events::{topics, EventBus, ScopedEventBus};
use crate::manifest::{version_satisfies, PluginCategory, PluginManifest, MANIFEST_FILE};
use crate::permissions::PermissionChecker;
use crate::plugin::{
    HealthCheck, HealthReport, LegacyConstructor, LegacyPlugin, MetricValue, Plugin,
    PluginFactory, PluginInstance, PluginOverview, PluginRecord, PluginState,
};
use crate::registry::{
    ApiRegistry, ApiRoute, CliRegistry, RegisteredCommand, RegisteredMenuItem, RegisteredPanel,
    RegisteredRoute, UiRegistry,
};
use crate::services::{ServiceLocator, ServiceMap};

/// Built-in core plugins, always present and loaded first.
pub const CORE_PLUGINS: &[(&str, &str, &str)] = &[(
    "bridge-core",
    "Bridge Core",
    "Built-in runtime supervision plugin",
)];

/// The built-in core plugin. Reports bridge health; registers nothing.
#[derive(Debug, Default)]
struct BridgeCorePlugin {
    started: bool,
}

impl Plugin for BridgeCorePlugin {
    fn init(&mut self, services: &ServiceLocator) -> BridgeResult<()> {
        services.logger().debug("bridge core plugin started");
        self.started = true;
        Ok(())
    }

    fn shutdown(&mut self) -> BridgeResult<()> {
        self.started = false;
        Ok(())
    }

    fn health_check(&self) -> Option<&dyn HealthCheck> {
        Some(self)
    }
}

impl HealthCheck for BridgeCorePlugin {
    fn health(&self) -> HealthReport {
        if self.started {
            HealthReport::healthy()
        } else {
            HealthReport::unhealthy("core plugin not initialized")
        }
    }
}

/// Construction-time settings for the bridge.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Host application version, checked against manifest constraints.
    pub host_version: String,
    /// Whether hot reload is allowed.
    pub developer_mode: bool,
    /// Directories scanned for plugin manifests.
    pub plugin_dirs: Vec<PathBuf>,
    /// Host-level configuration (per-plugin sections).
    pub host_config: toml::Table,
    /// Project-level configuration (per-plugin sections).
    pub project_config: toml::Table,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host_version: crate::VERSION.to_string(),
            developer_mode: false,
            plugin_dirs: Vec::new(),
            host_config: toml::Table::new(),
            project_config: toml::Table::new(),
        }
    }
}

/// Consumer-facing UI manifest built by `ready()`.
#[derive(Debug, Clone, Serialize)]
pub struct UiManifest {
    /// Every plugin's summary, sorted by load order.
    pub plugins: Vec<PluginOverview>,
    /// UI panels grouped by owning plugin.
    pub panels: BTreeMap<String, Vec<RegisteredPanel>>,
    /// Menu entries sorted by order.
    pub menu: Vec<RegisteredMenuItem>,
    /// Number of plugins in the ready state.
    pub ready: usize,
    /// Number of plugins in the error state.
    pub errors: usize,
}

/// The plugin runtime: lifecycle manager plus its registries.
///
/// Explicitly constructed and owned by the host's startup sequence; tests
/// build a fresh instance instead of resetting shared state.
pub struct Bridge {
    host_version: String,
    developer_mode: bool,
    plugin_dirs: Vec<PathBuf>,

    checker: Arc<PermissionChecker>,
    cli: Arc<CliRegistry>,
    api: Arc<ApiRegistry>,
    ui: Arc<UiRegistry>,
    events: Arc<EventBus>,

    plugins: RwLock<HashMap<String, PluginRecord>>,
    factories: RwLock<HashMap<String, PluginFactory>>,
    legacy_ctors: RwLock<Vec<LegacyConstructor>>,
    pending_legacy: parking_lot::Mutex<Vec<Box<dyn LegacyPlugin>>>,
    services: ServiceMap,

    host_config: RwLock<toml::Table>,
    project_config: RwLock<toml::Table>,

    load_counter: AtomicU64,
    ui_manifest: RwLock<Option<UiManifest>>,
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("host_version", &self.host_version)
            .field("plugins", &self.plugins.read().len())
            .finish()
    }
}

impl Bridge {
    /// Create a bridge from its configuration.
    pub fn new(config: BridgeConfig) -> Self {
        let checker = Arc::new(PermissionChecker::new());

        let bridge = Self {
            host_version: config.host_version,
            developer_mode: config.developer_mode,
            plugin_dirs: config.plugin_dirs,
            cli: Arc::new(CliRegistry::new(checker.clone())),
            api: Arc::new(ApiRegistry::new(checker.clone())),
            ui: Arc::new(UiRegistry::new(checker.clone())),
            checker,
            events: Arc::new(EventBus::new()),
            plugins: RwLock::new(HashMap::new()),
            factories: RwLock::new(HashMap::new()),
            legacy_ctors: RwLock::new(Vec::new()),
            pending_legacy: parking_lot::Mutex::new(Vec::new()),
            services: ServiceMap::default(),
            host_config: RwLock::new(config.host_config),
            project_config: RwLock::new(config.project_config),
            load_counter: AtomicU64::new(0),
            ui_manifest: RwLock::new(None),
        };

        // Core plugin factories ship with the bridge itself.
        bridge
            .factories
            .write()
            .insert("bridge-core".to_string(), Arc::new(|| {
                Box::new(BridgeCorePlugin::default()) as Box<dyn Plugin>
            }));

        bridge
    }

    /// Host application version.
    pub fn host_version(&self) -> &str {
        &self.host_version
    }

    /// Whether hot reload is allowed.
    pub fn developer_mode(&self) -> bool {
        self.developer_mode
    }

    /// CLI contribution registry.
    pub fn cli(&self) -> &Arc<CliRegistry> {
        &self.cli
    }

    /// API contribution registry.
    pub fn api(&self) -> &Arc<ApiRegistry> {
        &self.api
    }

    /// UI contribution registry.
    pub fn ui(&self) -> &Arc<UiRegistry> {
        &self.ui
    }

    /// Shared event bus.
    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Permission checker.
    pub fn permissions(&self) -> &Arc<PermissionChecker> {
        &self.checker
    }

    /// Register a named factory for v2 plugin entry points.
    pub fn register_factory<F>(&self, entry_point: &str, factory: F)
    where
        F: Fn() -> Box<dyn Plugin> + Send + Sync + 'static,
    {
        self.factories
            .write()
            .insert(entry_point.to_string(), Arc::new(factory));
    }

    /// Register a constructor for a loose legacy plugin. The candidate is
    /// probed at discovery time and adapted when it satisfies the legacy
    /// contract.
    pub fn register_legacy<F>(&self, constructor: F)
    where
        F: Fn() -> Box<dyn LegacyPlugin> + Send + Sync + 'static,
    {
        self.legacy_ctors.write().push(Arc::new(constructor));
    }

    /// Adopt an already-built legacy plugin instance. Without a constructor
    /// the plugin cannot be hot-reloaded.
    pub fn register_legacy_instance(&self, instance: Box<dyn LegacyPlugin>) {
        self.pending_legacy.lock().push(instance);
    }

    /// Register a named host service for plugin lookup.
    pub fn register_service(
        &self,
        name: &str,
        service: Arc<dyn std::any::Any + Send + Sync>,
    ) {
        self.services.write().insert(name.to_string(), service);
    }

    /// Replace the host-level configuration layer.
    pub fn set_host_config(&self, config: toml::Table) {
        *self.host_config.write() = config;
    }

    /// Replace the project-level configuration layer.
    pub fn set_project_config(&self, config: toml::Table) {
        *self.project_config.write() = config;
    }

    // ------------------------------------------------------------------
    // Discovery
    // ------------------------------------------------------------------

    /// Populate the plugin table without instantiating anything.
    ///
    /// Order: built-in core plugins, then manifest directories (one plugin
    /// per subdirectory), then registered legacy candidates. A failing
    /// candidate is logged and skipped. Re-running is idempotent: existing
    /// records are kept untouched.
    ///
    /// Returns the number of newly discovered plugins.
    pub fn discover(&self) -> usize {
        let mut added = 0;

        for (id, name, description) in CORE_PLUGINS {
            if self.plugins.read().contains_key(*id) {
                continue;
            }
            let manifest = PluginManifest::synthesize_core(id, name, description);
            self.checker.grant_all(id);
            self.insert_record(PluginRecord::discovered(manifest, false, self.next_slot()));
            added += 1;
        }

        for manifest in discover_manifests(&self.plugin_dirs) {
            let id = manifest.id.clone();
            if self.plugins.read().contains_key(&id) {
                debug!(plugin = %id, "Plugin already discovered, skipping");
                continue;
            }
            self.checker.grant_from_manifest(&manifest);
            self.insert_record(PluginRecord::discovered(manifest, false, self.next_slot()));
            debug!(plugin = %id, "Discovered plugin");
            added += 1;
        }

        let ctors: Vec<LegacyConstructor> = self.legacy_ctors.read().clone();
        for ctor in ctors {
            let probe = ctor();
            match self.adapt_legacy(probe, Some(ctor.clone())) {
                Ok(true) => added += 1,
                Ok(false) => {}
                Err(e) => warn!(error = %e, "Skipping legacy plugin candidate"),
            }
        }

        let pending: Vec<Box<dyn LegacyPlugin>> =
            std::mem::take(&mut *self.pending_legacy.lock());
        for instance in pending {
            match self.adapt_legacy(instance, None) {
                Ok(true) => added += 1,
                Ok(false) => {}
                Err(e) => warn!(error = %e, "Skipping legacy plugin instance"),
            }
        }

        info!(
            total = self.plugins.read().len(),
            added, "Plugin discovery complete"
        );
        added
    }

    /// Adapt a legacy candidate into a record. Returns whether a new record
    /// was added.
    fn adapt_legacy(
        &self,
        instance: Box<dyn LegacyPlugin>,
        ctor: Option<LegacyConstructor>,
    ) -> BridgeResult<bool> {
        if !instance.hooks().any() {
            return Err(BridgeError::Validation(format!(
                "Legacy plugin '{}' implements none of the hook protocol",
                instance.name()
            )));
        }

        let id = instance.name().to_lowercase().replace([' ', '.'], "-");
        if self.plugins.read().contains_key(&id) {
            return Ok(false);
        }

        let manifest = PluginManifest::synthesize_for_legacy(
            &id,
            instance.name(),
            instance.version(),
            instance.description().unwrap_or_default(),
            instance.ui_hint(),
        );

        self.checker.grant_from_manifest(&manifest);
        let mut record = PluginRecord::discovered(manifest, true, self.next_slot());
        record.legacy_ctor = ctor;
        // Instance-only registrations keep their one instance around for
        // initialization; constructor-backed ones rebuild on demand.
        if record.legacy_ctor.is_none() {
            record.instance = Some(PluginInstance::Legacy(instance));
        }
        let id = record.manifest.id.clone();
        self.insert_record(record);

        debug!(plugin = %id, "Adapted legacy plugin");
        Ok(true)
    }

    fn insert_record(&self, record: PluginRecord) {
        self.plugins.write().insert(record.manifest.id.clone(), record);
    }

    fn next_slot(&self) -> u64 {
        self.load_counter.fetch_add(1, Ordering::SeqCst)
    }

    // ------------------------------------------------------------------
    // Initialization
    // ------------------------------------------------------------------

    /// Initialize discovered plugins, or the given subset.
    ///
    /// Plugins load category by category (core, system, tool); within each
    /// category dependencies are ordered by a depth-first topological sort.
    /// Members of a dependency cycle transition to `error` and are skipped
    /// while their siblings still initialize; after the pass the first cycle
    /// error is returned so callers see it. Any other per-plugin failure is
    /// recorded on that plugin and never aborts the others.
    pub fn initialize(&self, ids: Option<&[String]>) -> BridgeResult<()> {
        let mut first_cycle: Option<BridgeError> = None;

        for category in PluginCategory::LOAD_ORDER {
            let mut members = self.initializable_members(category, ids);

            // Peel cycles off until the sort succeeds; everything outside a
            // cycle still loads.
            let sorted = loop {
                let graph = self.dependency_graph(&members);
                match topo_sort(&members, &graph) {
                    Ok(sorted) => break sorted,
                    Err(cycle) => {
                        let error = BridgeError::CircularDependency {
                            plugin_id: cycle[0].clone(),
                            cycle: cycle.clone(),
                        };
                        warn!(category = %category, error = %error, "Dependency cycle detected");

                        let cycle_members: HashSet<&String> = cycle.iter().collect();
                        for id in &members {
                            if cycle_members.contains(id) {
                                self.mark_error(id, &error.to_string());
                            }
                        }
                        members.retain(|id| !cycle_members.contains(id));

                        if first_cycle.is_none() {
                            first_cycle = Some(error);
                        }
                    }
                }
            };

            for id in sorted {
                if let Err(e) = self.initialize_plugin(&id, None) {
                    warn!(plugin = %id, error = %e, "Plugin failed to initialize");
                }
            }
        }

        match first_cycle {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Members of one category eligible for initialization, sorted by id
    /// for deterministic processing.
    fn initializable_members(
        &self,
        category: PluginCategory,
        ids: Option<&[String]>,
    ) -> Vec<String> {
        let table = self.plugins.read();
        let mut members: Vec<String> = table
            .values()
            .filter(|r| r.manifest.category == category)
            .filter(|r| {
                matches!(
                    r.state,
                    PluginState::Discovered | PluginState::Disabled | PluginState::Error
                )
            })
            .filter(|r| {
                ids.is_none_or(|wanted| wanted.iter().any(|id| id == &r.manifest.id))
            })
            .map(|r| r.manifest.id.clone())
            .collect();
        members.sort();
        members
    }

    /// Dependency edges restricted to the given member set.
    fn dependency_graph(&self, members: &[String]) -> HashMap<String, Vec<String>> {
        let member_set: HashSet<&String> = members.iter().collect();
        let table = self.plugins.read();

        members
            .iter()
            .map(|id| {
                let deps = table
                    .get(id)
                    .map(|r| {
                        r.manifest
                            .dependencies
                            .keys()
                            .filter(|dep| member_set.contains(dep))
                            .cloned()
                            .collect()
                    })
                    .unwrap_or_default();
                (id.clone(), deps)
            })
            .collect()
    }

    pub(crate) fn mark_error(&self, id: &str, message: &str) {
        {
            let mut table = self.plugins.write();
            if let Some(record) = table.get_mut(id) {
                record.state = PluginState::Error;
                record.last_error = Some(message.to_string());
            }
        }
        self.events.emit(
            topics::PLUGIN_ERROR,
            &serde_json::json!({ "plugin": id, "error": message }),
        );
    }

    /// Initialize one plugin: instantiate it, hand it its service facade,
    /// register its declared contributions, and transition to `ready`.
    pub(crate) fn initialize_plugin(
        &self,
        id: &str,
        config_override: Option<toml::Table>,
    ) -> BridgeResult<()> {
        let (manifest, legacy, ctor, existing) = {
            let mut table = self.plugins.write();
            let record = table
                .get_mut(id)
                .ok_or_else(|| BridgeError::lifecycle(id, "unknown plugin"))?;

            match record.state {
                PluginState::Ready => return Ok(()),
                PluginState::Loading | PluginState::Unloading => {
                    return Err(BridgeError::lifecycle(
                        id,
                        format!("plugin is busy (state: {})", record.state),
                    ));
                }
                _ => {}
            }

            record.state = PluginState::Loading;
            record.last_error = None;
            (
                record.manifest.clone(),
                record.legacy_adapted,
                record.legacy_ctor.clone(),
                record.instance.take(),
            )
        };

        match self.try_initialize(id, &manifest, legacy, ctor, existing, config_override) {
            Ok((instance, factory)) => {
                let slot = self.next_slot();
                {
                    let mut table = self.plugins.write();
                    if let Some(record) = table.get_mut(id) {
                        record.instance = Some(instance);
                        record.factory = factory;
                        record.state = PluginState::Ready;
                        record.load_order = slot;
                    }
                }
                info!(plugin = %id, version = %manifest.version, "Plugin ready");
                self.events.emit(
                    topics::PLUGIN_LOADED,
                    &serde_json::json!({ "plugin": id, "version": manifest.version }),
                );
                Ok(())
            }
            Err(e) => {
                // Leave no partial contribution behind.
                self.clear_contributions(id);
                self.mark_error(id, &e.to_string());
                Err(e)
            }
        }
    }

    fn try_initialize(
        &self,
        id: &str,
        manifest: &PluginManifest,
        legacy: bool,
        ctor: Option<LegacyConstructor>,
        existing: Option<PluginInstance>,
        config_override: Option<toml::Table>,
    ) -> BridgeResult<(PluginInstance, Option<PluginFactory>)> {
        if !manifest.is_compatible_with_host(&self.host_version) {
            return Err(BridgeError::Dependency {
                plugin_id: id.to_string(),
                message: format!(
                    "requires host version {}, host is {}",
                    manifest.host_version, self.host_version
                ),
            });
        }

        {
            let table = self.plugins.read();
            for (dep, constraint) in &manifest.dependencies {
                let dep_record = table.get(dep).ok_or_else(|| BridgeError::Dependency {
                    plugin_id: id.to_string(),
                    message: format!("missing dependency '{dep}'"),
                })?;
                if dep_record.state != PluginState::Ready {
                    return Err(BridgeError::Dependency {
                        plugin_id: id.to_string(),
                        message: format!(
                            "dependency '{dep}' is not ready (state: {})",
                            dep_record.state
                        ),
                    });
                }
                if !version_satisfies(&dep_record.manifest.version, constraint) {
                    return Err(BridgeError::Dependency {
                        plugin_id: id.to_string(),
                        message: format!(
                            "dependency '{dep}' version {} does not satisfy '{constraint}'",
                            dep_record.manifest.version
                        ),
                    });
                }
            }
        }

        let merged = config_override.unwrap_or_else(|| self.merged_config_for(manifest));

        let (instance, factory) = if legacy {
            let mut instance = match existing {
                Some(PluginInstance::Legacy(instance)) => instance,
                _ => match &ctor {
                    Some(ctor) => ctor(),
                    None => {
                        return Err(BridgeError::lifecycle(
                            id,
                            "legacy plugin has no constructor to instantiate from",
                        ));
                    }
                },
            };
            if instance.hooks().configure {
                instance.configure(&merged);
            }
            (PluginInstance::Legacy(instance), None)
        } else {
            let entry_point = manifest.entry_point();
            let factory = self
                .factories
                .read()
                .get(entry_point)
                .cloned()
                .ok_or_else(|| {
                    BridgeError::lifecycle(
                        id,
                        format!("no factory registered for entry point '{entry_point}'"),
                    )
                })?;

            let mut plugin = factory();
            let locator = ServiceLocator::new(
                id,
                merged,
                ScopedEventBus::new(id, self.events.clone()),
                self.services.clone(),
            );
            plugin.init(&locator)?;
            (PluginInstance::V2(plugin), Some(factory))
        };

        self.register_contributions(manifest, legacy)?;
        Ok((instance, factory))
    }

    /// Register every contribution the manifest declares. Core plugins
    /// bypass permission checks, as do synthesized legacy manifests (the
    /// bridge authored those contributions itself).
    fn register_contributions(&self, manifest: &PluginManifest, legacy: bool) -> BridgeResult<()> {
        let check = manifest.category != PluginCategory::Core && !legacy;
        let id = &manifest.id;

        for command in &manifest.cli.commands {
            self.cli.register(id, command.clone(), check)?;
        }

        for route in &manifest.api.routes {
            self.api.register(id, route.clone(), check)?;
        }
        if let Some(prefix) = &manifest.api.router {
            let route = ApiRoute::new("router", prefix.clone())
                .with_description("Mounted plugin router");
            self.api.register(id, route, check)?;
        }
        if manifest.api.standard.any() {
            self.api.register_standard(id, manifest.api.standard, check)?;
        }

        for panel in &manifest.ui.panels {
            self.ui.register_panel(id, panel.clone(), check)?;
        }
        for item in &manifest.ui.menu {
            self.ui.register_menu_item(id, item.clone(), check)?;
        }
        if !manifest.config.schema.is_empty() {
            self.ui
                .set_settings_schema(id, manifest.config.schema.clone(), check)?;
        }

        Ok(())
    }

    /// The merged configuration a plugin would receive right now.
    pub fn merged_config_for(&self, manifest: &PluginManifest) -> toml::Table {
        let host = plugin_section(&self.host_config.read(), &manifest.id);
        let project = plugin_section(&self.project_config.read(), &manifest.id);
        merge_config(&manifest.config.defaults, &host, &project)
    }

    // ------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------

    /// Shut down one plugin. Idempotent; refuses core plugins.
    pub fn shutdown(&self, id: &str) -> BridgeResult<()> {
        if self.is_core(id) {
            return Err(BridgeError::lifecycle(id, "core plugins cannot be unloaded"));
        }

        {
            let table = self.plugins.read();
            let record = table
                .get(id)
                .ok_or_else(|| BridgeError::lifecycle(id, "unknown plugin"))?;
            if record.state == PluginState::Disabled {
                return Ok(());
            }
        }

        let warnings = self.run_shutdown_hook(id);
        for warning in &warnings {
            warn!(plugin = %id, warning = %warning, "Plugin shutdown hook failed");
        }

        {
            let mut table = self.plugins.write();
            if let Some(record) = table.get_mut(id) {
                record.state = PluginState::Disabled;
            }
        }

        info!(plugin = %id, "Plugin disabled");
        self.events
            .emit(topics::PLUGIN_DISABLED, &serde_json::json!({ "plugin": id }));
        Ok(())
    }

    /// Shut down every non-core plugin in reverse load order.
    pub fn shutdown_all(&self) {
        let mut ids: Vec<(u64, String)> = {
            let table = self.plugins.read();
            table
                .values()
                .filter(|r| r.manifest.category != PluginCategory::Core)
                .filter(|r| r.state == PluginState::Ready)
                .map(|r| (r.load_order, r.manifest.id.clone()))
                .collect()
        };
        ids.sort_by(|a, b| b.0.cmp(&a.0));

        for (_, id) in ids {
            if let Err(e) = self.shutdown(&id) {
                warn!(plugin = %id, error = %e, "Plugin failed to shut down");
            }
        }
    }

    /// Run the shutdown hook, collecting failures as warnings. The record
    /// moves to `unloading` and its instance is dropped.
    pub(crate) fn run_shutdown_hook(&self, id: &str) -> Vec<String> {
        let instance = {
            let mut table = self.plugins.write();
            match table.get_mut(id) {
                Some(record) => {
                    record.state = PluginState::Unloading;
                    record.instance.take()
                }
                None => return Vec::new(),
            }
        };

        let mut warnings = Vec::new();
        if let Some(PluginInstance::V2(mut plugin)) = instance {
            let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| plugin.shutdown()));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warnings.push(format!("shutdown hook failed: {e}")),
                Err(_) => warnings.push("shutdown hook panicked".to_string()),
            }
        }
        warnings
    }

    // ------------------------------------------------------------------
    // Ready step
    // ------------------------------------------------------------------

    /// Build the consumer-facing UI manifest and announce readiness.
    ///
    /// Run once after `initialize`.
    pub fn ready(&self) -> UiManifest {
        let plugins = self.list_plugins();
        let ready = plugins
            .iter()
            .filter(|p| p.state == PluginState::Ready)
            .count();
        let errors = plugins
            .iter()
            .filter(|p| p.state == PluginState::Error)
            .count();

        let mut panels: BTreeMap<String, Vec<RegisteredPanel>> = BTreeMap::new();
        for panel in self.ui.get_all_panels() {
            panels.entry(panel.plugin_id.clone()).or_default().push(panel);
        }

        let manifest = UiManifest {
            plugins,
            panels,
            menu: self.ui.menu_items(),
            ready,
            errors,
        };

        *self.ui_manifest.write() = Some(manifest.clone());

        info!(ready, errors, "Plugins ready");
        self.events.emit(
            topics::PLUGINS_READY,
            &serde_json::json!({ "ready": ready, "errors": errors }),
        );

        manifest
    }

    /// The UI manifest built by the last `ready()` call.
    pub fn ui_manifest(&self) -> Option<UiManifest> {
        self.ui_manifest.read().clone()
    }

    // ------------------------------------------------------------------
    // Consumer queries
    // ------------------------------------------------------------------

    /// Summaries of every plugin, sorted by load order.
    pub fn list_plugins(&self) -> Vec<PluginOverview> {
        let table = self.plugins.read();
        let mut plugins: Vec<PluginOverview> = table.values().map(PluginRecord::overview).collect();
        plugins.sort_by_key(|p| p.load_order);
        plugins
    }

    /// Summary of one plugin.
    pub fn get_plugin(&self, id: &str) -> Option<PluginOverview> {
        self.plugins.read().get(id).map(PluginRecord::overview)
    }

    /// Current state of one plugin.
    pub fn plugin_state(&self, id: &str) -> Option<PluginState> {
        self.plugins.read().get(id).map(|r| r.state)
    }

    /// Current version of one plugin.
    pub fn plugin_version(&self, id: &str) -> Option<String> {
        self.plugins.read().get(id).map(|r| r.manifest.version.clone())
    }

    /// Whether a plugin belongs to the built-in core set.
    pub fn is_core(&self, id: &str) -> bool {
        match self.plugins.read().get(id) {
            Some(record) => record.manifest.category == PluginCategory::Core,
            None => CORE_PLUGINS.iter().any(|(core_id, _, _)| *core_id == id),
        }
    }

    /// Health of one plugin. Plugins without the capability report
    /// `unknown`.
    pub fn plugin_health(&self, id: &str) -> BridgeResult<HealthReport> {
        let table = self.plugins.read();
        let record = table
            .get(id)
            .ok_or_else(|| BridgeError::lifecycle(id, "unknown plugin"))?;

        let report = match &record.instance {
            Some(PluginInstance::V2(plugin)) => plugin
                .health_check()
                .map_or_else(HealthReport::unknown, HealthCheck::health),
            _ => HealthReport::unknown(),
        };
        Ok(report)
    }

    /// Metrics of one plugin. Plugins without the capability report an
    /// empty map.
    pub fn plugin_metrics(&self, id: &str) -> BridgeResult<BTreeMap<String, MetricValue>> {
        let table = self.plugins.read();
        let record = table
            .get(id)
            .ok_or_else(|| BridgeError::lifecycle(id, "unknown plugin"))?;

        let metrics = match &record.instance {
            Some(PluginInstance::V2(plugin)) => plugin
                .metrics_source()
                .map(crate::plugin::MetricsSource::metrics)
                .unwrap_or_default(),
            _ => BTreeMap::new(),
        };
        Ok(metrics)
    }

    /// All CLI contributions, ordered.
    pub fn cli_contributions(&self) -> Vec<RegisteredCommand> {
        self.cli.get_all()
    }

    /// All API routes, ordered.
    pub fn api_routes(&self) -> Vec<RegisteredRoute> {
        self.api.get_all()
    }

    /// All UI panels, ordered.
    pub fn ui_panels(&self) -> Vec<RegisteredPanel> {
        self.ui.get_all_panels()
    }

    /// Number of discovered plugins.
    pub fn count(&self) -> usize {
        self.plugins.read().len()
    }

    /// Number of plugins in the ready state.
    pub fn count_ready(&self) -> usize {
        self.plugins
            .read()
            .values()
            .filter(|r| r.state == PluginState::Ready)
            .count()
    }

    // ------------------------------------------------------------------
    // Hook dispatch for the scanner/analyzer collaborators
    // ------------------------------------------------------------------

    /// Let every ready legacy plugin with a scan hook enrich the report in
    /// place, in load order. A panicking hook is isolated and logged.
    pub fn apply_scan_hooks(&self, report: &mut serde_json::Value) {
        self.apply_legacy_hooks(report, |hooks| hooks.scan, |plugin, payload| {
            plugin.on_scan(payload);
        });
    }

    /// Let every ready legacy plugin with an analyze hook enrich the
    /// summary in place, in load order.
    pub fn apply_analyze_hooks(&self, summary: &mut serde_json::Value) {
        self.apply_legacy_hooks(summary, |hooks| hooks.analyze, |plugin, payload| {
            plugin.on_analyze(payload);
        });
    }

    fn apply_legacy_hooks(
        &self,
        payload: &mut serde_json::Value,
        wants: impl Fn(crate::plugin::LegacyHooks) -> bool,
        invoke: impl Fn(&mut dyn LegacyPlugin, &mut serde_json::Value),
    ) {
        let mut ids: Vec<(u64, String)> = {
            let table = self.plugins.read();
            table
                .values()
                .filter(|r| r.state == PluginState::Ready)
                .map(|r| (r.load_order, r.manifest.id.clone()))
                .collect()
        };
        ids.sort_by_key(|(order, _)| *order);

        for (_, id) in ids {
            let mut table = self.plugins.write();
            let Some(record) = table.get_mut(&id) else { continue };
            let Some(PluginInstance::Legacy(plugin)) = record.instance.as_mut() else {
                continue;
            };
            if !wants(plugin.hooks()) {
                continue;
            }

            let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
                invoke(plugin.as_mut(), payload);
            }));
            if outcome.is_err() {
                warn!(plugin = %id, "Legacy hook panicked");
            }
        }
    }

    // ------------------------------------------------------------------
    // Reload support
    // ------------------------------------------------------------------

    /// Whether a legacy plugin has a constructor to rebuild from.
    pub(crate) fn legacy_has_constructor(&self, id: &str) -> bool {
        self.plugins
            .read()
            .get(id)
            .is_some_and(|r| r.legacy_ctor.is_some())
    }

    /// The merged configuration a plugin sees right now, if it exists.
    pub(crate) fn snapshot_merged_config(&self, id: &str) -> Option<toml::Table> {
        let manifest = self.plugins.read().get(id).map(|r| r.manifest.clone())?;
        Some(self.merged_config_for(&manifest))
    }

    /// Drop the plugin's instance and resolved factory handle.
    pub(crate) fn unload_plugin_code(&self, id: &str) {
        let mut table = self.plugins.write();
        if let Some(record) = table.get_mut(id) {
            record.instance = None;
            record.factory = None;
        }
    }

    /// Remove every contribution a plugin registered. Returns the count.
    pub(crate) fn clear_contributions(&self, id: &str) -> usize {
        self.cli.unregister_all(id) + self.api.unregister_all(id) + self.ui.unregister_all(id)
    }

    /// Re-run discovery for a single plugin, replacing its manifest
    /// atomically.
    pub(crate) fn rediscover_single(&self, id: &str) -> BridgeResult<()> {
        let (source, legacy, ctor) = {
            let table = self.plugins.read();
            let record = table
                .get(id)
                .ok_or_else(|| BridgeError::lifecycle(id, "unknown plugin"))?;
            (
                record.manifest.source.clone(),
                record.legacy_adapted,
                record.legacy_ctor.clone(),
            )
        };

        let manifest = if let Some(dir) = source {
            let manifest = PluginManifest::load(&dir.join(MANIFEST_FILE))?;
            if manifest.id != id {
                return Err(BridgeError::manifest(
                    id,
                    format!("manifest id changed to '{}' during reload", manifest.id),
                ));
            }
            manifest
        } else if legacy {
            let ctor = ctor.ok_or_else(|| {
                BridgeError::lifecycle(id, "legacy plugin has no loaded module to replace")
            })?;
            let probe = ctor();
            PluginManifest::synthesize_for_legacy(
                id,
                probe.name(),
                probe.version(),
                probe.description().unwrap_or_default(),
                probe.ui_hint(),
            )
        } else {
            return Err(BridgeError::lifecycle(
                id,
                "plugin has no manifest source to rediscover from",
            ));
        };

        self.checker.grant_from_manifest(&manifest);
        let mut table = self.plugins.write();
        if let Some(record) = table.get_mut(id) {
            record.manifest = manifest;
            record.state = PluginState::Discovered;
            record.last_error = None;
        }
        Ok(())
    }
}

/// Depth-first topological sort with a temporary mark for cycle detection.
///
/// Returns the order dependencies-first, or the cycle path (first node
/// repeated at the end) when one exists.
fn topo_sort(
    members: &[String],
    graph: &HashMap<String, Vec<String>>,
) -> Result<Vec<String>, Vec<String>> {
    fn visit(
        node: &String,
        graph: &HashMap<String, Vec<String>>,
        permanent: &mut HashSet<String>,
        stack: &mut Vec<String>,
        order: &mut Vec<String>,
    ) -> Result<(), Vec<String>> {
        if permanent.contains(node) {
            return Ok(());
        }
        if let Some(position) = stack.iter().position(|n| n == node) {
            let mut cycle: Vec<String> = stack[position..].to_vec();
            cycle.push(node.clone());
            return Err(cycle);
        }

        stack.push(node.clone());
        if let Some(deps) = graph.get(node) {
            for dep in deps {
                visit(dep, graph, permanent, stack, order)?;
            }
        }
        stack.pop();

        permanent.insert(node.clone());
        order.push(node.clone());
        Ok(())
    }

    let mut permanent = HashSet::new();
    let mut order = Vec::new();

    for node in members {
        visit(node, graph, &mut permanent, &mut Vec::new(), &mut order)?;
    }

    Ok(order)
}
