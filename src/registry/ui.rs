//! UI panel and menu contributions.
//!
//! Besides panels and menu items, the registry keeps one optional settings
//! schema per plugin, used by the host to auto-generate configuration forms.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::{scoped_key, validate_local_name};
use crate::error::{BridgeError, BridgeResult};
use crate::permissions::{Permission, PermissionChecker};

/// Where a panel is shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PanelLocation {
    /// Main sidebar.
    Sidebar,
    /// Settings screen.
    Settings,
}

impl Default for PanelLocation {
    fn default() -> Self {
        Self::Sidebar
    }
}

/// A UI panel declared by a plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UiPanel {
    /// Local panel name, unique within the owning plugin.
    pub name: String,
    /// Display title.
    #[serde(default)]
    pub title: String,
    /// Optional icon identifier.
    #[serde(default)]
    pub icon: Option<String>,
    /// Panel placement.
    #[serde(default)]
    pub location: PanelLocation,
    /// Explicit sort order within listings.
    #[serde(default)]
    pub order: i64,
}

impl UiPanel {
    /// Create a sidebar panel with a name and title.
    pub fn new(name: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            title: title.into(),
            icon: None,
            location: PanelLocation::Sidebar,
            order: 0,
        }
    }

    /// Place the panel in the settings screen.
    pub fn in_settings(mut self) -> Self {
        self.location = PanelLocation::Settings;
        self
    }

    /// Set the sort order.
    pub fn with_order(mut self, order: i64) -> Self {
        self.order = order;
        self
    }
}

/// A menu item declared by a plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MenuItem {
    /// Local item name, unique within the owning plugin.
    pub name: String,
    /// Display label.
    #[serde(default)]
    pub label: String,
    /// Parent item name for nesting (scoped key of another item).
    #[serde(default)]
    pub parent: Option<String>,
    /// Whether this item renders as a separator.
    #[serde(default)]
    pub separator: bool,
    /// Explicit sort order within listings.
    #[serde(default)]
    pub order: i64,
}

impl MenuItem {
    /// Create a menu item with a name and label.
    pub fn new(name: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            parent: None,
            separator: false,
            order: 0,
        }
    }

    /// Nest under a parent item.
    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /// Mark as a separator.
    pub fn separator(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            label: String::new(),
            parent: None,
            separator: true,
            order: 0,
        }
    }

    /// Set the sort order.
    pub fn with_order(mut self, order: i64) -> Self {
        self.order = order;
        self
    }
}

/// A panel accepted by the registry.
#[derive(Debug, Clone, Serialize)]
pub struct RegisteredPanel {
    /// Owning plugin id (back-reference, not ownership).
    pub plugin_id: String,
    /// Scoped key `"<plugin_id>.<name>"`.
    pub key: String,
    /// The contribution itself.
    pub panel: UiPanel,
}

/// A menu item accepted by the registry.
#[derive(Debug, Clone, Serialize)]
pub struct RegisteredMenuItem {
    /// Owning plugin id (back-reference, not ownership).
    pub plugin_id: String,
    /// Scoped key `"<plugin_id>.<name>"`.
    pub key: String,
    /// The contribution itself.
    pub item: MenuItem,
}

/// One level of the nested menu view.
#[derive(Debug, Clone, Serialize)]
pub struct MenuNode {
    /// The item at this node.
    pub item: RegisteredMenuItem,
    /// Items whose `parent` names this node.
    pub children: Vec<RegisteredMenuItem>,
}

/// Registry of plugin UI contributions.
#[derive(Debug)]
pub struct UiRegistry {
    checker: Arc<PermissionChecker>,
    panels: RwLock<BTreeMap<String, RegisteredPanel>>,
    menu: RwLock<BTreeMap<String, RegisteredMenuItem>>,
    schemas: RwLock<HashMap<String, toml::Table>>,
}

impl UiRegistry {
    /// Create an empty registry backed by the given permission checker.
    pub fn new(checker: Arc<PermissionChecker>) -> Self {
        Self {
            checker,
            panels: RwLock::new(BTreeMap::new()),
            menu: RwLock::new(BTreeMap::new()),
            schemas: RwLock::new(HashMap::new()),
        }
    }

    /// Register a panel for a plugin.
    pub fn register_panel(
        &self,
        plugin_id: &str,
        panel: UiPanel,
        check_permissions: bool,
    ) -> BridgeResult<RegisteredPanel> {
        validate_local_name(&panel.name)?;

        if check_permissions {
            self.checker.check(plugin_id, Permission::RegisterUi)?;
        }

        let key = scoped_key(plugin_id, &panel.name);
        let mut panels = self.panels.write();
        if panels.contains_key(&key) {
            return Err(BridgeError::Validation(format!(
                "Panel '{key}' is already registered"
            )));
        }

        let registered = RegisteredPanel {
            plugin_id: plugin_id.to_string(),
            key: key.clone(),
            panel,
        };
        panels.insert(key.clone(), registered.clone());

        tracing::debug!(plugin = plugin_id, panel = %key, "Registered UI panel");
        Ok(registered)
    }

    /// Register a menu item for a plugin.
    pub fn register_menu_item(
        &self,
        plugin_id: &str,
        item: MenuItem,
        check_permissions: bool,
    ) -> BridgeResult<RegisteredMenuItem> {
        validate_local_name(&item.name)?;

        if check_permissions {
            self.checker.check(plugin_id, Permission::RegisterUi)?;
        }

        let key = scoped_key(plugin_id, &item.name);
        let mut menu = self.menu.write();
        if menu.contains_key(&key) {
            return Err(BridgeError::Validation(format!(
                "Menu item '{key}' is already registered"
            )));
        }

        let registered = RegisteredMenuItem {
            plugin_id: plugin_id.to_string(),
            key: key.clone(),
            item,
        };
        menu.insert(key.clone(), registered.clone());

        tracing::debug!(plugin = plugin_id, item = %key, "Registered menu item");
        Ok(registered)
    }

    /// Store a plugin-wide settings schema for auto-generated forms.
    pub fn set_settings_schema(
        &self,
        plugin_id: &str,
        schema: toml::Table,
        check_permissions: bool,
    ) -> BridgeResult<()> {
        if check_permissions {
            self.checker.check(plugin_id, Permission::RegisterUi)?;
        }

        self.schemas.write().insert(plugin_id.to_string(), schema);
        Ok(())
    }

    /// The stored settings schema for a plugin, if any.
    pub fn settings_schema(&self, plugin_id: &str) -> Option<toml::Table> {
        self.schemas.read().get(plugin_id).cloned()
    }

    /// Remove one panel. Returns whether anything was removed.
    pub fn unregister_panel(&self, plugin_id: &str, name: &str) -> bool {
        self.panels
            .write()
            .remove(&scoped_key(plugin_id, name))
            .is_some()
    }

    /// Remove one menu item. Returns whether anything was removed.
    pub fn unregister_menu_item(&self, plugin_id: &str, name: &str) -> bool {
        self.menu
            .write()
            .remove(&scoped_key(plugin_id, name))
            .is_some()
    }

    /// Remove every contribution owned by a plugin (panels, menu items, and
    /// its settings schema). Returns the number of panels and items removed.
    pub fn unregister_all(&self, plugin_id: &str) -> usize {
        let mut removed = 0;

        {
            let mut panels = self.panels.write();
            let before = panels.len();
            panels.retain(|_, p| p.plugin_id != plugin_id);
            removed += before - panels.len();
        }
        {
            let mut menu = self.menu.write();
            let before = menu.len();
            menu.retain(|_, m| m.plugin_id != plugin_id);
            removed += before - menu.len();
        }
        self.schemas.write().remove(plugin_id);

        removed
    }

    /// All panels, sorted by explicit order, then plugin id, then name.
    pub fn get_all_panels(&self) -> Vec<RegisteredPanel> {
        let mut all: Vec<RegisteredPanel> = self.panels.read().values().cloned().collect();
        all.sort_by(|a, b| {
            a.panel
                .order
                .cmp(&b.panel.order)
                .then_with(|| a.plugin_id.cmp(&b.plugin_id))
                .then_with(|| a.panel.name.cmp(&b.panel.name))
        });
        all
    }

    /// Panels placed in the sidebar.
    pub fn sidebar_panels(&self) -> Vec<RegisteredPanel> {
        self.get_all_panels()
            .into_iter()
            .filter(|p| p.panel.location == PanelLocation::Sidebar)
            .collect()
    }

    /// Panels placed in the settings screen.
    pub fn settings_panels(&self) -> Vec<RegisteredPanel> {
        self.get_all_panels()
            .into_iter()
            .filter(|p| p.panel.location == PanelLocation::Settings)
            .collect()
    }

    /// All menu items, sorted by explicit order, then plugin id, then name.
    pub fn menu_items(&self) -> Vec<RegisteredMenuItem> {
        let mut all: Vec<RegisteredMenuItem> = self.menu.read().values().cloned().collect();
        all.sort_by(|a, b| {
            a.item
                .order
                .cmp(&b.item.order)
                .then_with(|| a.plugin_id.cmp(&b.plugin_id))
                .then_with(|| a.item.name.cmp(&b.item.name))
        });
        all
    }

    /// Menu items grouped one level deep: top-level items with their
    /// children attached. An item whose parent does not exist is treated as
    /// top-level.
    pub fn menu_tree(&self) -> Vec<MenuNode> {
        let items = self.menu_items();
        let keys: std::collections::HashSet<String> =
            items.iter().map(|i| i.key.clone()).collect();

        let mut children_of: HashMap<String, Vec<RegisteredMenuItem>> = HashMap::new();
        let mut roots = Vec::new();

        for item in items {
            match item.item.parent.as_ref().filter(|p| keys.contains(*p)) {
                Some(parent) => children_of.entry(parent.clone()).or_default().push(item),
                None => roots.push(item),
            }
        }

        roots
            .into_iter()
            .map(|item| {
                let children = children_of.remove(&item.key).unwrap_or_default();
                MenuNode { item, children }
            })
            .collect()
    }

    /// Panels owned by one plugin.
    pub fn panels_by_plugin(&self, plugin_id: &str) -> Vec<RegisteredPanel> {
        self.get_all_panels()
            .into_iter()
            .filter(|p| p.plugin_id == plugin_id)
            .collect()
    }

    /// Number of registered panels.
    pub fn panel_count(&self) -> usize {
        self.panels.read().len()
    }

    /// Number of registered menu items.
    pub fn menu_item_count(&self) -> usize {
        self.menu.read().len()
    }
}
