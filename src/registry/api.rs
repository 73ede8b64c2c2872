//! API route contributions.
//!
//! Routes are namespaced under `/plugins/<plugin_id>` so plugin paths can
//! never shadow host routes. The registry also generates a small set of
//! standard endpoints (health, metrics, config, logs) a plugin can opt into
//! per-endpoint.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::{scoped_key, validate_local_name, RESERVED_NAMES};
use crate::error::{BridgeError, BridgeResult};
use crate::permissions::{Permission, PermissionChecker};

/// HTTP method of a plugin route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
}

impl Default for HttpMethod {
    fn default() -> Self {
        Self::Get
    }
}

impl HttpMethod {
    /// Wire name (`GET`, `POST`, ...).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Patch => "PATCH",
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An API route declared by a plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiRoute {
    /// Local route name, unique within the owning plugin.
    pub name: String,
    /// Path relative to the plugin's namespace, starting with `/`.
    pub path: String,
    /// HTTP method.
    #[serde(default)]
    pub method: HttpMethod,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Tags for filtering.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Explicit sort order within listings.
    #[serde(default)]
    pub order: i64,
    /// Whether the route requires an authenticated caller.
    #[serde(default)]
    pub auth_required: bool,
    /// Whether the route is deprecated.
    #[serde(default)]
    pub deprecated: bool,
}

impl ApiRoute {
    /// Create a route with a name and path.
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            method: HttpMethod::Get,
            description: String::new(),
            tags: Vec::new(),
            order: 0,
            auth_required: false,
            deprecated: false,
        }
    }

    /// Set the HTTP method.
    pub fn with_method(mut self, method: HttpMethod) -> Self {
        self.method = method;
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Require an authenticated caller.
    pub fn with_auth(mut self) -> Self {
        self.auth_required = true;
        self
    }
}

/// Standard generated endpoints a plugin can opt into.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StandardEndpoints {
    /// `/plugins/<id>/health`
    pub health: bool,
    /// `/plugins/<id>/metrics`
    pub metrics: bool,
    /// `/plugins/<id>/config`
    pub config: bool,
    /// `/plugins/<id>/logs`
    pub logs: bool,
}

impl StandardEndpoints {
    /// Whether any endpoint is enabled.
    pub fn any(&self) -> bool {
        self.health || self.metrics || self.config || self.logs
    }
}

/// A route accepted by the registry.
#[derive(Debug, Clone, Serialize)]
pub struct RegisteredRoute {
    /// Owning plugin id (back-reference, not ownership).
    pub plugin_id: String,
    /// Scoped key `"<plugin_id>.<name>"`.
    pub key: String,
    /// Full mount path, namespaced under `/plugins/<plugin_id>`.
    pub full_path: String,
    /// The contribution itself.
    pub route: ApiRoute,
}

/// Registry of plugin API routes.
#[derive(Debug)]
pub struct ApiRegistry {
    checker: Arc<PermissionChecker>,
    routes: RwLock<BTreeMap<String, RegisteredRoute>>,
}

impl ApiRegistry {
    /// Create an empty registry backed by the given permission checker.
    pub fn new(checker: Arc<PermissionChecker>) -> Self {
        Self {
            checker,
            routes: RwLock::new(BTreeMap::new()),
        }
    }

    /// Register a route for a plugin.
    ///
    /// Fails with `Validation` on a bad name, an unsafe path, or a conflict,
    /// and with `PermissionDenied` when the plugin lacks `register_api`.
    /// Nothing is registered on failure.
    pub fn register(
        &self,
        plugin_id: &str,
        route: ApiRoute,
        check_permissions: bool,
    ) -> BridgeResult<RegisteredRoute> {
        validate_local_name(&route.name)?;
        validate_path(&route.path)?;

        if check_permissions {
            self.checker.check(plugin_id, Permission::RegisterApi)?;
        }

        self.insert(plugin_id, route)
    }

    /// Register the opted-in standard endpoints for a plugin.
    ///
    /// Generated names (`health`, `metrics`, ...) are host-reserved at the
    /// top level but allowed here because they live inside the plugin's
    /// namespace.
    pub fn register_standard(
        &self,
        plugin_id: &str,
        endpoints: StandardEndpoints,
        check_permissions: bool,
    ) -> BridgeResult<Vec<RegisteredRoute>> {
        if check_permissions && endpoints.any() {
            self.checker.check(plugin_id, Permission::RegisterApi)?;
        }

        let selected: [(&str, bool); 4] = [
            ("health", endpoints.health),
            ("metrics", endpoints.metrics),
            ("config", endpoints.config),
            ("logs", endpoints.logs),
        ];

        let mut registered = Vec::new();
        for (name, enabled) in selected {
            if !enabled {
                continue;
            }
            let route = ApiRoute::new(name, format!("/{name}"))
                .with_description(format!("Generated {name} endpoint"));
            registered.push(self.insert(plugin_id, route)?);
        }

        Ok(registered)
    }

    fn insert(&self, plugin_id: &str, route: ApiRoute) -> BridgeResult<RegisteredRoute> {
        let key = scoped_key(plugin_id, &route.name);
        let mut routes = self.routes.write();
        if routes.contains_key(&key) {
            return Err(BridgeError::Validation(format!(
                "Route '{key}' is already registered"
            )));
        }

        let full_path = format!("/plugins/{plugin_id}{}", route.path);
        let registered = RegisteredRoute {
            plugin_id: plugin_id.to_string(),
            key: key.clone(),
            full_path,
            route,
        };
        routes.insert(key.clone(), registered.clone());

        tracing::debug!(
            plugin = plugin_id,
            route = %key,
            path = %registered.full_path,
            "Registered API route"
        );
        Ok(registered)
    }

    /// Remove one route. Returns whether anything was removed.
    pub fn unregister(&self, plugin_id: &str, name: &str) -> bool {
        self.routes
            .write()
            .remove(&scoped_key(plugin_id, name))
            .is_some()
    }

    /// Remove every route owned by a plugin. Returns the removed count.
    pub fn unregister_all(&self, plugin_id: &str) -> usize {
        let mut routes = self.routes.write();
        let before = routes.len();
        routes.retain(|_, r| r.plugin_id != plugin_id);
        before - routes.len()
    }

    /// Look up one route.
    pub fn get(&self, plugin_id: &str, name: &str) -> Option<RegisteredRoute> {
        self.routes.read().get(&scoped_key(plugin_id, name)).cloned()
    }

    /// All routes, sorted by explicit order, then plugin id, then name.
    pub fn get_all(&self) -> Vec<RegisteredRoute> {
        let mut all: Vec<RegisteredRoute> = self.routes.read().values().cloned().collect();
        all.sort_by(|a, b| {
            a.route
                .order
                .cmp(&b.route.order)
                .then_with(|| a.plugin_id.cmp(&b.plugin_id))
                .then_with(|| a.route.name.cmp(&b.route.name))
        });
        all
    }

    /// Routes using a method.
    pub fn by_method(&self, method: HttpMethod) -> Vec<RegisteredRoute> {
        self.get_all()
            .into_iter()
            .filter(|r| r.route.method == method)
            .collect()
    }

    /// Routes carrying a tag.
    pub fn by_tag(&self, tag: &str) -> Vec<RegisteredRoute> {
        self.get_all()
            .into_iter()
            .filter(|r| r.route.tags.iter().any(|t| t == tag))
            .collect()
    }

    /// Routes owned by one plugin.
    pub fn by_plugin(&self, plugin_id: &str) -> Vec<RegisteredRoute> {
        self.get_all()
            .into_iter()
            .filter(|r| r.plugin_id == plugin_id)
            .collect()
    }

    /// Number of registered routes.
    pub fn len(&self) -> usize {
        self.routes.read().len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.routes.read().is_empty()
    }
}

/// Validate a declared route path.
fn validate_path(path: &str) -> BridgeResult<()> {
    if path.is_empty() || !path.starts_with('/') {
        return Err(BridgeError::Validation(format!(
            "Route path '{path}' must start with '/'"
        )));
    }

    if path.split('/').any(|segment| segment == "..") {
        return Err(BridgeError::Validation(format!(
            "Route path '{path}' must not contain '..' segments"
        )));
    }

    if path.contains(char::is_whitespace) {
        return Err(BridgeError::Validation(format!(
            "Route path '{path}' must not contain whitespace"
        )));
    }

    // Top-level host names stay off limits even as a path.
    let first_segment = path.trim_start_matches('/').split('/').next().unwrap_or("");
    if RESERVED_NAMES.contains(&first_segment) {
        return Err(BridgeError::Validation(format!(
            "Route path '{path}' claims reserved top-level name '{first_segment}'"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with_grant(plugin_id: &str) -> ApiRegistry {
        let checker = Arc::new(PermissionChecker::new());
        checker.grant_all(plugin_id);
        ApiRegistry::new(checker)
    }

    #[test]
    fn test_register_namespaces_path() {
        let registry = registry_with_grant("sample");

        let registered = registry
            .register("sample", ApiRoute::new("report", "/report"), true)
            .unwrap();
        assert_eq!(registered.full_path, "/plugins/sample/report");
    }

    #[test]
    fn test_permission_denied_leaves_registry_empty() {
        let registry = ApiRegistry::new(Arc::new(PermissionChecker::new()));

        let err = registry
            .register("sample", ApiRoute::new("report", "/report"), true)
            .unwrap_err();
        match err {
            BridgeError::PermissionDenied { plugin_id, permission } => {
                assert_eq!(plugin_id, "sample");
                assert_eq!(permission, Permission::RegisterApi);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn test_path_traversal_rejected() {
        let registry = registry_with_grant("sample");

        let err = registry
            .register("sample", ApiRoute::new("bad", "/../../etc/passwd"), true)
            .unwrap_err();
        assert!(matches!(err, BridgeError::Validation(_)));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_relative_path_rejected() {
        let registry = registry_with_grant("sample");

        assert!(registry
            .register("sample", ApiRoute::new("bad", "report"), true)
            .is_err());
    }

    #[test]
    fn test_reserved_path_segment_rejected() {
        let registry = registry_with_grant("sample");

        assert!(registry
            .register("sample", ApiRoute::new("mine", "/health"), true)
            .is_err());
    }

    #[test]
    fn test_standard_endpoints_generated() {
        let registry = registry_with_grant("sample");

        let endpoints = StandardEndpoints {
            health: true,
            metrics: true,
            config: false,
            logs: false,
        };
        let registered = registry.register_standard("sample", endpoints, true).unwrap();

        assert_eq!(registered.len(), 2);
        assert!(registry.get("sample", "health").is_some());
        assert_eq!(
            registry.get("sample", "health").unwrap().full_path,
            "/plugins/sample/health"
        );
        assert!(registry.get("sample", "logs").is_none());
    }

    #[test]
    fn test_by_method_filter() {
        let registry = registry_with_grant("sample");

        registry
            .register(
                "sample",
                ApiRoute::new("list", "/items").with_method(HttpMethod::Get),
                true,
            )
            .unwrap();
        registry
            .register(
                "sample",
                ApiRoute::new("create", "/items").with_method(HttpMethod::Post),
                true,
            )
            .unwrap();

        assert_eq!(registry.by_method(HttpMethod::Post).len(), 1);
        assert_eq!(registry.by_method(HttpMethod::Get).len(), 1);
    }

    #[test]
    fn test_unregister_all_counts() {
        let registry = registry_with_grant("sample");

        registry
            .register("sample", ApiRoute::new("one", "/one"), true)
            .unwrap();
        registry
            .register("sample", ApiRoute::new("two", "/two"), true)
            .unwrap();

        assert_eq!(registry.unregister_all("sample"), 2);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_method_wire_format() {
        let json = serde_json::to_string(&HttpMethod::Delete).unwrap();
        assert_eq!(json, "\"DELETE\"");
    }
}
