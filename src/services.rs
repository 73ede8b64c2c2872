//! Per-plugin service facade.
//!
//! A `ServiceLocator` is created once per plugin at initialization and handed
//! to the plugin's `init` hook. It bundles everything a plugin may use from
//! the host: a plugin-scoped logger, the merged configuration, the scoped
//! event bus, and a named service lookup.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{BridgeError, BridgeResult};
use crate::events::ScopedEventBus;

/// Host-registered named services, shared across all locators.
pub type ServiceMap = Arc<RwLock<HashMap<String, Arc<dyn Any + Send + Sync>>>>;

/// Logger prefixed with the owning plugin's id.
#[derive(Debug, Clone)]
pub struct PluginLogger {
    plugin_id: String,
}

impl PluginLogger {
    /// Create a logger for one plugin.
    pub fn new(plugin_id: impl Into<String>) -> Self {
        Self {
            plugin_id: plugin_id.into(),
        }
    }

    /// The plugin this logger is scoped to.
    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    /// Log at debug level.
    pub fn debug(&self, message: &str) {
        tracing::debug!(plugin = %self.plugin_id, "{}", message);
    }

    /// Log at info level.
    pub fn info(&self, message: &str) {
        tracing::info!(plugin = %self.plugin_id, "{}", message);
    }

    /// Log at warn level.
    pub fn warn(&self, message: &str) {
        tracing::warn!(plugin = %self.plugin_id, "{}", message);
    }

    /// Log at error level.
    pub fn error(&self, message: &str) {
        tracing::error!(plugin = %self.plugin_id, "{}", message);
    }
}

/// Per-plugin facade over host capabilities.
#[derive(Debug)]
pub struct ServiceLocator {
    plugin_id: String,
    logger: PluginLogger,
    config: toml::Table,
    events: ScopedEventBus,
    services: ServiceMap,
}

impl ServiceLocator {
    /// Assemble a locator for one plugin.
    pub(crate) fn new(
        plugin_id: impl Into<String>,
        config: toml::Table,
        events: ScopedEventBus,
        services: ServiceMap,
    ) -> Self {
        let plugin_id = plugin_id.into();
        Self {
            logger: PluginLogger::new(plugin_id.clone()),
            plugin_id,
            config,
            events,
            services,
        }
    }

    /// The plugin this locator belongs to.
    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    /// Plugin-scoped logger.
    pub fn logger(&self) -> &PluginLogger {
        &self.logger
    }

    /// Merged configuration: manifest defaults, overridden by host settings,
    /// overridden by project settings.
    pub fn config(&self) -> &toml::Table {
        &self.config
    }

    /// Scoped event bus proxy.
    pub fn events(&self) -> &ScopedEventBus {
        &self.events
    }

    /// Look up a host-registered service by name.
    pub fn get_service(&self, name: &str) -> BridgeResult<Arc<dyn Any + Send + Sync>> {
        self.services
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| BridgeError::ServiceNotFound(name.to_string()))
    }

    /// Look up a service and downcast it to a concrete type.
    pub fn get_service_as<T: Send + Sync + 'static>(&self, name: &str) -> BridgeResult<Arc<T>> {
        let service = self.get_service(name)?;
        service.downcast::<T>().map_err(|_| {
            BridgeError::Validation(format!(
                "Service '{name}' is registered with a different type"
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;

    fn locator_with_services(services: ServiceMap) -> ServiceLocator {
        let bus = Arc::new(EventBus::new());
        ServiceLocator::new(
            "sample",
            toml::Table::new(),
            ScopedEventBus::new("sample", bus),
            services,
        )
    }

    #[test]
    fn test_get_service_missing() {
        let locator = locator_with_services(ServiceMap::default());

        let err = locator.get_service("scanner").unwrap_err();
        assert!(matches!(err, BridgeError::ServiceNotFound(name) if name == "scanner"));
    }

    #[test]
    fn test_get_service_as_downcasts() {
        let services = ServiceMap::default();
        services
            .write()
            .insert("answer".to_string(), Arc::new(42_u64) as Arc<dyn Any + Send + Sync>);

        let locator = locator_with_services(services);
        let answer: Arc<u64> = locator.get_service_as("answer").unwrap();
        assert_eq!(*answer, 42);
    }

    #[test]
    fn test_get_service_as_wrong_type() {
        let services = ServiceMap::default();
        services
            .write()
            .insert("answer".to_string(), Arc::new(42_u64) as Arc<dyn Any + Send + Sync>);

        let locator = locator_with_services(services);
        let result: BridgeResult<Arc<String>> = locator.get_service_as("answer");
        assert!(matches!(result, Err(BridgeError::Validation(_))));
    }

    #[test]
    fn test_logger_is_scoped() {
        let locator = locator_with_services(ServiceMap::default());
        assert_eq!(locator.logger().plugin_id(), "sample");
        // Smoke test; output goes through tracing.
        locator.logger().info("initialized");
    }
}
