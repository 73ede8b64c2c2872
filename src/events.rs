//! In-process event bus.
//!
//! Dispatch is synchronous and runs subscribers in registration order. A
//! subscriber that fails (error or panic) is isolated and logged; it never
//! affects other subscribers or the emitter. Plugins emit through a
//! per-plugin proxy that stamps payloads with the emitting plugin's id.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

/// Well-known lifecycle topics.
pub mod topics {
    /// A plugin reached `ready`.
    pub const PLUGIN_LOADED: &str = "plugin.loaded";
    /// A plugin failed during discovery or initialization.
    pub const PLUGIN_ERROR: &str = "plugin.error";
    /// A plugin was shut down.
    pub const PLUGIN_DISABLED: &str = "plugin.disabled";
    /// A hot reload succeeded.
    pub const PLUGIN_RELOADED: &str = "plugin.reloaded";
    /// A hot reload failed.
    pub const PLUGIN_RELOAD_FAILED: &str = "plugin.reload_failed";
    /// The bulk initialization pass finished.
    pub const PLUGINS_READY: &str = "plugins.ready";
}

/// Token returned by `subscribe`, used to unsubscribe.
pub type SubscriptionId = u64;

type EventCallback = Arc<dyn Fn(&Value) -> anyhow::Result<()> + Send + Sync>;

struct Subscriber {
    id: SubscriptionId,
    callback: EventCallback,
}

/// Topic/subscriber fan-out shared by the bridge and all plugins.
#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<HashMap<String, Vec<Subscriber>>>,
    next_id: AtomicU64,
    emitted: AtomicU64,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("topics", &self.subscribers.read().len())
            .field("emitted", &self.emitted.load(Ordering::Relaxed))
            .finish()
    }
}

impl EventBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a callback to a topic. Returns a token for `unsubscribe`.
    pub fn subscribe<F>(&self, topic: &str, callback: F) -> SubscriptionId
    where
        F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.subscribers
            .write()
            .entry(topic.to_string())
            .or_default()
            .push(Subscriber {
                id,
                callback: Arc::new(callback),
            });

        tracing::debug!(topic, subscription = id, "Subscribed to topic");
        id
    }

    /// Remove a subscription. Returns whether anything was removed.
    pub fn unsubscribe(&self, topic: &str, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write();
        let Some(list) = subscribers.get_mut(topic) else {
            return false;
        };

        let before = list.len();
        list.retain(|s| s.id != id);
        let removed = list.len() != before;
        if list.is_empty() {
            subscribers.remove(topic);
        }
        removed
    }

    /// Emit a payload to every subscriber of a topic, in registration order.
    pub fn emit(&self, topic: &str, payload: &Value) {
        self.emitted.fetch_add(1, Ordering::Relaxed);

        // Snapshot under the read lock so a subscriber can subscribe or
        // unsubscribe without deadlocking the dispatch.
        let callbacks: Vec<(SubscriptionId, EventCallback)> = {
            let subscribers = self.subscribers.read();
            match subscribers.get(topic) {
                Some(list) => list.iter().map(|s| (s.id, s.callback.clone())).collect(),
                None => return,
            }
        };

        for (id, callback) in callbacks {
            let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| callback(payload)));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(topic, subscription = id, error = %e, "Subscriber failed");
                }
                Err(_) => {
                    tracing::warn!(topic, subscription = id, "Subscriber panicked");
                }
            }
        }
    }

    /// Number of subscribers on a topic.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.subscribers.read().get(topic).map_or(0, Vec::len)
    }

    /// Total number of emitted events.
    pub fn emitted_count(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }
}

/// Per-plugin emit proxy.
///
/// Stamps every outgoing object payload with the emitting plugin's id under
/// the `plugin` key; non-object payloads are wrapped.
#[derive(Clone)]
pub struct ScopedEventBus {
    plugin_id: String,
    bus: Arc<EventBus>,
}

impl std::fmt::Debug for ScopedEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedEventBus")
            .field("plugin_id", &self.plugin_id)
            .finish()
    }
}

impl ScopedEventBus {
    /// Create a proxy for one plugin.
    pub fn new(plugin_id: impl Into<String>, bus: Arc<EventBus>) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            bus,
        }
    }

    /// The plugin this proxy emits as.
    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    /// Emit a payload stamped with this plugin's id.
    pub fn emit(&self, topic: &str, payload: &Value) {
        let stamped = match payload {
            Value::Object(map) => {
                let mut map = map.clone();
                map.insert("plugin".to_string(), Value::String(self.plugin_id.clone()));
                Value::Object(map)
            }
            other => serde_json::json!({
                "plugin": self.plugin_id,
                "payload": other,
            }),
        };
        self.bus.emit(topic, &stamped);
    }

    /// Subscribe on the shared bus.
    pub fn subscribe<F>(&self, topic: &str, callback: F) -> SubscriptionId
    where
        F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.bus.subscribe(topic, callback)
    }

    /// Unsubscribe from the shared bus.
    pub fn unsubscribe(&self, topic: &str, id: SubscriptionId) -> bool {
        self.bus.unsubscribe(topic, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_all_subscribers_receive_payload() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let count = count.clone();
            bus.subscribe("scan.done", move |_| {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }

        bus.emit("scan.done", &serde_json::json!({"files": 10}));
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_failing_subscriber_does_not_block_others() {
        let bus = EventBus::new();
        let received = Arc::new(AtomicUsize::new(0));

        bus.subscribe("scan.done", |_| anyhow::bail!("broken subscriber"));
        {
            let received = received.clone();
            bus.subscribe("scan.done", move |_| {
                received.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }

        bus.emit("scan.done", &Value::Null);
        assert_eq!(received.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_subscriber_is_isolated() {
        let bus = EventBus::new();
        let received = Arc::new(AtomicUsize::new(0));

        bus.subscribe("scan.done", |_| panic!("boom"));
        {
            let received = received.clone();
            bus.subscribe("scan.done", move |_| {
                received.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }

        bus.emit("scan.done", &Value::Null);
        assert_eq!(received.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));

        let id = {
            let count = count.clone();
            bus.subscribe("scan.done", move |_| {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        };

        assert!(bus.unsubscribe("scan.done", id));
        assert!(!bus.unsubscribe("scan.done", id));

        bus.emit("scan.done", &Value::Null);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_scoped_bus_stamps_object_payloads() {
        let bus = Arc::new(EventBus::new());
        let seen = Arc::new(parking_lot::Mutex::new(None));

        {
            let seen = seen.clone();
            bus.subscribe("custom.topic", move |payload| {
                *seen.lock() = Some(payload.clone());
                Ok(())
            });
        }

        let scoped = ScopedEventBus::new("sample", bus);
        scoped.emit("custom.topic", &serde_json::json!({"value": 1}));

        let payload = seen.lock().clone().unwrap();
        assert_eq!(payload["plugin"], "sample");
        assert_eq!(payload["value"], 1);
    }

    #[test]
    fn test_scoped_bus_wraps_scalar_payloads() {
        let bus = Arc::new(EventBus::new());
        let seen = Arc::new(parking_lot::Mutex::new(None));

        {
            let seen = seen.clone();
            bus.subscribe("custom.topic", move |payload| {
                *seen.lock() = Some(payload.clone());
                Ok(())
            });
        }

        let scoped = ScopedEventBus::new("sample", bus);
        scoped.emit("custom.topic", &serde_json::json!(42));

        let payload = seen.lock().clone().unwrap();
        assert_eq!(payload["plugin"], "sample");
        assert_eq!(payload["payload"], 42);
    }
}
