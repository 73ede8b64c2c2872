//! Safe hot reload of loaded plugins.
//!
//! Reload replaces a plugin's code and state without restarting the host:
//! shutdown, unload, clear contributions, rediscover, reinitialize. The
//! whole sequence runs under a per-plugin lock with a bounded wait, so
//! reloading plugin A never blocks unrelated operations on plugin B. Every
//! attempt is recorded in a bounded history ring and reported with the
//! phase that failed.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::events::topics;
use crate::lifecycle::Bridge;
use crate::plugin::PluginState;

/// How many reload attempts the history ring retains.
pub const RELOAD_HISTORY_CAPACITY: usize = 100;

/// Default bound on waiting for a plugin's reload lock.
pub const RELOAD_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// The reload phase an attempt reached (or failed in).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReloadPhase {
    DevModeCheck,
    Blacklist,
    NotFound,
    StateCheck,
    LockAcquisition,
    ConfigSnapshot,
    Shutdown,
    Unload,
    ClearContributions,
    Discovery,
    Initialization,
    Complete,
}

impl ReloadPhase {
    /// Wire name (snake_case).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DevModeCheck => "dev_mode_check",
            Self::Blacklist => "blacklist",
            Self::NotFound => "not_found",
            Self::StateCheck => "state_check",
            Self::LockAcquisition => "lock_acquisition",
            Self::ConfigSnapshot => "config_snapshot",
            Self::Shutdown => "shutdown",
            Self::Unload => "unload",
            Self::ClearContributions => "clear_contributions",
            Self::Discovery => "discovery",
            Self::Initialization => "initialization",
            Self::Complete => "complete",
        }
    }
}

impl std::fmt::Display for ReloadPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of `can_reload`.
#[derive(Debug, Clone, Serialize)]
pub struct ReloadCheck {
    /// Whether a reload may proceed.
    pub allowed: bool,
    /// Refusal reason when not allowed.
    pub reason: Option<String>,
}

impl ReloadCheck {
    fn allowed() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    fn refused(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

/// Immutable record of one reload attempt.
#[derive(Debug, Clone, Serialize)]
pub struct ReloadResult {
    /// The plugin that was reloaded.
    pub plugin_id: String,
    /// Whether the reload succeeded.
    pub success: bool,
    /// Phase reached; pinpoints the failure when `success` is false.
    pub phase: ReloadPhase,
    /// Failure message, if any.
    pub error: Option<String>,
    /// Plugin version before the reload.
    pub old_version: Option<String>,
    /// Plugin version after a successful reload.
    pub new_version: Option<String>,
    /// Non-fatal problems encountered along the way.
    pub warnings: Vec<String>,
    /// Wall-clock duration of the attempt.
    pub duration_ms: u64,
    /// When the attempt finished.
    pub timestamp: DateTime<Utc>,
}

impl ReloadResult {
    /// Convert a failed result into the bridge error taxonomy.
    pub fn as_error(&self) -> Option<crate::error::BridgeError> {
        if self.success {
            return None;
        }
        Some(crate::error::BridgeError::HotReload {
            phase: self.phase,
            message: self
                .error
                .clone()
                .unwrap_or_else(|| "unknown failure".to_string()),
        })
    }
}

/// Aggregated reload statistics.
#[derive(Debug, Clone, Serialize)]
pub struct ReloadStats {
    pub attempts: usize,
    pub successes: usize,
    pub failures: usize,
    pub success_rate: f64,
    pub avg_duration_ms: f64,
    pub last_attempt: Option<DateTime<Utc>>,
}

/// Callback notified after each successful reload.
pub type ReloadCallback = Arc<dyn Fn(&ReloadResult) + Send + Sync>;

/// Supervises safe, concurrent, per-plugin hot reload.
pub struct HotReloader {
    bridge: Arc<Bridge>,
    developer_mode: AtomicBool,
    blacklist: RwLock<HashSet<String>>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    history: Mutex<VecDeque<ReloadResult>>,
    callbacks: RwLock<Vec<ReloadCallback>>,
    lock_timeout: Duration,
}

impl std::fmt::Debug for HotReloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HotReloader")
            .field("developer_mode", &self.developer_mode.load(Ordering::Relaxed))
            .field("history", &self.history.lock().len())
            .finish()
    }
}

impl HotReloader {
    /// Create a reloader supervising the given bridge. Developer mode is
    /// taken from the bridge configuration.
    pub fn new(bridge: Arc<Bridge>) -> Self {
        let developer_mode = bridge.developer_mode();
        Self {
            bridge,
            developer_mode: AtomicBool::new(developer_mode),
            blacklist: RwLock::new(HashSet::new()),
            locks: Mutex::new(HashMap::new()),
            history: Mutex::new(VecDeque::with_capacity(RELOAD_HISTORY_CAPACITY)),
            callbacks: RwLock::new(Vec::new()),
            lock_timeout: RELOAD_LOCK_TIMEOUT,
        }
    }

    /// Override the bounded lock wait (mainly for tests).
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Toggle developer mode at runtime.
    pub fn set_developer_mode(&self, enabled: bool) {
        self.developer_mode.store(enabled, Ordering::SeqCst);
    }

    /// Add a plugin to the reload blacklist (core plugins are blacklisted
    /// implicitly).
    pub fn blacklist_add(&self, plugin_id: &str) {
        self.blacklist.write().insert(plugin_id.to_string());
    }

    /// Whether a plugin is blacklisted, explicitly or as a core plugin.
    pub fn is_blacklisted(&self, plugin_id: &str) -> bool {
        self.bridge.is_core(plugin_id) || self.blacklist.read().contains(plugin_id)
    }

    /// Register a callback notified after each successful reload.
    pub fn on_reload<F>(&self, callback: F)
    where
        F: Fn(&ReloadResult) + Send + Sync + 'static,
    {
        self.callbacks.write().push(Arc::new(callback));
    }

    /// Whether a plugin can be reloaded right now, with the refusal reason.
    pub fn can_reload(&self, plugin_id: &str) -> ReloadCheck {
        match self.refusal(plugin_id, false) {
            Some((_, reason)) => ReloadCheck::refused(reason),
            None => ReloadCheck::allowed(),
        }
    }

    /// Refusal phase and reason, if any. `force` bypasses the developer-mode
    /// and blacklist checks only.
    fn refusal(&self, plugin_id: &str, force: bool) -> Option<(ReloadPhase, String)> {
        if !force && !self.developer_mode.load(Ordering::SeqCst) {
            return Some((
                ReloadPhase::DevModeCheck,
                "developer mode is disabled".to_string(),
            ));
        }

        if !force && self.is_blacklisted(plugin_id) {
            return Some((
                ReloadPhase::Blacklist,
                format!("plugin '{plugin_id}' is blacklisted from hot reload"),
            ));
        }
        // Core plugins stay off limits even under force.
        if self.bridge.is_core(plugin_id) {
            return Some((
                ReloadPhase::Blacklist,
                "core plugins cannot be hot-reloaded".to_string(),
            ));
        }

        let Some(overview) = self.bridge.get_plugin(plugin_id) else {
            return Some((
                ReloadPhase::NotFound,
                format!("unknown plugin '{plugin_id}'"),
            ));
        };

        if matches!(overview.state, PluginState::Loading | PluginState::Unloading) {
            return Some((
                ReloadPhase::StateCheck,
                format!("plugin is busy (state: {})", overview.state),
            ));
        }

        if overview.legacy_adapted && !self.bridge.legacy_has_constructor(plugin_id) {
            return Some((
                ReloadPhase::StateCheck,
                "legacy plugin has no loaded module to replace".to_string(),
            ));
        }

        None
    }

    /// Reload a plugin's code and state.
    ///
    /// Returns a result either way; the phase names where a failure
    /// happened. `preserve_config` hands the plugin's pre-reload merged
    /// configuration to the new instance.
    pub fn reload(&self, plugin_id: &str, force: bool, preserve_config: bool) -> ReloadResult {
        let started = Instant::now();
        let old_version = self.bridge.plugin_version(plugin_id);

        if let Some((phase, reason)) = self.refusal(plugin_id, force) {
            return self.record(ReloadResult {
                plugin_id: plugin_id.to_string(),
                success: false,
                phase,
                error: Some(reason),
                old_version,
                new_version: None,
                warnings: Vec::new(),
                duration_ms: elapsed_ms(started),
                timestamp: Utc::now(),
            });
        }

        // Per-plugin lock, created lazily under the shared table lock.
        let lock = {
            let mut locks = self.locks.lock();
            locks
                .entry(plugin_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };

        let Some(_guard) = lock.try_lock_for(self.lock_timeout) else {
            return self.record(ReloadResult {
                plugin_id: plugin_id.to_string(),
                success: false,
                phase: ReloadPhase::LockAcquisition,
                error: Some(format!(
                    "timed out acquiring reload lock after {:?}",
                    self.lock_timeout
                )),
                old_version,
                new_version: None,
                warnings: Vec::new(),
                duration_ms: elapsed_ms(started),
                timestamp: Utc::now(),
            });
        };

        let mut warnings = Vec::new();

        // Snapshot the merged config before the old instance goes away.
        let config_snapshot = if preserve_config {
            self.bridge.snapshot_merged_config(plugin_id)
        } else {
            None
        };

        warnings.extend(self.bridge.run_shutdown_hook(plugin_id));

        self.bridge.unload_plugin_code(plugin_id);

        let cleared = self.bridge.clear_contributions(plugin_id);
        tracing::debug!(plugin = plugin_id, cleared, "Cleared contributions for reload");

        if let Err(e) = self.bridge.rediscover_single(plugin_id) {
            self.bridge.mark_error(plugin_id, &e.to_string());
            return self.fail(
                plugin_id,
                ReloadPhase::Discovery,
                e.to_string(),
                old_version,
                warnings,
                started,
            );
        }

        if let Err(e) = self
            .bridge
            .initialize_plugin(plugin_id, config_snapshot)
        {
            return self.fail(
                plugin_id,
                ReloadPhase::Initialization,
                e.to_string(),
                old_version,
                warnings,
                started,
            );
        }

        let new_version = self.bridge.plugin_version(plugin_id);
        info!(
            plugin = plugin_id,
            old_version = old_version.as_deref().unwrap_or("?"),
            new_version = new_version.as_deref().unwrap_or("?"),
            "Plugin reloaded"
        );

        self.record(ReloadResult {
            plugin_id: plugin_id.to_string(),
            success: true,
            phase: ReloadPhase::Complete,
            error: None,
            old_version,
            new_version,
            warnings,
            duration_ms: elapsed_ms(started),
            timestamp: Utc::now(),
        })
    }

    fn fail(
        &self,
        plugin_id: &str,
        phase: ReloadPhase,
        error: String,
        old_version: Option<String>,
        warnings: Vec<String>,
        started: Instant,
    ) -> ReloadResult {
        warn!(plugin = plugin_id, phase = %phase, error = %error, "Hot reload failed");
        self.record(ReloadResult {
            plugin_id: plugin_id.to_string(),
            success: false,
            phase,
            error: Some(error),
            old_version,
            new_version: None,
            warnings,
            duration_ms: elapsed_ms(started),
            timestamp: Utc::now(),
        })
    }

    /// Append to the bounded history ring, emit the reload event, and
    /// notify callbacks on success.
    fn record(&self, result: ReloadResult) -> ReloadResult {
        {
            let mut history = self.history.lock();
            if history.len() == RELOAD_HISTORY_CAPACITY {
                history.pop_front();
            }
            history.push_back(result.clone());
        }

        let topic = if result.success {
            topics::PLUGIN_RELOADED
        } else {
            topics::PLUGIN_RELOAD_FAILED
        };
        self.bridge.events().emit(
            topic,
            &serde_json::json!({
                "plugin": result.plugin_id,
                "phase": result.phase,
                "error": result.error,
                "old_version": result.old_version,
                "new_version": result.new_version,
                "duration_ms": result.duration_ms,
            }),
        );

        if result.success {
            let callbacks: Vec<ReloadCallback> = self.callbacks.read().clone();
            for callback in callbacks {
                callback(&result);
            }
        }

        result
    }

    /// Most recent attempts, newest first.
    pub fn history(&self, limit: Option<usize>) -> Vec<ReloadResult> {
        let history = self.history.lock();
        let limit = limit.unwrap_or(history.len());
        history.iter().rev().take(limit).cloned().collect()
    }

    /// Aggregate statistics over the retained history.
    pub fn stats(&self) -> ReloadStats {
        let history = self.history.lock();
        let attempts = history.len();
        let successes = history.iter().filter(|r| r.success).count();
        let failures = attempts - successes;
        let success_rate = if attempts == 0 {
            0.0
        } else {
            successes as f64 / attempts as f64
        };
        let avg_duration_ms = if attempts == 0 {
            0.0
        } else {
            history.iter().map(|r| r.duration_ms as f64).sum::<f64>() / attempts as f64
        };

        ReloadStats {
            attempts,
            successes,
            failures,
            success_rate,
            avg_duration_ms,
            last_attempt: history.back().map(|r| r.timestamp),
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
