//! Hot-reload scenarios: phase reporting, config preservation, per-plugin
//! mutual exclusion, and history bookkeeping.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use plugbridge::{
    topics, Bridge, BridgeConfig, HotReloader, LegacyHooks, LegacyPlugin, Plugin, PluginState,
    ReloadPhase, ServiceLocator,
};
use tempfile::TempDir;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn write_manifest(dir: &Path, id: &str, version: &str, defaults: &str) -> PathBuf {
    let plugin_dir = dir.join(id);
    fs::create_dir_all(&plugin_dir).unwrap();
    let body = format!(
        r#"
id = "{id}"
name = "Reloadable"
version = "{version}"
description = "a reloadable plugin"
type = "tool"
host_version = "0.0.0"
permissions = ["register_cli"]

[[cli.commands]]
name = "run"

[config.defaults]
{defaults}
"#
    );
    fs::write(plugin_dir.join("plugin.toml"), body).unwrap();
    plugin_dir
}

struct ConfigCapture {
    seen: Arc<Mutex<Vec<toml::Table>>>,
}

impl Plugin for ConfigCapture {
    fn init(&mut self, services: &ServiceLocator) -> plugbridge::BridgeResult<()> {
        self.seen.lock().push(services.config().clone());
        Ok(())
    }
}

fn reloadable_bridge(
    dir: &Path,
    seen: Arc<Mutex<Vec<toml::Table>>>,
) -> Arc<Bridge> {
    let bridge = Arc::new(Bridge::new(BridgeConfig {
        developer_mode: true,
        plugin_dirs: vec![dir.to_path_buf()],
        ..BridgeConfig::default()
    }));
    bridge.register_factory("reloadable", move || {
        Box::new(ConfigCapture { seen: seen.clone() })
    });
    bridge.discover();
    bridge.initialize(None).unwrap();
    bridge
}

#[test]
fn reload_disabled_without_developer_mode() {
    let temp = TempDir::new().unwrap();
    write_manifest(temp.path(), "reloadable", "1.0.0", "depth = 1");

    let bridge = Arc::new(Bridge::new(BridgeConfig {
        developer_mode: false,
        plugin_dirs: vec![temp.path().to_path_buf()],
        ..BridgeConfig::default()
    }));
    let seen = Arc::new(Mutex::new(Vec::new()));
    {
        let seen = seen.clone();
        bridge.register_factory("reloadable", move || {
            Box::new(ConfigCapture { seen: seen.clone() })
        });
    }
    bridge.discover();
    bridge.initialize(None).unwrap();

    let reloader = HotReloader::new(bridge);
    let result = reloader.reload("reloadable", false, true);

    assert!(!result.success);
    assert_eq!(result.phase, ReloadPhase::DevModeCheck);
    assert_eq!(result.phase.as_str(), "dev_mode_check");
}

#[test]
fn successful_reload_picks_up_new_manifest_version() {
    init_tracing();
    let temp = TempDir::new().unwrap();
    write_manifest(temp.path(), "reloadable", "1.0.0", "depth = 1");

    let seen = Arc::new(Mutex::new(Vec::new()));
    let bridge = reloadable_bridge(temp.path(), seen.clone());
    let reloader = HotReloader::new(bridge.clone());

    let reloaded_events = Arc::new(AtomicUsize::new(0));
    {
        let reloaded_events = reloaded_events.clone();
        bridge.events().subscribe(topics::PLUGIN_RELOADED, move |payload| {
            assert_eq!(payload["plugin"], "reloadable");
            reloaded_events.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
    }

    let notified = Arc::new(AtomicUsize::new(0));
    {
        let notified = notified.clone();
        reloader.on_reload(move |result| {
            assert!(result.success);
            notified.fetch_add(1, Ordering::SeqCst);
        });
    }

    // New plugin code lands on disk.
    write_manifest(temp.path(), "reloadable", "1.1.0", "depth = 1");

    let result = reloader.reload("reloadable", false, false);

    assert!(result.success, "reload failed: {:?}", result.error);
    assert_eq!(result.phase, ReloadPhase::Complete);
    assert_eq!(result.old_version.as_deref(), Some("1.0.0"));
    assert_eq!(result.new_version.as_deref(), Some("1.1.0"));
    assert_eq!(bridge.plugin_version("reloadable").as_deref(), Some("1.1.0"));
    assert_eq!(bridge.plugin_state("reloadable"), Some(PluginState::Ready));

    // Contributions were cleared and re-registered.
    let commands = bridge.cli_contributions();
    assert_eq!(
        commands
            .iter()
            .filter(|c| c.plugin_id == "reloadable")
            .count(),
        1
    );

    assert_eq!(reloaded_events.load(Ordering::SeqCst), 1);
    assert_eq!(notified.load(Ordering::SeqCst), 1);

    let stats = reloader.stats();
    assert_eq!(stats.attempts, 1);
    assert_eq!(stats.successes, 1);
    assert!((stats.success_rate - 1.0).abs() < f64::EPSILON);
}

#[test]
fn preserve_config_keeps_the_old_effective_config() {
    let temp = TempDir::new().unwrap();
    write_manifest(temp.path(), "reloadable", "1.0.0", "depth = 1");

    let seen = Arc::new(Mutex::new(Vec::new()));
    let bridge = reloadable_bridge(temp.path(), seen.clone());
    let reloader = HotReloader::new(bridge.clone());

    // The new manifest ships different defaults.
    write_manifest(temp.path(), "reloadable", "1.1.0", "depth = 9");

    let result = reloader.reload("reloadable", false, true);
    assert!(result.success, "reload failed: {:?}", result.error);

    let configs = seen.lock().clone();
    assert_eq!(configs.len(), 2);
    // Snapshot taken before the reload still wins.
    assert_eq!(configs[1].get("depth").unwrap().as_integer(), Some(1));
}

#[test]
fn without_preserve_config_new_defaults_apply() {
    let temp = TempDir::new().unwrap();
    write_manifest(temp.path(), "reloadable", "1.0.0", "depth = 1");

    let seen = Arc::new(Mutex::new(Vec::new()));
    let bridge = reloadable_bridge(temp.path(), seen.clone());
    let reloader = HotReloader::new(bridge);

    write_manifest(temp.path(), "reloadable", "1.1.0", "depth = 9");

    let result = reloader.reload("reloadable", false, false);
    assert!(result.success, "reload failed: {:?}", result.error);

    let configs = seen.lock().clone();
    assert_eq!(configs[1].get("depth").unwrap().as_integer(), Some(9));
}

#[test]
fn reload_failure_reports_discovery_phase_and_marks_error() {
    let temp = TempDir::new().unwrap();
    let plugin_dir = write_manifest(temp.path(), "reloadable", "1.0.0", "depth = 1");

    let seen = Arc::new(Mutex::new(Vec::new()));
    let bridge = reloadable_bridge(temp.path(), seen);
    let reloader = HotReloader::new(bridge.clone());

    // Corrupt the manifest on disk; rediscovery must fail.
    fs::write(plugin_dir.join("plugin.toml"), "id = [[[").unwrap();

    let result = reloader.reload("reloadable", false, true);
    assert!(!result.success);
    assert_eq!(result.phase, ReloadPhase::Discovery);
    assert_eq!(bridge.plugin_state("reloadable"), Some(PluginState::Error));
}

struct SlowInit {
    gate: Arc<AtomicBool>,
}

impl Plugin for SlowInit {
    fn init(&mut self, _services: &ServiceLocator) -> plugbridge::BridgeResult<()> {
        if self.gate.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(400));
        }
        Ok(())
    }
}

#[test]
fn concurrent_reloads_of_one_plugin_are_mutually_exclusive() {
    let temp = TempDir::new().unwrap();
    write_manifest(temp.path(), "reloadable", "1.0.0", "depth = 1");

    let gate = Arc::new(AtomicBool::new(false));
    let bridge = Arc::new(Bridge::new(BridgeConfig {
        developer_mode: true,
        plugin_dirs: vec![temp.path().to_path_buf()],
        ..BridgeConfig::default()
    }));
    {
        let gate = gate.clone();
        bridge.register_factory("reloadable", move || {
            Box::new(SlowInit { gate: gate.clone() })
        });
    }
    bridge.discover();
    bridge.initialize(None).unwrap();

    // Make re-initialization slow so the attempts overlap.
    gate.store(true, Ordering::SeqCst);

    let reloader = Arc::new(
        HotReloader::new(bridge).with_lock_timeout(Duration::from_millis(100)),
    );

    let mut handles = Vec::new();
    for _ in 0..2 {
        let reloader = reloader.clone();
        handles.push(std::thread::spawn(move || {
            reloader.reload("reloadable", false, false)
        }));
    }
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let successes = results.iter().filter(|r| r.success).count();
    assert_eq!(successes, 1, "exactly one concurrent reload may win");

    let loser = results.iter().find(|r| !r.success).unwrap();
    assert!(
        matches!(
            loser.phase,
            ReloadPhase::LockAcquisition | ReloadPhase::StateCheck
        ),
        "unexpected failure phase: {:?}",
        loser.phase
    );
}

struct HookOnly;

impl LegacyPlugin for HookOnly {
    fn name(&self) -> &str {
        "hook-only"
    }

    fn version(&self) -> &str {
        "0.1.0"
    }

    fn hooks(&self) -> LegacyHooks {
        LegacyHooks {
            scan: true,
            analyze: false,
            configure: false,
        }
    }
}

#[test]
fn legacy_instance_without_constructor_cannot_reload() {
    let bridge = Arc::new(Bridge::new(BridgeConfig {
        developer_mode: true,
        ..BridgeConfig::default()
    }));
    bridge.register_legacy_instance(Box::new(HookOnly));
    bridge.discover();
    bridge.initialize(None).unwrap();

    assert_eq!(bridge.plugin_state("hook-only"), Some(PluginState::Ready));

    let reloader = HotReloader::new(bridge);
    let check = reloader.can_reload("hook-only");
    assert!(!check.allowed);
    assert!(check
        .reason
        .unwrap()
        .contains("no loaded module to replace"));
}

#[test]
fn legacy_plugin_with_constructor_reloads() {
    let bridge = Arc::new(Bridge::new(BridgeConfig {
        developer_mode: true,
        ..BridgeConfig::default()
    }));
    bridge.register_legacy(|| Box::new(HookOnly));
    bridge.discover();
    bridge.initialize(None).unwrap();

    let reloader = HotReloader::new(bridge.clone());
    assert!(reloader.can_reload("hook-only").allowed);

    let result = reloader.reload("hook-only", false, true);
    assert!(result.success, "reload failed: {:?}", result.error);
    assert_eq!(bridge.plugin_state("hook-only"), Some(PluginState::Ready));
}

#[test]
fn reload_history_is_newest_first() {
    let temp = TempDir::new().unwrap();
    write_manifest(temp.path(), "reloadable", "1.0.0", "depth = 1");

    let seen = Arc::new(Mutex::new(Vec::new()));
    let bridge = reloadable_bridge(temp.path(), seen);
    let reloader = HotReloader::new(bridge);

    reloader.reload("ghost", false, false);
    reloader.reload("reloadable", false, false);

    let history = reloader.history(None);
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].plugin_id, "reloadable");
    assert_eq!(history[1].plugin_id, "ghost");
    assert_eq!(history[1].phase, ReloadPhase::NotFound);

    let limited = reloader.history(Some(1));
    assert_eq!(limited.len(), 1);
    assert_eq!(limited[0].plugin_id, "reloadable");
}
