//! Plugin manifest discovery.
//!
//! Scans plugin directories for `plugin.toml` descriptors, one plugin per
//! subdirectory. A failure on one candidate is logged and skipped; it never
//! aborts discovery of the others.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::BridgeResult;
use crate::manifest::{PluginManifest, MANIFEST_FILE};

/// Load every manifest found under a plugins directory.
///
/// Each subdirectory containing a `plugin.toml` is treated as one plugin
/// candidate. Returns the manifests that loaded cleanly; invalid candidates
/// are logged as warnings.
///
/// # Errors
///
/// Returns an error only if the directory itself cannot be read.
pub fn load_manifests_from_dir(dir: &Path) -> BridgeResult<Vec<PluginManifest>> {
    let mut manifests = Vec::new();

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }

        let manifest_path = path.join(MANIFEST_FILE);
        if !manifest_path.exists() {
            continue;
        }

        match PluginManifest::load(&manifest_path) {
            Ok(manifest) => {
                debug!(
                    path = %manifest_path.display(),
                    plugin = %manifest.id,
                    "Loaded plugin manifest"
                );
                manifests.push(manifest);
            }
            Err(e) => {
                warn!(
                    path = %manifest_path.display(),
                    error = %e,
                    "Skipping plugin with invalid manifest"
                );
            }
        }
    }

    Ok(manifests)
}

/// Load manifests from several directories, skipping directories that do not
/// exist or cannot be read.
pub fn discover_manifests(dirs: &[PathBuf]) -> Vec<PluginManifest> {
    let mut manifests = Vec::new();

    for dir in dirs {
        if !dir.exists() {
            debug!(path = %dir.display(), "Plugin directory does not exist, skipping");
            continue;
        }

        match load_manifests_from_dir(dir) {
            Ok(found) => manifests.extend(found),
            Err(e) => {
                warn!(path = %dir.display(), error = %e, "Failed to read plugin directory");
            }
        }
    }

    manifests
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_plugin(dir: &Path, id: &str, extra: &str) {
        let plugin_dir = dir.join(id);
        std::fs::create_dir_all(&plugin_dir).unwrap();
        let manifest = format!(
            r#"
id = "{id}"
name = "{id}"
version = "1.0.0"
description = "test plugin"
type = "tool"
host_version = "0.1.0"
{extra}
"#
        );
        std::fs::write(plugin_dir.join(MANIFEST_FILE), manifest).unwrap();
    }

    #[test]
    fn test_discover_one_per_subdirectory() {
        let temp = TempDir::new().unwrap();
        write_plugin(temp.path(), "alpha", "");
        write_plugin(temp.path(), "beta", "");

        let manifests = load_manifests_from_dir(temp.path()).unwrap();
        assert_eq!(manifests.len(), 2);
        assert!(manifests.iter().all(|m| m.source.is_some()));
    }

    #[test]
    fn test_invalid_candidate_is_skipped() {
        let temp = TempDir::new().unwrap();
        write_plugin(temp.path(), "good", "");

        let bad_dir = temp.path().join("bad");
        std::fs::create_dir_all(&bad_dir).unwrap();
        std::fs::write(bad_dir.join(MANIFEST_FILE), "id = [[[").unwrap();

        let manifests = load_manifests_from_dir(temp.path()).unwrap();
        assert_eq!(manifests.len(), 1);
        assert_eq!(manifests[0].id, "good");
    }

    #[test]
    fn test_directories_without_manifest_ignored() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("not-a-plugin")).unwrap();

        let manifests = load_manifests_from_dir(temp.path()).unwrap();
        assert!(manifests.is_empty());
    }

    #[test]
    fn test_missing_directory_skipped() {
        let manifests = discover_manifests(&[PathBuf::from("/definitely/not/here")]);
        assert!(manifests.is_empty());
    }
}
