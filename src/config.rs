//! Layered plugin configuration.
//!
//! A plugin's effective configuration is built from three layers: the
//! defaults declared in its manifest, host-level settings, and project-level
//! settings. Later layers win; nested tables merge key by key.

use toml::Table;

/// Merge the three configuration layers into one effective table.
///
/// `host` and `project` are the per-plugin sections already extracted from
/// the host's configuration objects.
pub fn merge_config(defaults: &Table, host: &Table, project: &Table) -> Table {
    let mut merged = defaults.clone();
    merge_into(&mut merged, host);
    merge_into(&mut merged, project);
    merged
}

/// Overlay `overlay` onto `base`. Tables merge recursively; any other value
/// replaces the existing one.
fn merge_into(base: &mut Table, overlay: &Table) {
    for (key, value) in overlay {
        match (base.get_mut(key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_into(existing, incoming);
            }
            _ => {
                base.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Extract the per-plugin section from a host-wide configuration table.
///
/// Returns an empty table when the host has no section for this plugin.
pub fn plugin_section(config: &Table, plugin_id: &str) -> Table {
    match config.get(plugin_id) {
        Some(toml::Value::Table(section)) => section.clone(),
        _ => Table::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(content: &str) -> Table {
        toml::from_str(content).unwrap()
    }

    #[test]
    fn test_later_layers_win() {
        let defaults = table("depth = 1\nverbose = false");
        let host = table("depth = 2");
        let project = table("depth = 3");

        let merged = merge_config(&defaults, &host, &project);
        assert_eq!(merged.get("depth").unwrap().as_integer(), Some(3));
        assert_eq!(merged.get("verbose").unwrap().as_bool(), Some(false));
    }

    #[test]
    fn test_nested_tables_merge() {
        let defaults = table("[output]\nformat = \"json\"\ncolor = true");
        let host = table("[output]\nformat = \"text\"");
        let project = Table::new();

        let merged = merge_config(&defaults, &host, &project);
        let output = merged.get("output").unwrap().as_table().unwrap();
        assert_eq!(output.get("format").unwrap().as_str(), Some("text"));
        assert_eq!(output.get("color").unwrap().as_bool(), Some(true));
    }

    #[test]
    fn test_scalar_replaces_table() {
        let defaults = table("[limits]\nmax = 10");
        let project = table("limits = \"unbounded\"");

        let merged = merge_config(&defaults, &Table::new(), &project);
        assert_eq!(merged.get("limits").unwrap().as_str(), Some("unbounded"));
    }

    #[test]
    fn test_plugin_section_missing() {
        let config = table("[other]\nkey = 1");
        assert!(plugin_section(&config, "sample").is_empty());
    }

    #[test]
    fn test_plugin_section_extracts_table() {
        let config = table("[sample]\ndepth = 4");
        let section = plugin_section(&config, "sample");
        assert_eq!(section.get("depth").unwrap().as_integer(), Some(4));
    }
}
