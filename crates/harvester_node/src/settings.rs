use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use anyhow::{Context, Result};
use harvester_engine::ConfigMap;
use node_logging::node_info;

pub const DEFAULT_CONFIG_FILE: &str = "./harvester.ron";

/// Loads a RON map of `"dotted.key": "value"` pairs.
///
/// A missing file yields an empty map, so every setting takes its default.
pub fn load_config_map(path: &Path) -> Result<ConfigMap> {
    let content = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            node_info!("No config at {:?}, using defaults", path);
            return Ok(ConfigMap::default());
        }
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read config {}", path.display()))
        }
    };

    let values: BTreeMap<String, String> = ron::from_str(&content)
        .with_context(|| format!("failed to parse config {}", path.display()))?;
    node_info!("Loaded {} config keys from {:?}", values.len(), path);
    Ok(ConfigMap::new(values))
}
