//! Wiring for the harvester daemon: config file loading and the script upgrader.

mod settings;
mod upgrade;

pub use settings::{load_config_map, DEFAULT_CONFIG_FILE};
pub use upgrade::{ScriptUpgrader, DEFAULT_UPGRADE_SCRIPT};
