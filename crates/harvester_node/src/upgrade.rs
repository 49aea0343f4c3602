use std::path::PathBuf;
use std::process::Command;

use harvester_engine::{CollaboratorError, ConfigMap, Upgrader};

pub const DEFAULT_UPGRADE_SCRIPT: &str = "bin/upgrade.sh";

/// Runs a shell script as the upgrade procedure.
#[derive(Debug, Clone)]
pub struct ScriptUpgrader {
    script: PathBuf,
}

impl ScriptUpgrader {
    pub fn new(script: impl Into<PathBuf>) -> Self {
        Self {
            script: script.into(),
        }
    }

    pub fn from_config(config: &ConfigMap) -> Self {
        Self::new(config.get_str("caretaker.upgrade.script", DEFAULT_UPGRADE_SCRIPT))
    }

    pub fn script(&self) -> &PathBuf {
        &self.script
    }
}

impl Upgrader for ScriptUpgrader {
    fn upgrade(&self) -> Result<Vec<String>, CollaboratorError> {
        if !self.script.is_file() {
            return Err(CollaboratorError::Other(format!(
                "upgrade script {} not found",
                self.script.display()
            )));
        }

        let output = Command::new("sh").arg(&self.script).output()?;
        let mut lines: Vec<String> = String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::to_string)
            .collect();
        lines.extend(
            String::from_utf8_lossy(&output.stderr)
                .lines()
                .map(str::to_string),
        );

        if !output.status.success() {
            return Err(CollaboratorError::Other(format!(
                "upgrade script exited with {}: {}",
                output.status,
                lines.join(" | ")
            )));
        }
        Ok(lines)
    }
}
