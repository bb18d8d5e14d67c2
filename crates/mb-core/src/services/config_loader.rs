use std::path::Path;

use crate::error::{FleetError, Result};
use crate::models::FleetConfig;

pub const CONFIG_FILENAME: &str = "multibase.yaml";

pub fn load(fleet_root: &Path) -> Result<FleetConfig> {
    let config_path = fleet_root.join(CONFIG_FILENAME);
    if !config_path.exists() {
        return Err(FleetError::ConfigNotFound(config_path));
    }
    let contents = std::fs::read_to_string(&config_path)?;
    let config: FleetConfig = serde_yaml::from_str(&contents)
        .map_err(|e| FleetError::InvalidConfig(e.to_string()))?;
    if config.runtime_binary.trim().is_empty() {
        return Err(FleetError::InvalidConfig(
            "runtime_binary must not be empty".into(),
        ));
    }
    Ok(config)
}

/// Like [`load`], but a missing file yields the defaults.
pub fn load_or_default(fleet_root: &Path) -> Result<FleetConfig> {
    match load(fleet_root) {
        Ok(config) => Ok(config),
        Err(FleetError::ConfigNotFound(path)) => {
            tracing::debug!(path = %path.display(), "no fleet config, using defaults");
            Ok(FleetConfig::default())
        }
        Err(e) => Err(e),
    }
}
