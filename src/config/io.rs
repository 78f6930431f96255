use std::path::{Path, PathBuf};
use directories_next::ProjectDirs;
use log::info;
use serde_json;

use crate::config::types::Config;
use crate::error::ConfigError;

// creates a path to hrs-monitor.json in an os dependent standard directory, such as %AppData% on
// windows.
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    ProjectDirs::from("org", "hrs-monitor", "hrs-monitor")
        .map(|dirs| dirs.config_dir().join("hrs-monitor.json"))
        .ok_or(ConfigError::NoConfigPath)
}

/// Reads the config file at `path`. An empty file counts as all defaults.
pub async fn read_config(path: &Path) -> Result<Config, ConfigError> {
    info!("Reading config file {}", path.to_string_lossy());
    let content = tokio::fs::read_to_string(path).await?;

    if content.trim().is_empty() {
        return Ok(Config::default());
    }

    Ok(serde_json::from_str(&content)?)
}

/// Like `read_config`, but a missing file yields the defaults.
pub async fn load_config(path: &Path) -> Result<Config, ConfigError> {
    match read_config(path).await {
        Err(err) if err.is_file_not_found_error() => {
            info!("Config file not found, using defaults");
            Ok(Config::default())
        },
        result => result,
    }
}
