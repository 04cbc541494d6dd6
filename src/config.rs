use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_bot_name")]
    pub bot_name: String,
    #[serde(default = "default_storage_config")]
    pub storage: StorageConfig,
    #[serde(default = "default_console_config")]
    pub console: ConsoleConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub database_path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ConsoleConfig {
    /// Channel name stamped on every console message
    #[serde(default = "default_channel")]
    pub channel: String,
    /// User name attributed to console input
    #[serde(default = "default_user")]
    pub user: String,
}

fn default_bot_name() -> String {
    "gabble".to_string()
}

fn default_db_path() -> PathBuf {
    PathBuf::from("gabble.db")
}

fn default_channel() -> String {
    "#console".to_string()
}

fn default_user() -> String {
    "operator".to_string()
}

fn default_storage_config() -> StorageConfig {
    StorageConfig {
        database_path: default_db_path(),
    }
}

fn default_console_config() -> ConsoleConfig {
    ConsoleConfig {
        channel: default_channel(),
        user: default_user(),
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bot_name: default_bot_name(),
            storage: default_storage_config(),
            console: default_console_config(),
        }
    }
}

impl Config {
    /// Load the config file, falling back to defaults when it does
    /// not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }
}
