use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Minutes between runs of each watch.
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_minutes: u32,

    /// Per-source timeout for one search.
    #[serde(default = "default_source_timeout")]
    pub source_timeout_secs: u32,

    /// Cap on watches running at the same time. Absent means unbounded.
    #[serde(default)]
    pub max_concurrent_watches: Option<usize>,
}

fn default_db_path() -> String {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("bargainwatch");
    std::fs::create_dir_all(&data_dir).ok();
    data_dir.join("watches.db").to_string_lossy().to_string()
}

fn default_refresh_interval() -> u32 {
    10
}

fn default_source_timeout() -> u32 {
    30
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            refresh_interval_minutes: default_refresh_interval(),
            source_timeout_secs: default_source_timeout(),
            max_concurrent_watches: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| AppError::Config(e.to_string()))?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("bargainwatch")
            .join("config.toml")
    }
}
