//! Weaver configuration
//!
//! `preferences.json` under the app data directory, with environment
//! overrides applied on top.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Directory name under the platform data dir
const APP_IDENTIFIER: &str = "weaver";

pub const ENV_BACKEND_URL: &str = "WEAVER_BACKEND_URL";
pub const ENV_QUIET_PERIOD_MS: &str = "WEAVER_QUIET_PERIOD_MS";
pub const ENV_DATA_DIR: &str = "WEAVER_DATA_DIR";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("App data directory not found")]
    NoAppDataDir,
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

impl Serialize for ConfigError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WeaverConfig {
    pub backend_url: String,
    pub quiet_period_ms: u64,
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_file: Option<PathBuf>,
}

impl Default for WeaverConfig {
    fn default() -> Self {
        Self {
            backend_url: "http://localhost:8000".to_string(),
            quiet_period_ms: 3000,
            request_timeout_secs: 30,
            connect_timeout_secs: 5,
            cache_file: None,
        }
    }
}

/// App data directory, `WEAVER_DATA_DIR` first
pub fn app_data_dir() -> Result<PathBuf, ConfigError> {
    if let Some(dir) = std::env::var_os(ENV_DATA_DIR) {
        return Ok(PathBuf::from(dir));
    }
    let base = dirs::data_dir().ok_or(ConfigError::NoAppDataDir)?;
    Ok(base.join(APP_IDENTIFIER))
}

pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    Ok(app_data_dir()?.join("config/preferences.json"))
}

impl WeaverConfig {
    pub fn quiet_period(&self) -> Duration {
        Duration::from_millis(self.quiet_period_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Session cache file, defaulting to `<data_dir>/sessions.json`
    pub fn cache_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.cache_file {
            Some(path) => Ok(path.clone()),
            None => Ok(app_data_dir()?.join("sessions.json")),
        }
    }

    /// Read a config file. A missing file yields defaults and is written
    /// out so there is something to edit.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            let config = Self::default();
            if let Err(e) = config.save_to(path) {
                warn!(path = ?path, error = %e, "Could not write default config");
            }
            return Ok(config);
        }
        let content = fs::read_to_string(path)?;
        let config = serde_json::from_str(&content)?;
        debug!(path = ?path, "Loaded config");
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Apply overrides from a variable lookup
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_BACKEND_URL).filter(|v| !v.trim().is_empty()) {
            self.backend_url = url.trim().to_string();
        }
        if let Some(ms) = lookup(ENV_QUIET_PERIOD_MS) {
            self.quiet_period_ms = ms.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: ENV_QUIET_PERIOD_MS,
                value: ms.clone(),
            })?;
        }
        Ok(())
    }

    /// Load from `path` (or the default location) and apply process env
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => default_config_path()?,
        };
        let mut config = Self::load_from(&path)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }
}
