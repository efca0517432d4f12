//! CLI configuration file and environment overrides.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use fitsync_storage::HttpCloudConfig;
use fitsync_sync::SyncConfig;

pub const ENV_SERVER_URL: &str = "FITSYNC_SERVER_URL";
pub const ENV_TOKEN: &str = "FITSYNC_TOKEN";
pub const ENV_EMAIL: &str = "FITSYNC_EMAIL";

/// Settings for the `fitsync` binary.
///
/// Stored as JSON; every field is optional and a missing file means
/// all defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CliConfig {
    /// API base URL of the cloud store.
    #[serde(default)]
    pub server_url: Option<String>,
    /// Session bearer token.
    #[serde(default)]
    pub token: Option<String>,
    /// Request timeout in seconds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// SQLite database holding the local copy.
    #[serde(default)]
    pub db_path: Option<PathBuf>,
    /// JSON file holding the device id and sync cursor.
    #[serde(default)]
    pub state_path: Option<PathBuf>,
    /// Engine settings.
    #[serde(default)]
    pub sync: SyncConfig,
}

impl CliConfig {
    /// Default config file location, under the platform config directory.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("fitsync").join("config.json"))
    }

    /// Load the config from `path` (or the default location) and apply
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.map(Path::to_path_buf).or_else(Self::default_path);
        let mut config = match path {
            Some(path) if path.exists() => Self::from_file(&path)?,
            _ => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse a config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    /// Override fields from variables found by `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_SERVER_URL) {
            self.server_url = Some(url);
        }
        if let Some(token) = lookup(ENV_TOKEN) {
            self.token = Some(token);
        }
        if let Some(email) = lookup(ENV_EMAIL) {
            self.sync.email = Some(email);
        }
    }

    fn data_dir() -> PathBuf {
        dirs::data_dir()
            .map(|dir| dir.join("fitsync"))
            .unwrap_or_else(|| PathBuf::from(".fitsync"))
    }

    /// Path of the local SQLite database.
    pub fn db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| Self::data_dir().join("fitsync.db"))
    }

    /// Path of the client state file.
    pub fn state_path(&self) -> PathBuf {
        self.state_path
            .clone()
            .unwrap_or_else(|| Self::data_dir().join("state.json"))
    }

    /// Connection settings for the cloud store.
    pub fn cloud(&self) -> Result<HttpCloudConfig> {
        let base_url = self.server_url.clone().with_context(|| {
            format!("No server URL configured; set server_url or {}", ENV_SERVER_URL)
        })?;
        let mut cloud = HttpCloudConfig::new(base_url);
        cloud.token = self.token.clone();
        if let Some(timeout) = self.timeout_secs {
            cloud.timeout_secs = timeout;
        }
        Ok(cloud)
    }
}
