//! Application configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/folio/config.toml)
//! 3. Environment variables (FOLIO_* prefix)
//!
//! Environment variables take precedence over config file values.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable prefix
const ENV_PREFIX: &str = "FOLIO";

/// Default container holding the snapshot on the remote store
pub const DEFAULT_CONTAINER_ID: &str = "folio";

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory for local data (store snapshot, client id)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Whether background sync is enabled
    #[serde(default)]
    pub sync_enabled: bool,

    /// Directory-backed remote store (e.g. a synced cloud folder)
    #[serde(default)]
    pub remote_dir: Option<PathBuf>,

    /// HTTP remote store base URL
    #[serde(default)]
    pub remote_url: Option<String>,

    /// Bearer token for the HTTP remote store
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_token: Option<String>,

    /// User-scoped container holding the snapshot
    #[serde(default = "default_container_id")]
    pub container_id: String,

    /// Background poll interval
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Quiet period after a local edit before a reactive sync
    #[serde(default = "default_debounce_secs")]
    pub debounce_secs: u64,

    /// Credential refresh interval
    #[serde(default = "default_credential_refresh_secs")]
    pub credential_refresh_secs: u64,

    /// Fallback interval for the resume check
    #[serde(default = "default_resume_check_secs")]
    pub resume_check_secs: u64,

    /// Write logs to this file instead of stderr
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            sync_enabled: false,
            remote_dir: None,
            remote_url: None,
            remote_token: None,
            container_id: default_container_id(),
            poll_interval_secs: default_poll_interval_secs(),
            debounce_secs: default_debounce_secs(),
            credential_refresh_secs: default_credential_refresh_secs(),
            resume_check_secs: default_resume_check_secs(),
            log_file: None,
        }
    }
}

impl Config {
    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables (FOLIO_DATA_DIR, FOLIO_REMOTE_DIR, ...)
    /// 2. Config file (~/.config/folio/config.toml or FOLIO_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load configuration from a specific path
    ///
    /// Environment variables are still applied as overrides.
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &PathBuf) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.ensure_data_dir()?;
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(format!("{}_{}", ENV_PREFIX, key)).ok());
    }

    /// Apply `FOLIO_*` style overrides from `lookup` (keyed without prefix)
    ///
    /// An empty value clears the optional remote settings.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let optional = |key: &str| lookup(key).map(|v| (!v.is_empty()).then_some(v));

        if let Some(dir) = lookup("DATA_DIR").filter(|v| !v.is_empty()) {
            self.data_dir = dir.into();
        }
        if let Some(val) = lookup("SYNC_ENABLED") {
            self.sync_enabled = matches!(val.to_ascii_lowercase().as_str(), "true" | "1" | "yes");
        }
        if let Some(dir) = optional("REMOTE_DIR") {
            self.remote_dir = dir.map(PathBuf::from);
        }
        if let Some(url) = optional("REMOTE_URL") {
            self.remote_url = url;
        }
        if let Some(token) = optional("REMOTE_TOKEN") {
            self.remote_token = token;
        }
        if let Some(container) = lookup("CONTAINER_ID").filter(|v| !v.is_empty()) {
            self.container_id = container;
        }
    }

    /// Ensure data directory exists
    fn ensure_data_dir(&self) -> Result<()> {
        if !self.data_dir.exists() {
            std::fs::create_dir_all(&self.data_dir)
                .with_context(|| format!("Failed to create data directory: {:?}", self.data_dir))?;
        }
        Ok(())
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_file_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;
        Ok(())
    }

    /// Get the config file path
    ///
    /// Can be overridden with FOLIO_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var(format!("{}_CONFIG", ENV_PREFIX)) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("folio")
            .join("config.toml")
    }

    /// Path to the local store snapshot
    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join("store.json")
    }

    /// Path to the client id file
    pub fn client_id_path(&self) -> PathBuf {
        self.data_dir.join("client_id")
    }

    /// Whether any remote store is configured
    pub fn has_remote(&self) -> bool {
        self.remote_dir.is_some() || self.remote_url.is_some()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_secs(self.debounce_secs)
    }

    /// Credential refresh interval; `None` when disabled with 0
    pub fn credential_refresh(&self) -> Option<Duration> {
        (self.credential_refresh_secs > 0).then(|| Duration::from_secs(self.credential_refresh_secs))
    }

    pub fn resume_check(&self) -> Duration {
        Duration::from_secs(self.resume_check_secs)
    }
}

/// Get the default data directory
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("folio")
}

fn default_container_id() -> String {
    DEFAULT_CONTAINER_ID.to_string()
}

fn default_poll_interval_secs() -> u64 {
    20
}

fn default_debounce_secs() -> u64 {
    10
}

fn default_credential_refresh_secs() -> u64 {
    600
}

fn default_resume_check_secs() -> u64 {
    60
}
