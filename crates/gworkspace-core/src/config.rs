//! Configuration management for gworkspace

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings
    #[serde(default)]
    pub general: GeneralConfig,

    /// Credential file locations
    #[serde(default)]
    pub auth: AuthConfig,

    /// Google API client settings
    #[serde(default)]
    pub api: ApiConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Data directory (logs live under `<data_dir>/logs`)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            data_dir: default_data_dir(),
        }
    }
}

/// Where credentials are read from and written to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Local OAuth token file, written with owner-only permissions
    #[serde(default = "default_token_file")]
    pub token_file: PathBuf,

    /// OAuth client secret downloaded from the Google Cloud console
    #[serde(default = "default_client_secret_file")]
    pub client_secret_file: PathBuf,

    /// Explicit Application Default Credentials file.
    /// When unset, `GOOGLE_APPLICATION_CREDENTIALS` and then the gcloud
    /// well-known location are used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adc_file: Option<PathBuf>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_file: default_token_file(),
            client_secret_file: default_client_secret_file(),
            adc_file: None,
        }
    }
}

/// Google API client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Override for the API root (e.g. a local proxy). Every API is then
    /// served from `<root_url>/<name>/<version>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_url: Option<String>,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Maximum Google API requests per second
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_second: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            root_url: None,
            timeout_secs: default_timeout_secs(),
            rate_limit_per_second: default_rate_limit(),
        }
    }
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_data_dir() -> PathBuf {
    get_data_dir()
}

fn default_token_file() -> PathBuf {
    get_config_dir().join("token.json")
}

fn default_client_secret_file() -> PathBuf {
    get_config_dir().join("client_secret.json")
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_rate_limit() -> u32 {
    10
}

/// Get the data directory (XDG: ~/.local/share/gworkspace)
fn get_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".local")
        .join("share")
        .join(crate::APP_NAME)
}

/// Get the config directory (XDG: ~/.config/gworkspace)
pub fn get_config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join(crate::APP_NAME)
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&contents)?;
            info!("Loaded configuration from {:?}", path);
            Ok(config)
        } else {
            info!("No config file found at {:?}, using defaults", path);
            Ok(Config::default())
        }
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Default config file path
    pub fn config_path() -> PathBuf {
        get_config_dir().join("config.toml")
    }

    /// Log directory
    pub fn log_dir(&self) -> PathBuf {
        self.general.data_dir.join("logs")
    }
}
