//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/mptrack/config.toml`, then
//! selected fields are overridden from the environment.
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/mptrack/` (~/.config/mptrack/)
//! - Data: `$XDG_DATA_HOME/mptrack/` (~/.local/share/mptrack/)
//! - State/Logs: `$XDG_STATE_HOME/mptrack/` (~/.local/state/mptrack/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// User-Agent sent with every hit unless overridden.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1";

/// Environment variable overriding `tracker.endpoint`
pub const ENV_ENDPOINT: &str = "MPTRACK_ENDPOINT";
/// Environment variable overriding `tracker.measurement_id`
pub const ENV_MEASUREMENT_ID: &str = "MPTRACK_MEASUREMENT_ID";
/// Environment variable overriding `tracker.preview_enabled` (`"true"` enables)
pub const ENV_PREVIEW_ENABLED: &str = "MPTRACK_PREVIEW_ENABLED";
/// Environment variable overriding `tracker.preview_header`
pub const ENV_PREVIEW_HEADER: &str = "MPTRACK_PREVIEW_HEADER";

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Measurement endpoint configuration
    #[serde(default)]
    pub tracker: TrackerConfig,

    /// Device metadata overrides
    #[serde(default)]
    pub device: DeviceConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Measurement endpoint configuration
///
/// Read-only at call sites; the tracker clones what it needs at construction.
#[derive(Debug, Deserialize, Clone)]
pub struct TrackerConfig {
    /// Collection endpoint (e.g., `https://sgtm.example.com/mp/collect`)
    pub endpoint: Option<String>,

    /// Measurement / target ID sent as `tid`
    pub measurement_id: Option<String>,

    /// Tag debug preview: adds `_dbg=1` and the preview header
    #[serde(default)]
    pub preview_enabled: bool,

    /// Value for the `x-gtm-server-preview` header
    pub preview_header: Option<String>,

    /// User-Agent header for outbound hits
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Prefix used to synthesize `page_location` for page views
    #[serde(default = "default_page_url_prefix")]
    pub page_url_prefix: String,

    /// HTTP timeout in seconds; unset means no timeout
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            measurement_id: None,
            preview_enabled: false,
            preview_header: None,
            user_agent: default_user_agent(),
            page_url_prefix: default_page_url_prefix(),
            timeout_secs: None,
        }
    }
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

fn default_page_url_prefix() -> String {
    "app://".to_string()
}

impl TrackerConfig {
    /// Check if the endpoint and measurement ID are both configured
    pub fn is_ready(&self) -> bool {
        self.validate().is_ok()
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        let endpoint = self.endpoint.as_deref().ok_or_else(|| {
            Error::Config("tracker.endpoint is required".to_string())
        })?;

        let parsed = url::Url::parse(endpoint)
            .map_err(|e| Error::Config(format!("invalid tracker.endpoint: {}", e)))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(Error::Config(format!(
                "tracker.endpoint must be http or https, got {}",
                parsed.scheme()
            )));
        }

        match self.measurement_id.as_deref() {
            Some(id) if !id.is_empty() => {}
            _ => {
                return Err(Error::Config(
                    "tracker.measurement_id is required".to_string(),
                ))
            }
        }

        Ok(())
    }

    /// Preview header value, only when preview mode is on and a token is set
    pub fn preview_token(&self) -> Option<&str> {
        if !self.preview_enabled {
            return None;
        }
        self.preview_header.as_deref().filter(|h| !h.is_empty())
    }
}

/// Device metadata overrides
///
/// Anything left unset falls back to what the host reports, then to a literal.
#[derive(Debug, Deserialize, Clone)]
pub struct DeviceConfig {
    /// Platform label sent as `ep.platform`
    #[serde(default = "default_platform")]
    pub platform: String,
    /// Operating system name
    pub os_name: Option<String>,
    /// Operating system version
    pub os_version: Option<String>,
    /// Device model name
    pub device_model: Option<String>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            platform: default_platform(),
            os_name: None,
            os_version: None,
            device_model: None,
        }
    }
}

fn default_platform() -> String {
    "mobile_app".to_string()
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path, then apply env overrides
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        let mut config = if config_path.exists() {
            Self::load_from(&config_path)?
        } else {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            Config::default()
        };

        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Override tracker fields from environment lookups
    ///
    /// Takes the lookup as a closure so tests don't have to mutate the
    /// process environment.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(endpoint) = lookup(ENV_ENDPOINT) {
            self.tracker.endpoint = Some(endpoint);
        }
        if let Some(id) = lookup(ENV_MEASUREMENT_ID) {
            self.tracker.measurement_id = Some(id);
        }
        if let Some(enabled) = lookup(ENV_PREVIEW_ENABLED) {
            self.tracker.preview_enabled = enabled == "true";
        }
        if let Some(header) = lookup(ENV_PREVIEW_HEADER) {
            self.tracker.preview_header = Some(header);
        }
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/mptrack/config.toml` (~/.config/mptrack/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("mptrack").join("config.toml")
    }

    /// Returns the data directory path (for the durable store)
    ///
    /// `$XDG_DATA_HOME/mptrack/` (~/.local/share/mptrack/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("mptrack")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/mptrack/` (~/.local/state/mptrack/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("mptrack")
    }

    /// Returns the durable store file path
    ///
    /// `$XDG_DATA_HOME/mptrack/store.json`
    pub fn store_path() -> PathBuf {
        Self::data_dir().join("store.json")
    }
}
