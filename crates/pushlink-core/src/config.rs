//! Application configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/pushlink/config.toml)
//! 3. Environment variables (PUSHLINK_* prefix)
//!
//! Environment variables take precedence over config file values.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable prefix
const ENV_PREFIX: &str = "PUSHLINK";

/// Default REST endpoint
pub const DEFAULT_API_URL: &str = "https://api.pushbullet.com/v2";

/// Default realtime stream endpoint (the access token is appended as a path segment)
pub const DEFAULT_STREAM_URL: &str = "wss://stream.pushbullet.com/websocket";

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory for local state (watermark, cached pushes, credential)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// REST API base URL
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Realtime stream base URL
    #[serde(default = "default_stream_url")]
    pub stream_url: String,

    /// Iden of the device registered for this client
    #[serde(default)]
    pub local_device_iden: Option<String>,

    /// Nickname used when registering this client as a device
    #[serde(default = "default_device_nickname")]
    pub device_nickname: String,

    /// Open link pushes in the browser as they arrive
    #[serde(default)]
    pub auto_open_links: bool,

    /// Log file (logs go to stderr when unset)
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Notification filtering rules
    #[serde(default)]
    pub notifications: NotificationSettings,

    /// Connection timing
    #[serde(default)]
    pub connection: ConnectionSettings,
}

/// Which inbound records surface as notifications
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotificationSettings {
    /// Only notify for pushes explicitly targeted at the local device
    #[serde(default)]
    pub only_browser_pushes: bool,

    /// Never notify for pushes sent from the local device
    #[serde(default)]
    pub hide_browser_pushes: bool,

    /// Surface mirrored phone notifications
    #[serde(default)]
    pub notification_mirroring: bool,

    /// Android package names whose mirrors are dropped
    #[serde(default)]
    pub muted_packages: Vec<String>,

    /// Push notifications stay on screen until acted upon
    #[serde(default)]
    pub require_interaction: bool,

    /// Mirror notifications stay on screen until acted upon
    #[serde(default)]
    pub require_interaction_mirrored: bool,
}

/// Timing contract for the realtime connection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionSettings {
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_secs: u64,
    #[serde(default = "default_keepalive_interval")]
    pub keepalive_interval_secs: u64,
    #[serde(default = "default_retry_interval")]
    pub retry_interval_secs: u64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            heartbeat_timeout_secs: default_heartbeat_timeout(),
            keepalive_interval_secs: default_keepalive_interval(),
            retry_interval_secs: default_retry_interval(),
            sweep_interval_secs: default_sweep_interval(),
            max_attempts: default_max_attempts(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl ConnectionSettings {
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            api_url: default_api_url(),
            stream_url: default_stream_url(),
            local_device_iden: None,
            device_nickname: default_device_nickname(),
            auto_open_links: false,
            log_file: None,
            notifications: NotificationSettings::default(),
            connection: ConnectionSettings::default(),
        }
    }
}

impl Config {
    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables (PUSHLINK_DATA_DIR, PUSHLINK_API_URL, ...)
    /// 2. Config file (~/.config/pushlink/config.toml or PUSHLINK_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load configuration, preferring a path given on the command line
    pub fn load_with_cli_override(path: Option<&PathBuf>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_path(path),
            None => Self::load(),
        }
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

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var(format!("{}_DATA_DIR", ENV_PREFIX)) {
            self.data_dir = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var(format!("{}_API_URL", ENV_PREFIX)) {
            if !val.is_empty() {
                self.api_url = val;
            }
        }

        if let Ok(val) = std::env::var(format!("{}_STREAM_URL", ENV_PREFIX)) {
            if !val.is_empty() {
                self.stream_url = val;
            }
        }

        if let Ok(val) = std::env::var(format!("{}_DEVICE_IDEN", ENV_PREFIX)) {
            self.local_device_iden = if val.is_empty() { None } else { Some(val) };
        }

        if let Ok(val) = std::env::var(format!("{}_AUTO_OPEN_LINKS", ENV_PREFIX)) {
            self.auto_open_links = val.eq_ignore_ascii_case("true") || val == "1";
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

    /// Save configuration to the default file
    pub fn save(&self) -> Result<()> {
        self.save_to_path(&Self::config_file_path())
    }

    /// Save configuration to a specific file
    pub fn save_to_path(&self, config_path: &PathBuf) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(config_path, content)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;
        Ok(())
    }

    /// Get the config file path
    ///
    /// Can be overridden with PUSHLINK_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var(format!("{}_CONFIG", ENV_PREFIX)) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("pushlink")
            .join("config.toml")
    }

    /// Path of the stored access token
    pub fn credential_path(&self) -> PathBuf {
        self.data_dir.join("access_token")
    }

    /// Path of the stored encryption key export
    pub fn encryption_key_path(&self) -> PathBuf {
        self.data_dir.join("encryption_key")
    }

    /// Full stream URL for a given access token
    pub fn stream_url_for(&self, access_token: &str) -> String {
        format!("{}/{}", self.stream_url.trim_end_matches('/'), access_token)
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pushlink")
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_stream_url() -> String {
    DEFAULT_STREAM_URL.to_string()
}

fn default_device_nickname() -> String {
    "pushlink".to_string()
}

fn default_heartbeat_timeout() -> u64 {
    35
}

fn default_keepalive_interval() -> u64 {
    20
}

fn default_retry_interval() -> u64 {
    5
}

fn default_sweep_interval() -> u64 {
    5
}

fn default_max_attempts() -> u32 {
    5
}

fn default_connect_timeout() -> u64 {
    10
}
