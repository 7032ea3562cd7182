//! TOML-based configuration persistence for the bridge.
//!
//! Reads and writes `AppConfig` to the platform-appropriate config file:
//! - Windows:  `%APPDATA%\MelkoLeaf\config.toml`
//! - Linux:    `~/.config/melkoleaf/config.toml`
//! - macOS:    `~/Library/Application Support/MelkoLeaf/config.toml`
//!
//! Example:
//!
//! ```toml
//! [bridge]
//! bind_address = "0.0.0.0"
//! http_port = 16021
//! stream_port = 60222
//!
//! [devices]
//! mac_addresses = ["BE:EF:00:00:00:01", "BE:EF:00:00:00:02"]
//! power_on_at_connect = true
//!
//! [broadcast]
//! max_fps = 30
//! ```
//!
//! # Serde default values
//!
//! Every field carries `#[serde(default = "...")]`, so a file may name only
//! the settings it changes and an empty or missing file yields the defaults.
//!
//! # Precedence
//!
//! File values are overridden by `MELK_MAC_ADDRESSES`, which in turn is
//! overridden by command-line flags (applied in `main`).

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use melkoleaf_core::{DeviceAddress, DeviceAddressError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::domain::auth::{AuthToken, AuthTokenError};
use crate::domain::config::{
    BridgeConfig, BroadcastSettings, DeviceSource, RetryPolicy, DEFAULT_DEVICE_ID,
    DEFAULT_HTTP_PORT, DEFAULT_STREAM_PORT,
};

/// Environment variable holding a comma-separated device list.
pub const MAC_ADDRESSES_ENV: &str = "MELK_MAC_ADDRESSES";

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// `bind_address` is not an IP address.
    #[error("invalid bind address '{0}'")]
    InvalidAddress(String),

    /// A device entry is not a hardware address.
    #[error("invalid device address: {0}")]
    InvalidDevice(#[from] DeviceAddressError),

    /// The fixed auth token cannot appear in a URL path.
    #[error("invalid auth token: {0}")]
    InvalidToken(#[from] AuthTokenError),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level bridge configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub bridge: BridgeSection,
    #[serde(default)]
    pub devices: DevicesSection,
    #[serde(default)]
    pub broadcast: BroadcastSection,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// Listener and identity settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BridgeSection {
    /// IP address to bind both listeners to.  `"0.0.0.0"` binds all interfaces.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_stream_port")]
    pub stream_port: u16,
    /// Fixed auth token.  A random one is generated per process when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    #[serde(default = "default_device_id")]
    pub device_id: String,
    /// Publish the mDNS advertisement.
    #[serde(default = "default_true")]
    pub advertise: bool,
}

/// Which strips to drive.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DevicesSection {
    /// Hardware addresses to connect to.  Empty means "scan".
    #[serde(default)]
    pub mac_addresses: Vec<String>,
    #[serde(default = "default_scan_timeout_secs")]
    pub scan_timeout_secs: u64,
    #[serde(default = "default_true")]
    pub power_on_at_connect: bool,
}

/// Fan-out loop tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BroadcastSection {
    #[serde(default = "default_max_fps")]
    pub max_fps: u32,
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
}

/// Reconnect backoff.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrySection {
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingSection {
    /// `tracing` log level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub level: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_http_port() -> u16 {
    DEFAULT_HTTP_PORT
}
fn default_stream_port() -> u16 {
    DEFAULT_STREAM_PORT
}
fn default_device_id() -> String {
    DEFAULT_DEVICE_ID.to_string()
}
fn default_true() -> bool {
    true
}
fn default_scan_timeout_secs() -> u64 {
    12
}
fn default_max_fps() -> u32 {
    30
}
fn default_write_timeout_ms() -> u64 {
    250
}
fn default_idle_timeout_ms() -> u64 {
    500
}
fn default_connect_timeout_ms() -> u64 {
    10_000
}
fn default_initial_backoff_ms() -> u64 {
    500
}
fn default_max_backoff_ms() -> u64 {
    8_000
}
fn default_max_attempts() -> u32 {
    5
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for BridgeSection {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            http_port: default_http_port(),
            stream_port: default_stream_port(),
            auth_token: None,
            device_id: default_device_id(),
            advertise: default_true(),
        }
    }
}

impl Default for DevicesSection {
    fn default() -> Self {
        Self {
            mac_addresses: Vec::new(),
            scan_timeout_secs: default_scan_timeout_secs(),
            power_on_at_connect: default_true(),
        }
    }
}

impl Default for BroadcastSection {
    fn default() -> Self {
        Self {
            max_fps: default_max_fps(),
            write_timeout_ms: default_write_timeout_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
        }
    }
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ── Conversion ────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Applies `MELK_MAC_ADDRESSES` if it is set and non-empty.
    pub fn apply_env(&mut self) {
        if let Ok(value) = std::env::var(MAC_ADDRESSES_ENV) {
            self.apply_mac_list(&value);
        }
    }

    /// Replaces the device list with the comma-separated entries in `list`.
    /// A blank list leaves the configured devices untouched.
    pub fn apply_mac_list(&mut self, list: &str) {
        let macs: Vec<String> = list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if !macs.is_empty() {
            self.devices.mac_addresses = macs;
        }
    }

    /// Validates the file values and produces the runtime configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidAddress`], [`ConfigError::InvalidDevice`]
    /// or [`ConfigError::InvalidToken`] for values that cannot be used.
    pub fn into_bridge_config(self) -> Result<BridgeConfig, ConfigError> {
        let bind_ip: IpAddr = self
            .bridge
            .bind_address
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidAddress(self.bridge.bind_address.clone()))?;

        let auth_token = match self.bridge.auth_token.as_deref().map(str::trim) {
            Some(token) if !token.is_empty() => {
                Some(AuthToken::from_configured(token)?.as_str().to_string())
            }
            _ => None,
        };

        let devices = if self.devices.mac_addresses.is_empty() {
            DeviceSource::Scan {
                timeout: Duration::from_secs(self.devices.scan_timeout_secs),
            }
        } else {
            let mut addresses = self
                .devices
                .mac_addresses
                .iter()
                .map(|mac| DeviceAddress::parse(mac))
                .collect::<Result<Vec<_>, _>>()?;
            addresses.sort();
            addresses.dedup();
            DeviceSource::Configured(addresses)
        };

        Ok(BridgeConfig {
            bind_ip,
            http_port: self.bridge.http_port,
            stream_port: self.bridge.stream_port,
            auth_token,
            device_id: self.bridge.device_id,
            advertise: self.bridge.advertise,
            devices,
            power_on_at_connect: self.devices.power_on_at_connect,
            broadcast: BroadcastSettings {
                max_fps: self.broadcast.max_fps,
                write_timeout: Duration::from_millis(self.broadcast.write_timeout_ms),
                idle_timeout: Duration::from_millis(self.broadcast.idle_timeout_ms),
            },
            retry: RetryPolicy {
                connect_timeout: Duration::from_millis(self.retry.connect_timeout_ms),
                initial_backoff: Duration::from_millis(self.retry.initial_backoff_ms),
                max_backoff: Duration::from_millis(self.retry.max_backoff_ms),
                max_attempts: self.retry.max_attempts,
            },
        })
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the full path to the default config file.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads `AppConfig` from `path`, or from the platform default location.
///
/// A missing file at the default location yields `AppConfig::default()`; a
/// missing file at an explicitly given path is an error.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors and
/// [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let (path, explicit) = match path {
        Some(p) => (p.to_path_buf(), true),
        None => match config_file_path() {
            Ok(p) => (p, false),
            Err(ConfigError::NoPlatformConfigDir) => return Ok(AppConfig::default()),
            Err(e) => return Err(e),
        },
    };

    match std::fs::read_to_string(&path) {
        Ok(content) => {
            let cfg: AppConfig = toml::from_str(&content)?;
            info!("loaded configuration from {}", path.display());
            Ok(cfg)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && !explicit => {
            info!("no config file at {}; using defaults", path.display());
            Ok(AppConfig::default())
        }
        Err(e) => Err(ConfigError::Io { path, source: e }),
    }
}

/// Persists `config` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(config: &AppConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Resolves the platform config base directory including the `MelkoLeaf`
/// subdirectory.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("MelkoLeaf"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("melkoleaf"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("MelkoLeaf")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
