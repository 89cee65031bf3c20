//! Configuration loading for shroud clients.
//!
//! Configuration is loaded from a TOML file (default: `client.toml`). Only
//! the router address, port and group artifact are required; everything
//! else has defaults.
//!
//! ```toml
//! [client]
//! name = "laptop"
//! download_dir = "downloads"
//! shares = ["/srv/music"]
//!
//! [[routers]]
//! address = "relay.example.net"
//! port = 8080
//! group = "secret.png"
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration for a client.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientConfig {
    /// Identity and local folders.
    #[serde(default)]
    pub client: ClientSection,
    /// Routers to connect to.
    #[serde(default)]
    pub routers: Vec<RouterEntry>,
    /// Retry and keep-alive timing.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

/// Identity and local folders.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSection {
    /// Name shown to other group members.
    #[serde(default = "default_name")]
    pub name: String,
    /// Where downloads and received uploads are written (default: `downloads`).
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
    /// Folders offered to the group.
    #[serde(default)]
    pub shares: Vec<PathBuf>,
}

/// One router and the group to join on it.
#[derive(Clone, Deserialize)]
pub struct RouterEntry {
    /// Host name or IP address.
    pub address: String,
    /// TCP port.
    pub port: u16,
    /// Passphrase protecting the handshake (default: empty).
    #[serde(default)]
    pub passphrase: String,
    /// Path of the group artifact.
    pub group: PathBuf,
    /// Skip this router when false (default: true).
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

/// Retry and keep-alive timing.
#[derive(Debug, Clone, Deserialize)]
pub struct TimeoutConfig {
    /// Seconds between a failure and the next connection attempt (default: 5).
    #[serde(default = "default_restart_secs")]
    pub restart_secs: u64,
    /// Seconds between keep-alive pings while listening (default: 60).
    #[serde(default = "default_ping_secs")]
    pub ping_secs: u64,
    /// Milliseconds between download polls when no chunk is ready (default: 250).
    #[serde(default = "default_poll_millis")]
    pub poll_millis: u64,
}

// Default value functions
fn default_name() -> String {
    "shroud".to_string()
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_enabled() -> bool {
    true
}

fn default_restart_secs() -> u64 {
    5
}

fn default_ping_secs() -> u64 {
    60
}

fn default_poll_millis() -> u64 {
    250
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            name: default_name(),
            download_dir: default_download_dir(),
            shares: Vec::new(),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            restart_secs: default_restart_secs(),
            ping_secs: default_ping_secs(),
            poll_millis: default_poll_millis(),
        }
    }
}

impl TimeoutConfig {
    /// Delay before reconnecting.
    pub fn restart(&self) -> Duration {
        Duration::from_secs(self.restart_secs)
    }

    /// Keep-alive interval.
    pub fn ping(&self) -> Duration {
        Duration::from_secs(self.ping_secs.max(1))
    }

    /// Download poll delay.
    pub fn poll(&self) -> Duration {
        Duration::from_millis(self.poll_millis)
    }
}

impl RouterEntry {
    /// Entry for `address:port` with the given group artifact.
    pub fn new(address: impl Into<String>, port: u16, group: impl Into<PathBuf>) -> Self {
        Self {
            address: address.into(),
            port,
            passphrase: String::new(),
            group: group.into(),
            enabled: true,
        }
    }

    /// `host:port` for connecting.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    /// Check the entry can boot a machine and read the group artifact.
    pub fn load_artifact(&self) -> Result<Vec<u8>, ConfigError> {
        if self.address.trim().is_empty() {
            return Err(ConfigError::Invalid("router address is empty".to_string()));
        }
        if self.port == 0 {
            return Err(ConfigError::Invalid("router port is 0".to_string()));
        }
        std::fs::read(&self.group).map_err(|e| ConfigError::ReadError {
            path: self.group.clone(),
            source: e,
        })
    }
}

// Custom Debug to avoid leaking the passphrase in logs.
impl std::fmt::Debug for RouterEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterEntry")
            .field("address", &self.address)
            .field("port", &self.port)
            .field("passphrase", &"[REDACTED]")
            .field("group", &self.group)
            .field("enabled", &self.enabled)
            .finish()
    }
}

impl ClientConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Routers not switched off.
    pub fn enabled_routers(&self) -> impl Iterator<Item = &RouterEntry> {
        self.routers.iter().filter(|r| r.enabled)
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read a file named by the configuration.
    #[error("failed to read {path}: {source}")]
    ReadError {
        /// Path that could not be read.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// A value is unusable.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
