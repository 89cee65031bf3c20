//! Configuration loading for shroud-router.
//!
//! Configuration is loaded from a TOML file (default: `router.toml`).

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration for shroud-router.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Transfer configuration.
    #[serde(default)]
    pub transfer: TransferConfig,
    /// Idle and restart timeouts.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,
}

/// Server configuration.
#[derive(Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the listener (default: 0.0.0.0:8080).
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Passphrase protecting the handshake (default: empty, no encryption).
    #[serde(default)]
    pub passphrase: String,
    /// Router name for logs.
    #[serde(default = "default_name")]
    pub name: String,
}

/// Transfer configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TransferConfig {
    /// Chunk size in bytes (default: 64 KiB).
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    /// Maximum outstanding chunks per transfer (default: 4).
    #[serde(default = "default_max_chunks")]
    pub max_chunks: usize,
    /// Maximum concurrent transfers router-wide (default: 64).
    #[serde(default = "default_max_transfers")]
    pub max_transfers: usize,
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TimeoutConfig {
    /// Seconds before an idle client is dropped (default: 180).
    #[serde(default = "default_client_idle_secs")]
    pub client_idle_secs: u64,
    /// Seconds before an idle transfer is dropped (default: 60).
    #[serde(default = "default_transfer_idle_secs")]
    pub transfer_idle_secs: u64,
    /// Seconds between a failed bind and the next attempt (default: 5).
    #[serde(default = "default_restart_secs")]
    pub restart_secs: u64,
}

/// Resource limits.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Concurrent relay fan-out tasks (default: 32).
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Largest accepted frame body in bytes (default: 16 MiB).
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

// Default value functions
fn default_bind_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_name() -> String {
    "shroud".to_string()
}

fn default_chunk_size() -> u64 {
    64 * 1024 // 64 KiB
}

fn default_max_chunks() -> usize {
    4
}

fn default_max_transfers() -> usize {
    64
}

fn default_client_idle_secs() -> u64 {
    180
}

fn default_transfer_idle_secs() -> u64 {
    60
}

fn default_restart_secs() -> u64 {
    5
}

fn default_max_workers() -> usize {
    32
}

fn default_max_body_bytes() -> usize {
    16 * 1024 * 1024 // 16 MiB
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            passphrase: String::new(),
            name: default_name(),
        }
    }
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("bind_address", &self.bind_address)
            .field("passphrase", &"[REDACTED]")
            .field("name", &self.name)
            .finish()
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            max_chunks: default_max_chunks(),
            max_transfers: default_max_transfers(),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            client_idle_secs: default_client_idle_secs(),
            transfer_idle_secs: default_transfer_idle_secs(),
            restart_secs: default_restart_secs(),
        }
    }
}

impl TimeoutConfig {
    /// Client idle window.
    pub fn client_idle(&self) -> Duration {
        Duration::from_secs(self.client_idle_secs)
    }

    /// Transfer idle window.
    pub fn transfer_idle(&self) -> Duration {
        Duration::from_secs(self.transfer_idle_secs)
    }

    /// Restart delay.
    pub fn restart(&self) -> Duration {
        Duration::from_secs(self.restart_secs)
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
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
}
