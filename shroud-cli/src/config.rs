//! Configuration loading for the shroud CLI.

use anyhow::{Context, Result};
use shroud_client::{ClientConfig, RouterEntry};
use std::path::{Path, PathBuf};

/// Config file used when `--config` is not given.
pub const DEFAULT_CONFIG: &str = "client.toml";

/// Load the client configuration.
///
/// An explicit path must exist. Without one, `client.toml` in the working
/// directory is used if present.
pub fn load(path: Option<&Path>) -> Result<ClientConfig> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => {
            let path = PathBuf::from(DEFAULT_CONFIG);
            if !path.exists() {
                anyhow::bail!("No {} found. Pass --config <path>.", DEFAULT_CONFIG);
            }
            path
        }
    };
    ClientConfig::from_file(&path)
        .with_context(|| format!("Failed to load config from {}", path.display()))
}

/// Pick the `index`th enabled router.
pub fn router(config: &ClientConfig, index: usize) -> Result<RouterEntry> {
    let enabled: Vec<_> = config.enabled_routers().collect();
    if enabled.is_empty() {
        anyhow::bail!("No enabled routers configured");
    }
    enabled
        .get(index)
        .map(|entry| (*entry).clone())
        .with_context(|| format!("Router {} out of range ({} enabled)", index, enabled.len()))
}
