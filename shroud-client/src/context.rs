//! Everything a client's machines share, passed explicitly.

use std::path::PathBuf;
use std::sync::Arc;

use shroud_types::ClientId;

use crate::config::{ClientConfig, TimeoutConfig};
use crate::search::SearchStore;
use crate::share::ShareIndex;

/// Identity, local folders and result stores of one client process.
#[derive(Debug, Clone)]
pub struct ClientContext {
    /// Client id announced on join. Stable for the life of the process.
    pub id: ClientId,
    /// Display name.
    pub name: String,
    /// Folders offered to the group.
    pub shares: ShareIndex,
    /// Where received files are written.
    pub download_dir: PathBuf,
    /// Search results delivered through tunnels.
    pub searches: Arc<SearchStore>,
    /// Retry and keep-alive timing.
    pub timeouts: TimeoutConfig,
}

impl ClientContext {
    /// Context for a loaded configuration, with a fresh client id.
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            id: ClientId::random(),
            name: config.client.name.clone(),
            shares: ShareIndex::new(config.client.shares.clone()),
            download_dir: config.client.download_dir.clone(),
            searches: Arc::new(SearchStore::new()),
            timeouts: config.timeouts.clone(),
        }
    }
}
