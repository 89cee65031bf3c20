//! Search results delivered through the tunnel.
//!
//! Results for one search arrive from several members in any order, each
//! tagged with the search id, and are kept until taken.

use std::time::Duration;

use dashmap::DashMap;
use shroud_types::messages::FileEntry;
use shroud_types::{ClientId, SearchId};
use tokio::sync::Notify;

/// One matching file and the member offering it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    /// Member that answered.
    pub client: ClientId,
    /// Matching file.
    pub file: FileEntry,
}

/// Results per search id.
#[derive(Debug, Default)]
pub struct SearchStore {
    results: DashMap<SearchId, Vec<SearchHit>>,
    arrived: Notify,
}

impl SearchStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the files one member returned.
    pub fn record(&self, search: &SearchId, client: &ClientId, files: Vec<FileEntry>) {
        let count = files.len();
        self.results
            .entry(search.clone())
            .or_default()
            .extend(files.into_iter().map(|file| SearchHit {
                client: client.clone(),
                file,
            }));
        tracing::debug!(search = %search, client = %client, count, "search results");
        self.arrived.notify_waiters();
    }

    /// Results so far.
    pub fn results(&self, search: &SearchId) -> Vec<SearchHit> {
        self.results
            .get(search)
            .map(|hits| hits.clone())
            .unwrap_or_default()
    }

    /// Remove and return the results of a search.
    pub fn take(&self, search: &SearchId) -> Vec<SearchHit> {
        self.results
            .remove(search)
            .map(|(_, hits)| hits)
            .unwrap_or_default()
    }

    /// Number of searches with results.
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// True when no results are held.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Wait until at least `min` hits are in or `window` has passed, then
    /// return what arrived.
    pub async fn collect(&self, search: &SearchId, min: usize, window: Duration) -> Vec<SearchHit> {
        let deadline = tokio::time::Instant::now() + window;
        loop {
            let arrived = self.arrived.notified();
            tokio::pin!(arrived);
            arrived.as_mut().enable();

            let hits = self.results(search);
            if hits.len() >= min {
                return hits;
            }
            if tokio::time::timeout_at(deadline, arrived).await.is_err() {
                return self.results(search);
            }
        }
    }
}
