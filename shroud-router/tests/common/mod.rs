//! Loopback harness: one router and any number of clients on 127.0.0.1.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use shroud_client::{Client, ClientConfig, ClientContext, ClientService, RouterEntry};
use shroud_router::{Config, RouterService};
use tempfile::TempDir;

pub const WAIT: Duration = Duration::from_secs(10);

pub struct Harness {
    pub router: RouterService,
    pub address: SocketAddr,
    dir: TempDir,
}

impl Harness {
    pub async fn start() -> Self {
        Self::start_with(|_| {}).await
    }

    pub async fn start_with(tweak: impl FnOnce(&mut Config)) -> Self {
        let mut config = Config::default();
        config.server.bind_address = "127.0.0.1:0".to_string();
        config.timeouts.restart_secs = 0;
        tweak(&mut config);

        let router = RouterService::new(config);
        router.start();
        let address = tokio::time::timeout(WAIT, router.router().wait_bound())
            .await
            .expect("router did not bind")
            .expect("router stopped before binding");
        Self {
            router,
            address,
            dir: tempfile::tempdir().unwrap(),
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Write a group artifact and return its path.
    pub fn artifact(&self, name: &str, bytes: &[u8]) -> PathBuf {
        let path = self.path(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    /// A share folder for `owner` holding `files`.
    pub fn share(&self, owner: &str, files: &[(&str, &[u8])]) -> PathBuf {
        let root = self.path(&format!("{}-share", owner));
        std::fs::create_dir_all(&root).unwrap();
        for (name, bytes) in files {
            std::fs::write(root.join(name), bytes).unwrap();
        }
        root
    }

    pub fn entry(&self, artifact: &Path) -> RouterEntry {
        RouterEntry::new("127.0.0.1", self.address.port(), artifact)
    }

    /// Start a client and wait until its tunnel is open.
    pub async fn peer(&self, name: &str, artifact: &Path, shares: Vec<PathBuf>) -> Peer {
        let mut config = ClientConfig::default();
        config.client.name = name.to_string();
        config.client.shares = shares;
        config.client.download_dir = self.path(&format!("{}-downloads", name));
        config.timeouts.restart_secs = 1;
        config.timeouts.poll_millis = 5;

        let context = ClientContext::from_config(&config);
        let service = ClientService::new(self.entry(artifact), context.clone());
        service.start();
        let client = tokio::time::timeout(WAIT, service.ready())
            .await
            .expect("client did not come up")
            .expect("client dropped before ready");

        // The router attaches the tunnel just after answering it.
        let router = self.router.router().clone();
        let id = client.id().clone();
        tokio::time::timeout(WAIT, async move {
            while router.reachable(&id).is_err() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("tunnel never attached");

        Peer {
            service,
            context,
            client,
        }
    }

    pub async fn stop(self) {
        self.router.stop();
        tokio::time::timeout(WAIT, self.router.join())
            .await
            .expect("router did not stop");
    }
}

pub struct Peer {
    pub service: ClientService,
    pub context: ClientContext,
    pub client: Arc<Client>,
}

impl Peer {
    pub async fn stop(self) {
        self.service.stop();
        tokio::time::timeout(WAIT, self.service.join())
            .await
            .expect("client did not stop");
    }
}

/// Deterministic bytes that differ from chunk to chunk.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8 ^ (i / 65_536) as u8).collect()
}
