//! CLI command implementations.

pub mod browse;
pub mod group;
pub mod group_id;
pub mod run;
pub mod search;
pub mod transfer;

use anyhow::{Context, Result};
use shroud_client::{Client, ClientConfig, ClientContext, ClientService};
use shroud_types::ClientId;
use std::sync::Arc;
use std::time::Duration;

use crate::config;

/// A client joined on one router for the length of a command.
pub struct Connected {
    /// Shared client state; search results land here.
    pub context: ClientContext,
    /// The joined client.
    pub client: Arc<Client>,
    service: ClientService,
}

impl Connected {
    /// Connect to the `router`th enabled router and wait until its tunnel is open.
    pub async fn open(config: &ClientConfig, router: usize, wait: Duration) -> Result<Self> {
        let entry = config::router(config, router)?;
        let endpoint = entry.endpoint();
        let context = ClientContext::from_config(config);
        let service = ClientService::new(entry, context.clone());
        service.start();

        let ready = tokio::time::timeout(wait, service.ready()).await;
        let client = match ready {
            Ok(Some(client)) => client,
            Ok(None) => {
                service.stop();
                service.join().await;
                anyhow::bail!("Connection to {} dropped before it was ready", endpoint);
            }
            Err(_) => {
                service.stop();
                service.join().await;
                anyhow::bail!("Timed out connecting to {}", endpoint);
            }
        };

        Ok(Self {
            context,
            client,
            service,
        })
    }

    /// Quit the router and wait for the machine to stop.
    pub async fn close(self) {
        self.service.stop();
        self.service.join().await;
    }
}

/// Parse a member id given on the command line.
pub fn member(id: &str) -> Result<ClientId> {
    let id = id.trim();
    if id.len() != 32 || !id.chars().all(|c| c.is_ascii_hexdigit()) {
        anyhow::bail!("Invalid client id: {} (expected 32 hex characters)", id);
    }
    Ok(ClientId::new(id.to_ascii_lowercase()))
}

/// Run `f` against a fresh connection, closing it whatever the outcome.
pub async fn with_client<F, Fut, T>(config: &ClientConfig, router: usize, wait: Duration, f: F) -> Result<T>
where
    F: FnOnce(Arc<Client>, ClientContext) -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let connected = Connected::open(config, router, wait)
        .await
        .context("Failed to join the group")?;
    let result = f(connected.client.clone(), connected.context.clone()).await;
    connected.close().await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn member_ids_are_checked() {
        let id = member("0123456789ABCDEF0123456789abcdef").unwrap();
        assert_eq!(id.as_str(), "0123456789abcdef0123456789abcdef");
        assert!(member("alice").is_err());
        assert!(member("0123456789abcdef0123456789abcdeg").is_err());
    }
}
