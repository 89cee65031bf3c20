//! Run a client against every enabled router until Ctrl+C.

use anyhow::{Context, Result};
use shroud_client::{ClientConfig, ClientContext, ClientService};

/// Run the client.
pub async fn run(config: &ClientConfig) -> Result<()> {
    let context = ClientContext::from_config(config);
    let services: Vec<ClientService> = config
        .enabled_routers()
        .map(|entry| ClientService::new(entry.clone(), context.clone()))
        .collect();
    if services.is_empty() {
        anyhow::bail!("No enabled routers configured");
    }

    println!("Client {} ({})", context.name, context.id);
    println!("  Shares:    {} folder(s)", context.shares.roots().len());
    println!("  Downloads: {}", context.download_dir.display());
    println!("  Routers:   {}", services.len());

    for service in &services {
        service.start();
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;

    tracing::info!("shutting down");
    for service in &services {
        service.stop();
    }
    for service in &services {
        service.join().await;
    }
    Ok(())
}
