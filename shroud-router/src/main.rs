//! shroud-router binary entry point.
//!
//! Usage:
//! ```bash
//! shroud-router --config router.toml
//! shroud-router --bind 0.0.0.0:8080 --verbose
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use shroud_router::{Config, RouterService};

/// Relay router for the shroud network.
#[derive(Parser, Debug)]
#[command(name = "shroud-router")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file (defaults are used when router.toml is absent)
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Override the listen address
    #[arg(long, short)]
    bind: Option<String>,

    /// Log at debug level unless RUST_LOG is set
    #[arg(long, short)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = load_config(cli.config)?;
    if let Some(bind) = cli.bind {
        config.server.bind_address = bind;
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        name = %config.server.name,
        bind = %config.server.bind_address,
        "starting router"
    );

    let service = RouterService::new(config);
    service.start();

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;

    tracing::info!("shutting down");
    service.stop();
    service.join().await;
    Ok(())
}

fn load_config(path: Option<PathBuf>) -> Result<Config> {
    match path {
        Some(path) => Config::from_file(&path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => {
            let path = PathBuf::from("router.toml");
            if path.exists() {
                Config::from_file(&path).context("Failed to load router.toml")
            } else {
                Ok(Config::default())
            }
        }
    }
}
