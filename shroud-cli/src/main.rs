//! # shroud
//!
//! Command-line client for the shroud relay network.
//!
//! ## Commands
//!
//! - `run`: join every configured router and serve shares until Ctrl+C
//! - `group-id`: print the group id an artifact derives
//! - `group`: list the other members of the group
//! - `search`: search every member's shares
//! - `browse`: list a member's shares
//! - `download`: fetch a file from a member
//! - `upload`: send a file to a member
//!
//! ## Example
//!
//! ```bash
//! shroud group-id holiday.jpg
//! shroud --config client.toml run
//! shroud search "blue train"
//! shroud download 9f2c...e1 4be0...77 -o blue-train.flac
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

mod commands;
mod config;

use commands::{browse, group, group_id, run, search, transfer};

/// Command-line client for the shroud relay network.
#[derive(Parser, Debug)]
#[command(name = "shroud")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Client configuration file (default: client.toml)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Which enabled router to use for one-shot commands
    #[arg(long, global = true, default_value = "0")]
    router: usize,

    /// Seconds to wait for the router to accept us
    #[arg(long, global = true, default_value = "30")]
    connect_timeout: u64,

    /// Log at debug level unless RUST_LOG is set
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Join every enabled router and serve shares until Ctrl+C
    Run,

    /// Print the group id derived from an artifact file
    GroupId {
        /// Group artifact
        artifact: PathBuf,
    },

    /// List the other members of the group
    Group,

    /// Search every member's shares
    Search {
        /// Keyword to match against file names
        keyword: String,

        /// Seconds to collect results
        #[arg(long, default_value = "5")]
        wait: u64,
    },

    /// List a member's shared folders and files
    Browse {
        /// Member client id
        member: String,

        /// Folder id (default: the member's share roots)
        folder: Option<String>,
    },

    /// Download a file from a member
    Download {
        /// Member client id
        member: String,

        /// File id from search or browse
        file: String,

        /// Destination path (default: the download folder)
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Upload a file to a member
    Upload {
        /// Member client id
        member: String,

        /// Local file
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = match (&cli.command, cli.verbose) {
        (_, true) => "debug",
        (Commands::Run, false) => "info",
        _ => "warn",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Commands::GroupId { artifact } = &cli.command {
        return group_id::run(artifact).await;
    }

    let config = config::load(cli.config.as_deref())?;
    let wait = Duration::from_secs(cli.connect_timeout);

    match cli.command {
        Commands::Run => run::run(&config).await?,
        Commands::GroupId { .. } => {}
        Commands::Group => group::run(&config, cli.router, wait).await?,
        Commands::Search { keyword, wait: window } => {
            search::run(&config, cli.router, wait, &keyword, Duration::from_secs(window)).await?;
        }
        Commands::Browse { member, folder } => {
            browse::run(&config, cli.router, wait, &member, folder.as_deref()).await?;
        }
        Commands::Download {
            member,
            file,
            output,
        } => {
            transfer::download(&config, cli.router, wait, &member, &file, output).await?;
        }
        Commands::Upload { member, path } => {
            transfer::upload(&config, cli.router, wait, &member, &path).await?;
        }
    }

    Ok(())
}
