//! # shroud-client
//!
//! Client side of the shroud relay network.
//!
//! A client keeps one [`ClientService`] per configured router. Each service
//! handshakes, joins the group derived from a shared artifact, opens a tunnel
//! for relayed requests and answers them from the local shares.
//!
//! ## Features
//!
//! - **Group sealing**: every application payload is encrypted with the group
//!   key before the router sees it
//! - **Chunked transfers**: downloads and uploads run as their own state
//!   machines with a bounded window of chunks in flight
//! - **Share index**: keyword search and folder browsing over local folders
//!
//! ## Example
//!
//! ```ignore
//! use shroud_client::{ClientConfig, ClientContext, ClientService};
//!
//! let config = ClientConfig::from_file("client.toml")?;
//! let context = ClientContext::from_config(&config);
//! let service = ClientService::new(config.routers[0].clone(), context);
//! service.start();
//!
//! let client = service.ready().await.unwrap();
//! let search = client.search("blue train").await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod commands;
pub mod config;
pub mod context;
pub mod disk;
pub mod error;
pub mod link;
pub mod machine;
pub mod responder;
pub mod search;
pub mod share;
pub mod transfer;

pub use commands::{Client, DownloadTicket};
pub use config::{ClientConfig, ConfigError, RouterEntry, TimeoutConfig};
pub use context::ClientContext;
pub use error::{ClientError, Result};
pub use link::Link;
pub use machine::{ClientMachine, ClientService};
pub use responder::Responder;
pub use search::{SearchHit, SearchStore};
pub use share::{ShareIndex, SharedFile};
pub use transfer::{drive, DownloadMachine, TransferReport, UploadMachine};
