//! # shroud-router
//!
//! Relay router for the shroud network.
//!
//! A router never stores files and never sees group traffic in the clear.
//! It:
//! - Hands out sessions (id cookie plus a random AES key) on handshake
//! - Indexes joined clients by id and by group
//! - Keeps one tunnel connection per client for relayed requests
//! - Relays search, browse, download and upload between group members
//! - Expires idle sessions and transfers
//!
//! ## Architecture
//!
//! ```text
//! Client A ──request──►┌──────────────┐──tunnel──► Client B
//!          ◄─response──│ shroud-router│◄─response─
//!                      └──────────────┘
//! ```
//!
//! The requester only ever talks to the router, so the owner of a file
//! never learns the requester's address and vice versa.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod commands;
pub mod components;
pub mod config;
pub mod error;
pub mod machine;
pub mod server;
pub mod session;

pub use config::Config;
pub use error::{ProtocolError, RouterError};
pub use machine::{RouterMachine, RouterService};
pub use server::{Router, RouterMetrics};
