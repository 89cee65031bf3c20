//! # shroud-types
//!
//! Wire format types for the shroud relay protocol.
//!
//! This crate provides the vocabulary shared by every shroud crate:
//! - [`SessionId`], [`ClientId`], [`GroupId`], [`TransferId`], [`SearchId`] - identity types
//! - [`HttpRequest`], [`HttpResponse`], [`StatusCode`] - the HTTP-like frame
//! - [`Envelope`] - the routing envelope a relaying hop can read
//! - [`messages`] - typed application payloads carried inside the envelope
//! - [`WireError`] - error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod envelope;
mod error;
mod http;
mod ids;
pub mod messages;

pub use envelope::{Action, Chunk, Envelope, MessageKind};
pub use error::WireError;
pub use http::{
    Frame, FrameHead, HttpRequest, HttpResponse, Method, StatusCode, HTTP_VERSION, MAX_HEADERS,
    SESSION_COOKIE,
};
pub use ids::{ClientId, EntityId, GroupId, SearchId, SessionId, TransferId};
