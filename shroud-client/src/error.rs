//! Error types for shroud-client.

use shroud_core::{ChunkError, CodecError, CryptoError, TransportError};
use shroud_types::{StatusCode, WireError};
use thiserror::Error;

use crate::config::ConfigError;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Envelope could not be sealed or opened.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Crypto error.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Payload did not parse.
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// Configuration problem.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Chunk bookkeeping rejected an acknowledgement.
    #[error("chunk error: {0}")]
    Chunk(#[from] ChunkError),

    /// Local file I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The router answered with a non-Ok status.
    #[error("router answered {0}")]
    Status(StatusCode),

    /// Not connected to a router.
    #[error("not connected")]
    NotConnected,

    /// Reply was missing something the command needs.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl ClientError {
    /// Shorthand for a protocol error.
    pub fn protocol(reason: impl Into<String>) -> Self {
        ClientError::Protocol(reason.into())
    }

    /// True when the router asked us to retry later.
    pub fn is_busy(&self) -> bool {
        matches!(self, ClientError::Status(StatusCode::ServiceUnavailable))
    }
}

/// Result alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
