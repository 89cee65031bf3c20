//! Error types for shroud-router.

use shroud_core::{ChunkError, CodecError, CryptoError, EntityError, TransportError};
use shroud_types::{StatusCode, WireError};

/// Main error type for shroud-router operations.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Faults in handling one request. Each maps to a response status.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Invalid envelope or payload.
    #[error("invalid message: {reason}")]
    InvalidMessage {
        /// Reason the message is invalid.
        reason: String,
    },

    /// Envelope could not be decoded.
    #[error("undecodable envelope: {0}")]
    Codec(#[from] CodecError),

    /// Handshake greeting did not match.
    #[error("bad greeting: {0:?}")]
    BadGreeting(String),

    /// Session cookie names no live session.
    #[error("unknown session")]
    UnknownSession,

    /// Session exists but the client has not joined.
    #[error("session has not joined")]
    NotJoined,

    /// Target client is unknown or has no tunnel.
    #[error("client not found: {0}")]
    ClientNotFound(String),

    /// Transfer id is unknown or expired.
    #[error("transfer not found: {0}")]
    TransferNotFound(String),

    /// No search results to fall back on.
    #[error("no search results to choose a target from")]
    NoTarget,

    /// Chunk does not fit the transfer.
    #[error("chunk rejected: {0}")]
    Chunk(#[from] ChunkError),

    /// Router-wide transfer limit reached.
    #[error("transfer capacity exhausted ({0} active)")]
    Capacity(usize),

    /// Relayed peer answered with an error status.
    #[error("peer answered {0}")]
    Peer(StatusCode),

    /// Entity is missing an expected component.
    #[error("entity error: {0}")]
    Entity(#[from] EntityError),

    /// Internal failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ProtocolError {
    /// Status code reported to the peer.
    pub fn status(&self) -> StatusCode {
        match self {
            ProtocolError::InvalidMessage { .. }
            | ProtocolError::Codec(_)
            | ProtocolError::BadGreeting(_)
            | ProtocolError::Chunk(_) => StatusCode::BadRequest,
            ProtocolError::UnknownSession | ProtocolError::NotJoined => StatusCode::Unauthorized,
            ProtocolError::ClientNotFound(_)
            | ProtocolError::TransferNotFound(_)
            | ProtocolError::NoTarget => StatusCode::NotFound,
            ProtocolError::Capacity(_) => StatusCode::ServiceUnavailable,
            ProtocolError::Peer(status) => *status,
            ProtocolError::Entity(_) | ProtocolError::Internal(_) => {
                StatusCode::InternalServerError
            }
        }
    }

    /// Shorthand for [`ProtocolError::InvalidMessage`].
    pub fn invalid(reason: impl Into<String>) -> Self {
        ProtocolError::InvalidMessage {
            reason: reason.into(),
        }
    }
}

impl From<WireError> for ProtocolError {
    fn from(e: WireError) -> Self {
        ProtocolError::Codec(CodecError::Wire(e))
    }
}

impl From<CryptoError> for ProtocolError {
    fn from(e: CryptoError) -> Self {
        ProtocolError::Internal(e.to_string())
    }
}

/// Result type alias for router operations.
pub type Result<T> = std::result::Result<T, RouterError>;

/// Result type alias for protocol operations.
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(ProtocolError::invalid("x").status(), StatusCode::BadRequest);
        assert_eq!(
            ProtocolError::from(ChunkError::Overlap(0)).status(),
            StatusCode::BadRequest
        );
        assert_eq!(ProtocolError::UnknownSession.status(), StatusCode::Unauthorized);
        assert_eq!(
            ProtocolError::TransferNotFound("t".into()).status(),
            StatusCode::NotFound
        );
        assert_eq!(
            ProtocolError::Capacity(64).status(),
            StatusCode::ServiceUnavailable
        );
        assert_eq!(
            ProtocolError::Internal("boom".into()).status(),
            StatusCode::InternalServerError
        );
        assert_eq!(
            ProtocolError::Peer(StatusCode::NotFound).status(),
            StatusCode::NotFound
        );
    }

    #[test]
    fn wire_errors_are_bad_requests() {
        let error: ProtocolError = WireError::MissingField("data").into();
        assert_eq!(error.status(), StatusCode::BadRequest);
    }
}
