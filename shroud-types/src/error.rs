//! Error types for the shroud wire format.

use thiserror::Error;

/// Errors raised while framing or decoding wire data.
#[derive(Debug, Error)]
pub enum WireError {
    /// The header block is malformed.
    #[error("malformed header block: {0}")]
    Parse(#[from] httparse::Error),

    /// The request line names a method we do not speak.
    #[error("unsupported method: {0}")]
    UnsupportedMethod(String),

    /// Only HTTP/1.1 framing is accepted.
    #[error("unsupported version: HTTP/1.{0}")]
    UnsupportedVersion(u8),

    /// The status line carries a code we do not map.
    #[error("unknown status code: {0}")]
    UnknownStatus(u16),

    /// A header value is not valid UTF-8 or is otherwise unusable.
    #[error("invalid header: {0}")]
    InvalidHeader(String),

    /// `Content-Length` is not a number.
    #[error("invalid content length: {0}")]
    InvalidContentLength(String),

    /// A complete frame was expected but the buffer ended early.
    #[error("incomplete frame")]
    Incomplete,

    /// A required envelope or payload field is absent.
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// JSON encoding or decoding failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Base64 decoding failed.
    #[error("base64 error: {0}")]
    Base64(#[from] base64::DecodeError),
}
