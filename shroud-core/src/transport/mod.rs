//! Framed message transport.
//!
//! A transport carries [`HttpRequest`] and [`HttpResponse`] frames over one
//! connection. Either side may send requests: a client sends requests to its
//! router, and a router sends relayed requests down a client's tunnel.
//!
//! # Design
//!
//! - Reads and writes are each serialized by their own lock, so frames on one
//!   connection never interleave
//! - [`Transport::exchange`] holds both locks for the whole round trip, so
//!   concurrent relays over a shared tunnel cannot steal each other's replies
//! - [`Transport::close`] wakes any task blocked in a read
//!
//! # Example
//!
//! ```ignore
//! let transport = StreamTransport::connect("127.0.0.1:8080").await?;
//! let response = transport.exchange(&request).await?;
//! ```

mod mock;
mod stream;

pub use mock::MockTransport;
pub use stream::{StreamTransport, DEFAULT_MAX_BODY};

use async_trait::async_trait;
use shroud_types::{HttpRequest, HttpResponse, WireError};
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Not connected.
    #[error("not connected")]
    NotConnected,

    /// Connection closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// Send failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Receive failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    /// Peer sent bytes that are not a valid frame.
    #[error("malformed frame: {0}")]
    Malformed(#[from] WireError),

    /// Declared body exceeds the configured limit.
    #[error("frame too large: {size} bytes (limit {limit})")]
    FrameTooLarge {
        /// Declared size.
        size: usize,
        /// Configured limit.
        limit: usize,
    },

    /// Connection timeout.
    #[error("connection timeout")]
    Timeout,
}

impl TransportError {
    /// True when the connection cannot be used any more.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            TransportError::ConnectionClosed
                | TransportError::NotConnected
                | TransportError::ConnectionFailed(_)
                | TransportError::SendFailed(_)
                | TransportError::ReceiveFailed(_)
        )
    }
}

/// Frame transport over one connection.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Write a request frame.
    async fn send_request(&self, request: &HttpRequest) -> Result<(), TransportError>;

    /// Read the next request frame.
    ///
    /// Blocks until a frame arrives or the connection closes.
    async fn recv_request(&self) -> Result<HttpRequest, TransportError>;

    /// Write a response frame.
    async fn send_response(&self, response: &HttpResponse) -> Result<(), TransportError>;

    /// Read the next response frame.
    async fn recv_response(&self) -> Result<HttpResponse, TransportError>;

    /// Send a request and wait for its response as one exclusive step.
    async fn exchange(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;

    /// Check if currently connected.
    fn is_connected(&self) -> bool;

    /// Close the connection, waking any blocked reader.
    async fn close(&self) -> Result<(), TransportError>;

    /// Remote address for logs.
    fn peer(&self) -> String;
}
