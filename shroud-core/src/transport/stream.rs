//! Transport over any byte stream (TCP in production, in-memory duplex in tests).

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use shroud_types::{Frame, HttpRequest, HttpResponse};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex, MutexGuard};

use super::{Transport, TransportError};

/// Default cap on a frame body (16 MiB).
pub const DEFAULT_MAX_BODY: usize = 16 * 1024 * 1024;

/// Cap on an unterminated header block.
const MAX_HEAD: usize = 64 * 1024;

const READ_CHUNK: usize = 8 * 1024;

type BoxReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

struct ReadState {
    reader: BoxReader,
    buffer: Vec<u8>,
}

/// Frame transport over a split byte stream.
pub struct StreamTransport {
    peer: String,
    reader: Mutex<ReadState>,
    writer: Mutex<Option<BoxWriter>>,
    connected: AtomicBool,
    closed: watch::Sender<bool>,
    max_body: usize,
}

impl StreamTransport {
    /// Open a TCP connection to `address` (`host:port`).
    pub async fn connect(address: &str) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(address)
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("{}: {}", address, e)))?;
        let _ = stream.set_nodelay(true);
        tracing::debug!(peer = %address, "connected");
        Ok(Self::from_stream(stream, address))
    }

    /// Wrap an established stream.
    pub fn from_stream<S>(stream: S, peer: impl Into<String>) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let (closed, _) = watch::channel(false);
        Self {
            peer: peer.into(),
            reader: Mutex::new(ReadState {
                reader: Box::new(reader),
                buffer: Vec::new(),
            }),
            writer: Mutex::new(Some(Box::new(writer))),
            connected: AtomicBool::new(true),
            closed,
            max_body: DEFAULT_MAX_BODY,
        }
    }

    /// Two transports joined back to back in memory.
    pub fn duplex_pair() -> (Self, Self) {
        let (a, b) = tokio::io::duplex(256 * 1024);
        (Self::from_stream(a, "duplex:a"), Self::from_stream(b, "duplex:b"))
    }

    /// Override the body size limit.
    pub fn with_max_body(mut self, max_body: usize) -> Self {
        self.max_body = max_body;
        self
    }

    async fn write_locked(
        &self,
        writer: &mut MutexGuard<'_, Option<BoxWriter>>,
        bytes: &[u8],
    ) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let writer = writer.as_mut().ok_or(TransportError::NotConnected)?;

        let result = async {
            writer.write_all(bytes).await?;
            writer.flush().await
        }
        .await;

        result.map_err(|e| {
            self.connected.store(false, Ordering::Release);
            TransportError::SendFailed(e.to_string())
        })
    }

    async fn read_locked<F: Frame>(
        &self,
        state: &mut MutexGuard<'_, ReadState>,
    ) -> Result<F, TransportError> {
        loop {
            if let Some((mut frame, head)) = F::parse_head(&state.buffer)? {
                if head.content_length > self.max_body {
                    return Err(TransportError::FrameTooLarge {
                        size: head.content_length,
                        limit: self.max_body,
                    });
                }

                let total = head.frame_len();
                while state.buffer.len() < total {
                    self.fill(state).await?;
                }
                let rest = state.buffer.split_off(total);
                let mut taken = std::mem::replace(&mut state.buffer, rest);
                frame.set_body(taken.split_off(head.body_offset));
                return Ok(frame);
            }

            if state.buffer.len() > MAX_HEAD {
                return Err(TransportError::FrameTooLarge {
                    size: state.buffer.len(),
                    limit: MAX_HEAD,
                });
            }
            self.fill(state).await?;
        }
    }

    async fn fill(&self, state: &mut ReadState) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::ConnectionClosed);
        }

        let closed = self.closed.subscribe();
        state.buffer.reserve(READ_CHUNK);
        let read = tokio::select! {
            read = state.reader.read_buf(&mut state.buffer) => read,
            _ = closed_signal(closed) => return Err(TransportError::ConnectionClosed),
        };

        match read {
            Ok(0) => {
                self.connected.store(false, Ordering::Release);
                Err(TransportError::ConnectionClosed)
            }
            Ok(_) => Ok(()),
            Err(e) => {
                self.connected.store(false, Ordering::Release);
                Err(TransportError::ReceiveFailed(e.to_string()))
            }
        }
    }
}

async fn closed_signal(mut closed: watch::Receiver<bool>) {
    let _ = closed.wait_for(|closed| *closed).await;
}

#[async_trait]
impl Transport for StreamTransport {
    async fn send_request(&self, request: &HttpRequest) -> Result<(), TransportError> {
        let mut writer = self.writer.lock().await;
        self.write_locked(&mut writer, &request.to_bytes()).await
    }

    async fn recv_request(&self) -> Result<HttpRequest, TransportError> {
        let mut reader = self.reader.lock().await;
        self.read_locked(&mut reader).await
    }

    async fn send_response(&self, response: &HttpResponse) -> Result<(), TransportError> {
        let mut writer = self.writer.lock().await;
        self.write_locked(&mut writer, &response.to_bytes()).await
    }

    async fn recv_response(&self) -> Result<HttpResponse, TransportError> {
        let mut reader = self.reader.lock().await;
        self.read_locked(&mut reader).await
    }

    async fn exchange(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut writer = self.writer.lock().await;
        let mut reader = self.reader.lock().await;
        self.write_locked(&mut writer, &request.to_bytes()).await?;
        self.read_locked(&mut reader).await
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.connected.store(false, Ordering::Release);
        self.closed.send_replace(true);

        let mut writer = self.writer.lock().await;
        if let Some(mut writer) = writer.take() {
            let _ = writer.shutdown().await;
        }
        tracing::debug!(peer = %self.peer, "closed");
        Ok(())
    }

    fn peer(&self) -> String {
        self.peer.clone()
    }
}

impl std::fmt::Debug for StreamTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamTransport")
            .field("peer", &self.peer)
            .field("connected", &self.is_connected())
            .field("max_body", &self.max_body)
            .finish()
    }
}
