//! Mock transport for testing.
//!
//! Allows queueing inbound frames and capturing sent frames for verification.

use super::{Transport, TransportError};
use async_trait::async_trait;
use shroud_types::{HttpRequest, HttpResponse};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Mock transport for testing.
///
/// Clones share state, so a test can keep one handle while the code under
/// test owns another.
#[derive(Debug)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
}

#[derive(Debug)]
struct MockTransportInner {
    connected: bool,
    sent_requests: Vec<HttpRequest>,
    sent_responses: Vec<HttpResponse>,
    request_queue: VecDeque<HttpRequest>,
    response_queue: VecDeque<HttpResponse>,
    fail_next_send: Option<String>,
    fail_next_recv: Option<String>,
}

impl Default for MockTransportInner {
    fn default() -> Self {
        Self {
            connected: true,
            sent_requests: Vec::new(),
            sent_responses: Vec::new(),
            request_queue: VecDeque::new(),
            response_queue: VecDeque::new(),
            fail_next_send: None,
            fail_next_recv: None,
        }
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// Create a connected mock transport.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockTransportInner::default())),
        }
    }

    /// Queue a request to be returned by the next `recv_request()` call.
    pub fn queue_request(&self, request: HttpRequest) {
        self.inner.lock().unwrap().request_queue.push_back(request);
    }

    /// Queue a response to be returned by the next `recv_response()` call.
    pub fn queue_response(&self, response: HttpResponse) {
        self.inner.lock().unwrap().response_queue.push_back(response);
    }

    /// Get all requests that were sent.
    pub fn sent_requests(&self) -> Vec<HttpRequest> {
        self.inner.lock().unwrap().sent_requests.clone()
    }

    /// Get all responses that were sent.
    pub fn sent_responses(&self) -> Vec<HttpResponse> {
        self.inner.lock().unwrap().sent_responses.clone()
    }

    /// Get the last request that was sent.
    pub fn last_request(&self) -> Option<HttpRequest> {
        self.inner.lock().unwrap().sent_requests.last().cloned()
    }

    /// Get the last response that was sent.
    pub fn last_response(&self) -> Option<HttpResponse> {
        self.inner.lock().unwrap().sent_responses.last().cloned()
    }

    /// Cause the next send to fail with the given error.
    pub fn fail_next_send(&self, error: &str) {
        self.inner.lock().unwrap().fail_next_send = Some(error.to_string());
    }

    /// Cause the next receive to fail with the given error.
    pub fn fail_next_recv(&self, error: &str) {
        self.inner.lock().unwrap().fail_next_recv = Some(error.to_string());
    }

    /// Clear all state and reconnect.
    pub fn reset(&self) {
        *self.inner.lock().unwrap() = MockTransportInner::default();
    }

    fn check_send(inner: &mut MockTransportInner) -> Result<(), TransportError> {
        if !inner.connected {
            return Err(TransportError::NotConnected);
        }
        if let Some(error) = inner.fail_next_send.take() {
            return Err(TransportError::SendFailed(error));
        }
        Ok(())
    }

    fn check_recv(inner: &mut MockTransportInner) -> Result<(), TransportError> {
        if !inner.connected {
            return Err(TransportError::NotConnected);
        }
        if let Some(error) = inner.fail_next_recv.take() {
            return Err(TransportError::ReceiveFailed(error));
        }
        Ok(())
    }
}

impl Clone for MockTransport {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send_request(&self, request: &HttpRequest) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();
        Self::check_send(&mut inner)?;
        inner.sent_requests.push(request.clone());
        Ok(())
    }

    async fn recv_request(&self) -> Result<HttpRequest, TransportError> {
        let mut inner = self.inner.lock().unwrap();
        Self::check_recv(&mut inner)?;
        inner
            .request_queue
            .pop_front()
            .ok_or(TransportError::ConnectionClosed)
    }

    async fn send_response(&self, response: &HttpResponse) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();
        Self::check_send(&mut inner)?;
        inner.sent_responses.push(response.clone());
        Ok(())
    }

    async fn recv_response(&self) -> Result<HttpResponse, TransportError> {
        let mut inner = self.inner.lock().unwrap();
        Self::check_recv(&mut inner)?;
        inner
            .response_queue
            .pop_front()
            .ok_or(TransportError::ConnectionClosed)
    }

    async fn exchange(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        self.send_request(request).await?;
        self.recv_response().await
    }

    fn is_connected(&self) -> bool {
        self.inner.lock().unwrap().connected
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.inner.lock().unwrap().connected = false;
        Ok(())
    }

    fn peer(&self) -> String {
        "mock".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shroud_types::StatusCode;

    // ===========================================
    // MockTransport Basic Tests
    // ===========================================

    #[tokio::test]
    async fn mock_transport_records_sent_frames() {
        let transport = MockTransport::new();
        transport
            .send_request(&HttpRequest::new().with_body("one"))
            .await
            .unwrap();
        transport.send_response(&HttpResponse::ok()).await.unwrap();

        assert_eq!(transport.sent_requests().len(), 1);
        assert_eq!(transport.last_request().unwrap().body, b"one");
        assert_eq!(transport.last_response().unwrap().status, StatusCode::Ok);
    }

    #[tokio::test]
    async fn mock_transport_exchange_pairs_queue() {
        let transport = MockTransport::new();
        transport.queue_response(HttpResponse::new(StatusCode::NotFound));

        let response = transport.exchange(&HttpRequest::new()).await.unwrap();
        assert_eq!(response.status, StatusCode::NotFound);
        assert_eq!(transport.sent_requests().len(), 1);
    }

    #[tokio::test]
    async fn mock_transport_recv_empty_returns_closed() {
        let transport = MockTransport::new();
        let result = transport.recv_request().await;
        assert!(matches!(result, Err(TransportError::ConnectionClosed)));
    }

    // ===========================================
    // Error Condition Tests
    // ===========================================

    #[tokio::test]
    async fn send_after_close_fails() {
        let transport = MockTransport::new();
        transport.close().await.unwrap();
        let result = transport.send_request(&HttpRequest::new()).await;
        assert!(matches!(result, Err(TransportError::NotConnected)));
    }

    #[tokio::test]
    async fn forced_failures_apply_once() {
        let transport = MockTransport::new();
        transport.queue_request(HttpRequest::new());
        transport.fail_next_recv("timeout");
        transport.fail_next_send("buffer full");

        assert!(matches!(
            transport.recv_request().await,
            Err(TransportError::ReceiveFailed(_))
        ));
        assert!(transport.recv_request().await.is_ok());
        assert!(matches!(
            transport.send_response(&HttpResponse::ok()).await,
            Err(TransportError::SendFailed(_))
        ));
        assert!(transport.send_response(&HttpResponse::ok()).await.is_ok());
    }

    // ===========================================
    // Clone and Shared State Tests
    // ===========================================

    #[tokio::test]
    async fn mock_transport_clone_shares_state() {
        let a = MockTransport::new();
        let b = a.clone();
        a.send_request(&HttpRequest::new()).await.unwrap();
        b.send_request(&HttpRequest::new()).await.unwrap();
        assert_eq!(a.sent_requests().len(), 2);

        a.reset();
        assert!(b.sent_requests().is_empty());
        assert!(b.is_connected());
    }
}
