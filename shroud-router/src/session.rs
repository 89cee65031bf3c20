//! Per-connection request loop.
//!
//! Each accepted connection is served by one [`Connection`]: read a request,
//! answer it, repeat while the peer keeps the connection alive. A tunnel
//! request ends the loop without closing, leaving the connection to the
//! client's entity.

use std::sync::Arc;

use shroud_core::{codec, Session, Transport};
use shroud_types::{Action, HttpRequest, SessionId, StatusCode};
use tokio::sync::watch;

use crate::commands::{self, tunnel, Call, Outcome};
use crate::error::{ProtocolError, ProtocolResult};
use crate::server::Router;

/// A served connection.
pub struct Connection {
    router: Arc<Router>,
    transport: Arc<dyn Transport>,
}

enum Next {
    Continue,
    Close,
}

impl Connection {
    /// Wrap an accepted connection.
    pub fn new(router: Arc<Router>, transport: Arc<dyn Transport>) -> Self {
        Self { router, transport }
    }

    /// Serve requests until the peer leaves, the router stops, or the
    /// connection becomes a tunnel.
    pub async fn run(self) {
        let peer = self.transport.peer();
        self.router.count_connection();
        tracing::debug!(%peer, "connection opened");

        let stop = stopped(self.router.shutdown_signal());
        tokio::pin!(stop);

        loop {
            let request = tokio::select! {
                request = self.transport.recv_request() => request,
                _ = &mut stop => break,
            };
            let request = match request {
                Ok(request) => request,
                Err(e) if e.is_disconnect() => {
                    tracing::debug!(%peer, "connection closed: {}", e);
                    break;
                }
                Err(e) => {
                    tracing::warn!(%peer, error = %e, "unreadable request");
                    self.router.count_error();
                    let _ = self
                        .transport
                        .send_response(&codec::status(StatusCode::BadRequest))
                        .await;
                    break;
                }
            };

            let keep_alive = request.keep_alive();
            self.router.count_request();
            let (response, next) = match self.handle(request).await {
                Outcome::Reply(response) => (response, Next::Continue),
                Outcome::Close(response) => (response, Next::Close),
                Outcome::Handover { response, entity } => {
                    if let Err(e) = self.transport.send_response(&response).await {
                        tracing::debug!(%peer, "tunnel reply failed: {}", e);
                        break;
                    }
                    tunnel::attach(&entity, self.transport.clone());
                    return;
                }
            };

            if let Err(e) = self.transport.send_response(&response).await {
                tracing::debug!(%peer, "send failed: {}", e);
                break;
            }

            match next {
                Next::Continue if keep_alive => continue,
                Next::Continue | Next::Close => break,
            }
        }

        let _ = self.transport.close().await;
        tracing::debug!(%peer, "connection done");
    }

    async fn handle(&self, request: HttpRequest) -> Outcome {
        let result = match request.session() {
            None => commands::handshake::handle(&self.router, &request)
                .await
                .map(Outcome::Reply),
            Some(session) => self.handle_session(&session, &request).await,
        };

        result.unwrap_or_else(|e| {
            self.router.count_error();
            report(&e);
            Outcome::Reply(codec::status(e.status()))
        })
    }

    async fn handle_session(
        &self,
        id: &SessionId,
        request: &HttpRequest,
    ) -> ProtocolResult<Outcome> {
        let entity = self.router.session_entity(id)?;
        entity.update();
        let session = entity.require::<Session>()?;

        let envelope = codec::open(&request.body, &session.key)?;
        if envelope.action != Action::Request {
            return Err(ProtocolError::invalid("expected a request envelope"));
        }
        tracing::debug!(
            session = %id,
            kind = ?envelope.kind,
            id = envelope.id.as_deref().unwrap_or(""),
            "request"
        );

        commands::dispatch(Call {
            router: &self.router,
            transport: &self.transport,
            entity,
            session,
            envelope,
        })
        .await
    }
}

fn report(error: &ProtocolError) {
    let status = error.status();
    if status == StatusCode::InternalServerError {
        tracing::error!(%status, "request failed: {}", error);
    } else {
        tracing::warn!(%status, "request refused: {}", error);
    }
}

async fn stopped(mut signal: watch::Receiver<bool>) {
    let _ = signal.wait_for(|stop| *stop).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::{self, Peer};
    use shroud_core::{Key, MockTransport};
    use shroud_types::{Envelope, MessageKind};

    // ===== Session routing =====

    #[tokio::test]
    async fn unknown_session_is_unauthorized() {
        let router = testing::router();
        let envelope = Envelope::request(MessageKind::Ping);
        let request = codec::request(&SessionId::random(), &envelope, &Key::none()).unwrap();
        let response = testing::serve(&router, request).await;
        assert_eq!(response.status, StatusCode::Unauthorized);
    }

    #[tokio::test]
    async fn wrong_session_key_is_bad_request() {
        let router = testing::router();
        let session = testing::handshake(&router).await;
        let envelope = Envelope::request(MessageKind::Ping);
        let request =
            codec::request(&session.id, &envelope, &Key::random().unwrap()).unwrap();
        let response = testing::serve(&router, request).await;
        assert_eq!(response.status, StatusCode::BadRequest);
    }

    #[tokio::test]
    async fn response_envelope_is_rejected() {
        let router = testing::router();
        let session = testing::handshake(&router).await;
        let envelope = Envelope::response(MessageKind::Ping);
        let request = codec::request(&session.id, &envelope, &session.key).unwrap();
        let response = testing::serve(&router, request).await;
        assert_eq!(response.status, StatusCode::BadRequest);
    }

    #[tokio::test]
    async fn commands_before_join_are_unauthorized() {
        let router = testing::router();
        let session = testing::handshake(&router).await;
        let envelope = Envelope::request(MessageKind::Group);
        let request = codec::request(&session.id, &envelope, &session.key).unwrap();
        let response = testing::serve(&router, request).await;
        assert_eq!(response.status, StatusCode::Unauthorized);
    }

    // ===== Connection loop =====

    #[tokio::test]
    async fn keep_alive_serves_several_requests() {
        let router = testing::router();
        let peer = Peer::join(&router, "a", b"artifact-artifact-artifact").await;

        let mock = MockTransport::new();
        for _ in 0..3 {
            let envelope = Envelope::request(MessageKind::Ping);
            mock.queue_request(
                codec::request(&peer.session.id, &envelope, &peer.session.key).unwrap(),
            );
        }
        Connection::new(router.clone(), Arc::new(mock.clone())).run().await;

        let responses = mock.sent_responses();
        assert_eq!(responses.len(), 3);
        assert!(responses.iter().all(|r| r.status == StatusCode::Ok));
        assert!(!mock.is_connected());
    }

    #[tokio::test]
    async fn tunnel_request_keeps_connection_open() {
        let router = testing::router();
        let peer = Peer::join(&router, "a", b"artifact-artifact-artifact").await;

        let mock = MockTransport::new();
        let envelope = Envelope::request(MessageKind::Tunnel);
        mock.queue_request(codec::request(&peer.session.id, &envelope, &peer.session.key).unwrap());
        Connection::new(router.clone(), Arc::new(mock.clone())).run().await;

        assert_eq!(mock.last_response().unwrap().status, StatusCode::Ok);
        assert!(mock.is_connected());
        assert!(router.reachable(&peer.id).is_ok());
    }

    #[tokio::test]
    async fn stops_on_router_shutdown() {
        let router = testing::router();
        let (server, _client) = shroud_core::StreamTransport::duplex_pair();
        let connection = Connection::new(router.clone(), Arc::new(server));
        let task = tokio::spawn(connection.run());

        router.signal_shutdown();
        tokio::time::timeout(std::time::Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
    }
}
