//! One connection to a router and the session it runs under.
//!
//! The first connection performs the handshake; the tunnel connection reuses
//! the same session on a second socket.

use std::sync::Arc;

use shroud_core::{codec, Key, Session, Transport};
use shroud_types::messages::{self, HandshakeKey, HANDSHAKE_GREETING};
use shroud_types::{Envelope, MessageKind, SessionId};

use crate::error::{ClientError, Result};

/// A router connection with an established session.
#[derive(Clone)]
pub struct Link {
    transport: Arc<dyn Transport>,
    session: Session,
}

impl Link {
    /// Greet the router and take the session it issues.
    ///
    /// `passphrase` seals the handshake bodies; use [`Key::none`] for a router
    /// without a passphrase.
    pub async fn handshake(transport: Arc<dyn Transport>, passphrase: &Key) -> Result<Self> {
        let hello = Envelope::request(MessageKind::Handshake).with_data(HANDSHAKE_GREETING);
        let request = codec::request(&SessionId::default(), &hello, passphrase)?;
        let response = transport.exchange(&request).await?;
        if !response.status.is_ok() {
            return Err(ClientError::Status(response.status));
        }

        let id = response
            .session()
            .ok_or_else(|| ClientError::protocol("handshake reply has no session cookie"))?;
        let reply = codec::open_response(&response, passphrase)?
            .ok_or_else(|| ClientError::protocol("handshake reply has no key"))?;
        let key: HandshakeKey = messages::decode(reply.require_data()?)?;
        let session = Session::new(id, Key::from_hex(&key.key)?);

        tracing::debug!(session = %session.id, peer = %transport.peer(), "handshake complete");
        Ok(Self { transport, session })
    }

    /// Reuse an established session on another connection.
    pub fn attach(transport: Arc<dyn Transport>, session: Session) -> Self {
        Self { transport, session }
    }

    /// Session of this link.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Underlying connection.
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Send a request and return the reply envelope, if the reply has a body.
    ///
    /// A non-Ok status becomes [`ClientError::Status`].
    pub async fn call(&self, envelope: &Envelope) -> Result<Option<Envelope>> {
        let request = codec::request(&self.session.id, envelope, &self.session.key)?;
        let response = self.transport.exchange(&request).await?;
        tracing::debug!(
            kind = ?envelope.kind,
            id = envelope.id.as_deref().unwrap_or(""),
            status = %response.status,
            "call"
        );
        if !response.status.is_ok() {
            return Err(ClientError::Status(response.status));
        }
        Ok(codec::open_response(&response, &self.session.key)?)
    }

    /// Like [`Link::call`], but an empty reply is an error.
    pub async fn call_for(&self, envelope: &Envelope) -> Result<Envelope> {
        self.call(envelope).await?.ok_or_else(|| {
            ClientError::protocol(format!("{:?} reply has no body", envelope.kind))
        })
    }

    /// True while the connection is up.
    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Close the connection.
    pub async fn close(&self) {
        let _ = self.transport.close().await;
    }
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("peer", &self.transport.peer())
            .field("session", &self.session.id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shroud_core::MockTransport;
    use shroud_types::{HttpResponse, StatusCode};

    fn handshake_reply(id: &SessionId, key: &Key, passphrase: &Key) -> HttpResponse {
        let data = messages::encode(&HandshakeKey { key: key.to_hex() }).unwrap();
        let envelope = Envelope::response(MessageKind::Handshake).with_data(data);
        HttpResponse::with_session(id).with_body(codec::seal(&envelope, passphrase).unwrap())
    }

    #[tokio::test]
    async fn handshake_takes_cookie_and_key() {
        let mock = MockTransport::new();
        let id = SessionId::random();
        let key = Key::random().unwrap();
        let passphrase = Key::from_passphrase("open sesame");
        mock.queue_response(handshake_reply(&id, &key, &passphrase));

        let link = Link::handshake(Arc::new(mock.clone()), &passphrase).await.unwrap();
        assert_eq!(link.session().id, id);
        assert_eq!(link.session().key.to_hex(), key.to_hex());

        let sent = mock.last_request().unwrap();
        assert!(sent.session().is_none());
        let hello = codec::open(&sent.body, &passphrase).unwrap();
        assert_eq!(hello.data.as_deref(), Some(HANDSHAKE_GREETING));
    }

    #[tokio::test]
    async fn handshake_refusal_is_a_status() {
        let mock = MockTransport::new();
        mock.queue_response(HttpResponse::new(StatusCode::BadRequest));
        let err = Link::handshake(Arc::new(mock), &Key::none()).await.unwrap_err();
        assert!(matches!(err, ClientError::Status(StatusCode::BadRequest)));
    }

    #[tokio::test]
    async fn call_seals_with_session_and_maps_status() {
        let mock = MockTransport::new();
        let session = Session::generate().unwrap();
        let link = Link::attach(Arc::new(mock.clone()), session.clone());

        let pong = Envelope::response(MessageKind::Ping);
        mock.queue_response(codec::response(&pong, &session.key).unwrap());
        let reply = link.call(&Envelope::request(MessageKind::Ping)).await.unwrap();
        assert_eq!(reply.unwrap().kind, MessageKind::Ping);

        let sent = mock.last_request().unwrap();
        assert_eq!(sent.session(), Some(session.id.clone()));

        mock.queue_response(HttpResponse::new(StatusCode::ServiceUnavailable));
        let err = link.call(&Envelope::request(MessageKind::Ping)).await.unwrap_err();
        assert!(err.is_busy());

        mock.queue_response(HttpResponse::ok());
        assert!(link.call_for(&Envelope::request(MessageKind::Ping)).await.is_err());
    }
}
