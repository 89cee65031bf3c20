//! Handshake: issue a session id and session key.
//!
//! The request carries no session cookie. Its body is sealed with the router
//! passphrase key (plain text when no passphrase is configured) and must
//! carry the greeting token.

use std::sync::Arc;

use shroud_core::{codec, Entity, IdleComponent, Session};
use shroud_types::messages::{self, HandshakeKey, HANDSHAKE_GREETING};
use shroud_types::{Action, EntityId, Envelope, HttpRequest, HttpResponse, MessageKind};

use crate::error::{ProtocolError, ProtocolResult};
use crate::server::Router;

/// Create a session entity and answer with its cookie and key.
pub async fn handle(router: &Arc<Router>, request: &HttpRequest) -> ProtocolResult<HttpResponse> {
    let envelope = codec::open(&request.body, router.passphrase())?;
    if envelope.kind != MessageKind::Handshake || envelope.action != Action::Request {
        return Err(ProtocolError::UnknownSession);
    }

    let greeting = envelope.data.as_deref().unwrap_or_default();
    if greeting != HANDSHAKE_GREETING {
        return Err(ProtocolError::BadGreeting(greeting.to_string()));
    }

    let session = Session::generate()?;
    let entity = Entity::with_id(EntityId::new(session.id.as_str()));
    entity.add(IdleComponent::new(router.config().timeouts.client_idle()));
    let session = entity.add(session);
    router.sessions().add(session.id.clone(), entity);
    router.count_handshake();
    tracing::info!(session = %session.id, "handshake");

    let key = HandshakeKey {
        key: session.key.to_hex(),
    };
    let reply = Envelope::response(MessageKind::Handshake).with_data(messages::encode(&key)?);
    let body = codec::seal(&reply, router.passphrase())?;
    Ok(HttpResponse::with_session(&session.id).with_body(body))
}
