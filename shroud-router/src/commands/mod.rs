//! Response side of every command.
//!
//! A request arriving with a session cookie is opened with that session's key
//! and dispatched here by message kind. Relay commands (search, browse,
//! download, upload) forward the opaque group payload down another member's
//! tunnel and stitch the reply back to the caller.

pub mod browse;
pub mod download;
pub mod group;
pub mod handshake;
pub mod join;
pub mod ping;
pub mod quit;
pub mod search;
pub mod tunnel;
pub mod upload;

use std::sync::Arc;

use shroud_core::{codec, ChunkAllocator, Entity, IdleComponent, Session, Transport};
use shroud_types::{ClientId, EntityId, Envelope, HttpResponse, MessageKind, TransferId};

use crate::components::{ClientComponent, TransferComponent, TransferKind};
use crate::error::{ProtocolError, ProtocolResult};
use crate::server::Router;

/// What the connection loop does after a command.
pub enum Outcome {
    /// Send the response and keep serving the connection.
    Reply(HttpResponse),
    /// Send the response, then hand the connection to `entity` as its tunnel.
    Handover {
        /// Response to the tunnel request.
        response: HttpResponse,
        /// Client that owns the tunnel.
        entity: Arc<Entity>,
    },
    /// Send the response and close the connection.
    Close(HttpResponse),
}

/// One decoded request on an established session.
pub struct Call<'a> {
    /// Router state.
    pub router: &'a Arc<Router>,
    /// Connection the request arrived on.
    pub transport: &'a Arc<dyn Transport>,
    /// Entity owning the session.
    pub entity: Arc<Entity>,
    /// Session the request was sealed with.
    pub session: Arc<Session>,
    /// Opened envelope.
    pub envelope: Envelope,
}

impl Call<'_> {
    /// Seal `envelope` as an Ok response under the caller's session key.
    pub fn reply(&self, envelope: Envelope) -> ProtocolResult<Outcome> {
        Ok(Outcome::Reply(codec::response(&envelope, &self.session.key)?))
    }

    /// Identity of the caller, which must have joined.
    pub fn client(&self) -> ProtocolResult<Arc<ClientComponent>> {
        self.entity
            .get::<ClientComponent>()
            .ok_or(ProtocolError::NotJoined)
    }
}

/// Run the command named by the envelope.
pub async fn dispatch(call: Call<'_>) -> ProtocolResult<Outcome> {
    match call.envelope.kind {
        MessageKind::Handshake => Err(ProtocolError::invalid(
            "handshake on an established session",
        )),
        MessageKind::Join => join::handle(&call).await,
        MessageKind::Tunnel => tunnel::handle(&call).await,
        MessageKind::Ping => ping::handle(&call).await,
        MessageKind::Group => group::handle(&call).await,
        MessageKind::Search => search::handle(&call).await,
        MessageKind::Browse => browse::handle(&call).await,
        MessageKind::Download => download::handle(&call).await,
        MessageKind::Upload => upload::handle(&call).await,
        MessageKind::Quit => quit::handle(&call).await,
    }
}

/// A member of the caller's group that can be reached through its tunnel.
pub(crate) fn target(
    router: &Router,
    caller: &ClientComponent,
    id: &ClientId,
) -> ProtocolResult<Arc<Entity>> {
    let entity = router.reachable(id)?;
    let same_group = entity
        .get::<ClientComponent>()
        .is_some_and(|c| c.group == caller.group && c.id != caller.id);
    if !same_group {
        return Err(ProtocolError::ClientNotFound(id.to_string()));
    }
    Ok(entity)
}

/// Refuse a new transfer when the router-wide limit is reached.
pub(crate) fn ensure_capacity(router: &Router) -> ProtocolResult<()> {
    let active = router.transfers().len();
    if active >= router.config().transfer.max_transfers {
        tracing::warn!(active, "transfer capacity exhausted");
        return Err(ProtocolError::Capacity(active));
    }
    Ok(())
}

/// Allocator sized by router configuration.
pub(crate) fn allocator(router: &Router, size: u64) -> ChunkAllocator {
    let transfer = &router.config().transfer;
    ChunkAllocator::new(size, transfer.chunk_size, transfer.max_chunks)
}

/// Index a new transfer entity with idle expiry.
pub(crate) fn open_transfer(
    router: &Router,
    transfer: TransferComponent,
) -> (Arc<Entity>, Arc<TransferComponent>) {
    let entity = Entity::with_id(EntityId::new(transfer.id.as_str()));
    entity.add(IdleComponent::new(router.config().timeouts.transfer_idle()));
    let transfer = entity.add(transfer);
    router.transfers().add(transfer.id.clone(), entity.clone());
    router.count_transfer();
    tracing::info!(
        transfer = %transfer.id,
        kind = ?transfer.kind,
        requester = %transfer.requester,
        owner = %transfer.owner,
        size = transfer.size(),
        "transfer opened"
    );
    (entity, transfer)
}

/// Look up a live transfer the caller started.
pub(crate) fn find_transfer(
    router: &Router,
    id: &str,
    caller: &ClientId,
    kind: TransferKind,
) -> ProtocolResult<(Arc<Entity>, Arc<TransferComponent>)> {
    let entity = router
        .transfers()
        .get(&TransferId::new(id))
        .filter(|e| !e.is_shutdown())
        .ok_or_else(|| ProtocolError::TransferNotFound(id.to_string()))?;
    let transfer = entity.require::<TransferComponent>()?;
    if &transfer.requester != caller || transfer.kind != kind {
        return Err(ProtocolError::TransferNotFound(id.to_string()));
    }
    Ok((entity, transfer))
}

#[cfg(test)]
pub(crate) mod testing {
    //! Drive commands without a socket.

    use super::*;
    use crate::config::Config;
    use crate::session::Connection;
    use shroud_core::{Group, Key, MockTransport};
    use shroud_types::messages::{self, HandshakeKey, JoinRequest, HANDSHAKE_GREETING};
    use shroud_types::{GroupId, HttpRequest, SessionId, StatusCode};

    /// A client talking to a router through a mock connection.
    pub struct Peer {
        pub router: Arc<Router>,
        pub session: Session,
        pub group: Group,
        pub id: ClientId,
    }

    pub fn router() -> Arc<Router> {
        router_with(Config::default())
    }

    pub fn router_with(config: Config) -> Arc<Router> {
        Router::new(config)
    }

    pub async fn serve(router: &Arc<Router>, request: HttpRequest) -> HttpResponse {
        let mock = MockTransport::new();
        mock.queue_request(request);
        let transport: Arc<dyn Transport> = Arc::new(mock.clone());
        Connection::new(router.clone(), transport).run().await;
        mock.last_response().unwrap()
    }

    pub async fn handshake(router: &Arc<Router>) -> Session {
        let hello = Envelope::request(MessageKind::Handshake).with_data(HANDSHAKE_GREETING);
        let request = codec::request(&SessionId::default(), &hello, router.passphrase()).unwrap();
        let response = serve(router, request).await;
        assert_eq!(response.status, StatusCode::Ok);

        let id = response.session().unwrap();
        let reply = codec::open_response(&response, router.passphrase())
            .unwrap()
            .unwrap();
        let key: HandshakeKey = messages::decode(reply.data.as_deref().unwrap()).unwrap();
        Session::new(id, Key::from_hex(&key.key).unwrap())
    }

    impl Peer {
        pub async fn join(router: &Arc<Router>, name: &str, artifact: &[u8]) -> Self {
            let session = handshake(router).await;
            let group = Group::from_artifact(artifact);
            let peer = Self {
                router: router.clone(),
                session,
                group,
                id: ClientId::random(),
            };
            let join = JoinRequest {
                client: peer.id.clone(),
                name: name.to_string(),
                group: peer.group.id.clone(),
            };
            let envelope = Envelope::request(MessageKind::Join)
                .with_data(messages::encode(&join).unwrap());
            let (status, _) = peer.call(envelope).await;
            assert_eq!(status, StatusCode::Ok);
            peer
        }

        pub async fn call(&self, envelope: Envelope) -> (StatusCode, Option<Envelope>) {
            let request = codec::request(&self.session.id, &envelope, &self.session.key).unwrap();
            let response = serve(&self.router, request).await;
            let reply = codec::open_response(&response, &self.session.key).unwrap();
            (response.status, reply)
        }

        pub fn group_id(&self) -> GroupId {
            self.group.id.clone()
        }
    }
}
