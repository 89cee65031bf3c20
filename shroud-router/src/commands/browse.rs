//! Browse: list a member's shared folder through its tunnel.

use shroud_types::{Envelope, MessageKind};

use super::{target, Call, Outcome};
use crate::error::{ProtocolError, ProtocolResult};

/// Relay the opaque browse request to the target and return its listing.
pub async fn handle(call: &Call<'_>) -> ProtocolResult<Outcome> {
    let client = call.client()?;
    let target_id = call
        .envelope
        .client
        .clone()
        .ok_or_else(|| ProtocolError::invalid("browse needs a target client"))?;
    let data = call.envelope.require_data()?;
    let owner = target(call.router, &client, &target_id)?;

    let request = Envelope::request(MessageKind::Browse)
        .with_client(client.id.clone())
        .with_data(data);
    let (status, reply) = call.router.relay(&owner, &request).await?;
    if !status.is_ok() {
        return Err(ProtocolError::Peer(status));
    }
    let listing = reply
        .and_then(|r| r.data)
        .ok_or_else(|| ProtocolError::Internal("peer sent an empty listing".to_string()))?;

    call.reply(
        Envelope::response(MessageKind::Browse)
            .with_client(target_id)
            .with_data(listing),
    )
}

#[cfg(test)]
mod tests {
    use crate::commands::testing::{self, Peer};
    use shroud_core::{codec, MockTransport};
    use shroud_types::{Envelope, HttpResponse, MessageKind, StatusCode};
    use std::sync::Arc;

    const ARTIFACT: &[u8] = b"holiday photo bytes, shared by all";

    #[tokio::test]
    async fn browse_relays_listing_back() {
        let router = testing::router();
        let alice = Peer::join(&router, "alice", ARTIFACT).await;
        let bob = Peer::join(&router, "bob", ARTIFACT).await;

        let bob_tunnel = MockTransport::new();
        let entity = router.session_entity(&bob.session.id).unwrap();
        crate::commands::tunnel::attach(&entity, Arc::new(bob_tunnel.clone()));
        let listing = Envelope::response(MessageKind::Browse).with_data("bob-listing");
        bob_tunnel.queue_response(codec::response(&listing, &bob.session.key).unwrap());

        let (status, reply) = alice
            .call(
                Envelope::request(MessageKind::Browse)
                    .with_client(bob.id.clone())
                    .with_data("opaque-folder"),
            )
            .await;
        assert_eq!(status, StatusCode::Ok);
        let reply = reply.unwrap();
        assert_eq!(reply.client.as_ref(), Some(&bob.id));
        assert_eq!(reply.data.as_deref(), Some("bob-listing"));

        let asked = codec::open(&bob_tunnel.last_request().unwrap().body, &bob.session.key).unwrap();
        assert_eq!(asked.client.as_ref(), Some(&alice.id));
        assert_eq!(asked.data.as_deref(), Some("opaque-folder"));
    }

    #[tokio::test]
    async fn peer_status_propagates() {
        let router = testing::router();
        let alice = Peer::join(&router, "alice", ARTIFACT).await;
        let bob = Peer::join(&router, "bob", ARTIFACT).await;

        let bob_tunnel = MockTransport::new();
        let entity = router.session_entity(&bob.session.id).unwrap();
        crate::commands::tunnel::attach(&entity, Arc::new(bob_tunnel.clone()));
        bob_tunnel.queue_response(HttpResponse::new(StatusCode::NotFound));

        let (status, _) = alice
            .call(
                Envelope::request(MessageKind::Browse)
                    .with_client(bob.id.clone())
                    .with_data("opaque-folder"),
            )
            .await;
        assert_eq!(status, StatusCode::NotFound);
    }

    #[tokio::test]
    async fn unreachable_or_foreign_target_is_not_found() {
        let router = testing::router();
        let alice = Peer::join(&router, "alice", ARTIFACT).await;
        let bob = Peer::join(&router, "bob", ARTIFACT).await;
        let mallory = Peer::join(&router, "mallory", b"a different artifact entirely!!").await;

        let entity = router.session_entity(&mallory.session.id).unwrap();
        crate::commands::tunnel::attach(&entity, Arc::new(MockTransport::new()));

        for target in [bob.id.clone(), mallory.id.clone()] {
            let (status, _) = alice
                .call(
                    Envelope::request(MessageKind::Browse)
                        .with_client(target)
                        .with_data("opaque-folder"),
                )
                .await;
            assert_eq!(status, StatusCode::NotFound);
        }
    }
}
