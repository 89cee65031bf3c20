//! Search: fan a keyword search out to the caller's group.
//!
//! The caller gets a search id straight away. Each other member is asked
//! through its tunnel on a worker from the router pool; members with matches
//! have their results forwarded down the caller's tunnel tagged with the
//! search id and the answering client, in whatever order they arrive.

use std::sync::Arc;

use shroud_core::Entity;
use shroud_types::{ClientId, Envelope, MessageKind, SearchId};

use super::{Call, Outcome};
use crate::components::{ClientComponent, SearchList, TunnelComponent};
use crate::error::ProtocolResult;
use crate::server::Router;

/// Start a fan-out and return its id.
pub async fn handle(call: &Call<'_>) -> ProtocolResult<Outcome> {
    let client = call.client()?;
    let data = call.envelope.require_data()?.to_string();
    let search = SearchId::random();

    let list = match call.entity.get::<SearchList>() {
        Some(list) => list,
        None => call.entity.add(SearchList::default()),
    };
    list.reset(search.clone());

    let members = call.router.members(&client.group, &client.id);
    tracing::info!(
        client = %client.id,
        search = %search,
        members = members.len(),
        "search"
    );

    for member in members {
        tokio::spawn(ask(
            call.router.clone(),
            call.entity.clone(),
            client.id.clone(),
            member,
            search.clone(),
            data.clone(),
        ));
    }

    call.reply(Envelope::response(MessageKind::Search).with_id(search.as_str()))
}

async fn ask(
    router: Arc<Router>,
    requester: Arc<Entity>,
    from: ClientId,
    member: Arc<Entity>,
    search: SearchId,
    data: String,
) {
    let Ok(_permit) = router.workers().acquire().await else {
        return;
    };
    let Some(member_id) = member.get::<ClientComponent>().map(|c| c.id.clone()) else {
        return;
    };

    let request = Envelope::request(MessageKind::Search)
        .with_id(search.as_str())
        .with_client(from)
        .with_data(data);
    let results = match router.relay(&member, &request).await {
        Ok((status, Some(reply))) if status.is_ok() => reply.data,
        Ok((status, _)) => {
            tracing::debug!(search = %search, member = %member_id, %status, "no results");
            None
        }
        Err(e) => {
            tracing::debug!(search = %search, member = %member_id, "search relay failed: {}", e);
            None
        }
    };
    let Some(results) = results else {
        return;
    };

    if let Some(list) = requester.get::<SearchList>() {
        list.record(&search, member_id.clone());
    }
    if requester.is_shutdown() || !requester.has::<TunnelComponent>() {
        tracing::debug!(search = %search, "requester has no tunnel, results dropped");
        return;
    }

    let forward = Envelope::response(MessageKind::Search)
        .with_id(search.as_str())
        .with_client(member_id.clone())
        .with_data(results);
    match router.relay(&requester, &forward).await {
        Ok((status, _)) if status.is_ok() => {
            tracing::debug!(search = %search, member = %member_id, "results delivered");
        }
        Ok((status, _)) => {
            tracing::debug!(search = %search, %status, "requester refused results");
        }
        Err(e) => tracing::debug!(search = %search, "results undeliverable: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::{self, Peer};
    use shroud_core::{codec, MockTransport, Session};
    use shroud_types::{Action, StatusCode};
    use std::time::Duration;

    const ARTIFACT: &[u8] = b"holiday photo bytes, shared by all";

    fn tunnel(router: &Arc<Router>, peer: &Peer) -> MockTransport {
        let mock = MockTransport::new();
        let entity = router.session_entity(&peer.session.id).unwrap();
        crate::commands::tunnel::attach(&entity, Arc::new(mock.clone()));
        mock
    }

    fn answer(mock: &MockTransport, peer: &Peer, data: Option<&str>) {
        let mut reply = Envelope::response(MessageKind::Search);
        if let Some(data) = data {
            reply = reply.with_data(data);
        }
        mock.queue_response(codec::response(&reply, &peer.session.key).unwrap());
    }

    fn open(mock_request: &shroud_types::HttpRequest, session: &Session) -> Envelope {
        codec::open(&mock_request.body, &session.key).unwrap()
    }

    #[tokio::test]
    async fn search_fans_out_and_forwards_results() {
        let router = testing::router();
        let alice = Peer::join(&router, "alice", ARTIFACT).await;
        let bob = Peer::join(&router, "bob", ARTIFACT).await;
        let carol = Peer::join(&router, "carol", ARTIFACT).await;

        let alice_tunnel = tunnel(&router, &alice);
        let bob_tunnel = tunnel(&router, &bob);
        let carol_tunnel = tunnel(&router, &carol);
        answer(&bob_tunnel, &bob, Some("bob-results"));
        answer(&carol_tunnel, &carol, None);
        answer(&alice_tunnel, &alice, None);

        let (status, reply) = alice
            .call(Envelope::request(MessageKind::Search).with_data("opaque-query"))
            .await;
        assert_eq!(status, StatusCode::Ok);
        let search = reply.unwrap().id.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;

        let asked = open(&bob_tunnel.last_request().unwrap(), &bob.session);
        assert_eq!(asked.id.as_deref(), Some(search.as_str()));
        assert_eq!(asked.client.as_ref(), Some(&alice.id));
        assert_eq!(asked.data.as_deref(), Some("opaque-query"));
        assert_eq!(carol_tunnel.sent_requests().len(), 1);

        let delivered = alice_tunnel.sent_requests();
        assert_eq!(delivered.len(), 1);
        let forwarded = open(&delivered[0], &alice.session);
        assert_eq!(forwarded.action, Action::Response);
        assert_eq!(forwarded.id.as_deref(), Some(search.as_str()));
        assert_eq!(forwarded.client.as_ref(), Some(&bob.id));
        assert_eq!(forwarded.data.as_deref(), Some("bob-results"));

        let entity = router.session_entity(&alice.session.id).unwrap();
        assert_eq!(entity.get::<SearchList>().unwrap().clients(), vec![bob.id.clone()]);
    }

    #[tokio::test]
    async fn search_never_reaches_other_groups() {
        let router = testing::router();
        let alice = Peer::join(&router, "alice", ARTIFACT).await;
        let mallory = Peer::join(&router, "mallory", b"a different artifact entirely!!").await;
        let mallory_tunnel = tunnel(&router, &mallory);

        let (status, _) = alice
            .call(Envelope::request(MessageKind::Search).with_data("opaque-query"))
            .await;
        assert_eq!(status, StatusCode::Ok);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(mallory_tunnel.sent_requests().is_empty());
    }

    #[tokio::test]
    async fn search_without_query_is_bad_request() {
        let router = testing::router();
        let alice = Peer::join(&router, "alice", ARTIFACT).await;
        let (status, _) = alice.call(Envelope::request(MessageKind::Search)).await;
        assert_eq!(status, StatusCode::BadRequest);
    }
}
