//! Group: list the other members of the caller's group.

use shroud_types::messages::{self, ClientInfo, GroupListing};
use shroud_types::{Envelope, MessageKind};

use super::{Call, Outcome};
use crate::components::ClientComponent;
use crate::error::ProtocolResult;

/// Reply with every joined member sharing the caller's group id.
///
/// The listing is router-originated, so it travels under the session layer
/// only.
pub async fn handle(call: &Call<'_>) -> ProtocolResult<Outcome> {
    let client = call.client()?;
    let mut clients: Vec<ClientInfo> = call
        .router
        .members(&client.group, &client.id)
        .iter()
        .filter_map(|e| e.get::<ClientComponent>())
        .map(|c| ClientInfo {
            id: c.id.clone(),
            name: c.name.clone(),
        })
        .collect();
    clients.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));

    let listing = GroupListing { clients };
    call.reply(Envelope::response(MessageKind::Group).with_data(messages::encode(&listing)?))
}

#[cfg(test)]
mod tests {
    use crate::commands::testing::{self, Peer};
    use shroud_types::messages::{self, GroupListing};
    use shroud_types::{Envelope, MessageKind, StatusCode};

    const ARTIFACT: &[u8] = b"holiday photo bytes, shared by all";

    #[tokio::test]
    async fn lists_other_members_of_same_group() {
        let router = testing::router();
        let alice = Peer::join(&router, "alice", ARTIFACT).await;
        let _bob = Peer::join(&router, "bob", ARTIFACT).await;
        let _carol = Peer::join(&router, "carol", ARTIFACT).await;
        let _mallory = Peer::join(&router, "mallory", b"a different artifact entirely!!").await;

        let (status, reply) = alice.call(Envelope::request(MessageKind::Group)).await;
        assert_eq!(status, StatusCode::Ok);
        let listing: GroupListing =
            messages::decode(reply.unwrap().data.as_deref().unwrap()).unwrap();
        let names: Vec<_> = listing.clients.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["bob", "carol"]);
    }
}
