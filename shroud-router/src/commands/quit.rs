//! Quit: the client leaves and is dropped from every index.

use shroud_core::codec;
use shroud_types::{Envelope, MessageKind};

use super::{Call, Outcome};
use crate::error::ProtocolResult;

/// Acknowledge, shut the entity down and close the connection.
pub async fn handle(call: &Call<'_>) -> ProtocolResult<Outcome> {
    let response = codec::response(&Envelope::response(MessageKind::Quit), &call.session.key)?;
    tracing::info!(session = %call.session.id, name = %call.entity.name(), "quit");
    call.entity.shutdown();
    Ok(Outcome::Close(response))
}

#[cfg(test)]
mod tests {
    use crate::commands::testing::{self, Peer};
    use shroud_types::{Envelope, MessageKind, StatusCode};

    #[tokio::test]
    async fn quit_removes_client_everywhere() {
        let router = testing::router();
        let peer = Peer::join(&router, "a", b"artifact-artifact-artifact").await;
        let other = Peer::join(&router, "b", b"artifact-artifact-artifact").await;

        let (status, _) = peer.call(Envelope::request(MessageKind::Quit)).await;
        assert_eq!(status, StatusCode::Ok);

        assert!(!router.sessions().contains(&peer.session.id));
        assert!(!router.clients().contains(&peer.id));
        assert_eq!(router.groups().get(&peer.group_id()).len(), 1);
        assert!(router.clients().contains(&other.id));

        let (status, _) = peer.call(Envelope::request(MessageKind::Ping)).await;
        assert_eq!(status, StatusCode::Unauthorized);
    }
}
