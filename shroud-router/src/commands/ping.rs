//! Ping: keep the session from idling out.

use shroud_types::{Envelope, MessageKind};

use super::{Call, Outcome};
use crate::error::ProtocolResult;

/// The session was already touched on receipt; just acknowledge.
pub async fn handle(call: &Call<'_>) -> ProtocolResult<Outcome> {
    call.reply(Envelope::response(MessageKind::Ping))
}

#[cfg(test)]
mod tests {
    use crate::commands::testing::{self, Peer};
    use shroud_core::IdleComponent;
    use shroud_types::{Envelope, MessageKind, StatusCode};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn ping_defers_idle_expiry() {
        let mut config = crate::config::Config::default();
        config.timeouts.client_idle_secs = 10;
        let router = testing::router_with(config);
        let peer = Peer::join(&router, "a", b"artifact-artifact-artifact").await;

        for _ in 0..3 {
            tokio::time::sleep(Duration::from_secs(6)).await;
            let (status, reply) = peer.call(Envelope::request(MessageKind::Ping)).await;
            assert_eq!(status, StatusCode::Ok);
            assert_eq!(reply.unwrap().kind, MessageKind::Ping);
        }
        let entity = router.session_entity(&peer.session.id).unwrap();
        assert!(entity.get::<IdleComponent>().unwrap().idle_for() < Duration::from_secs(1));

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(router.clients().is_empty());
    }
}
