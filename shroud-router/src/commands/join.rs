//! Join: bind a client identity and group to the session.

use std::sync::Arc;

use shroud_core::Group;
use shroud_types::messages::{self, JoinRequest};
use shroud_types::{Envelope, MessageKind};

use super::{Call, Outcome};
use crate::components::ClientComponent;
use crate::error::{ProtocolError, ProtocolResult};

/// Index the caller by client id and group.
///
/// A stale session still registered under the same client id is shut down.
pub async fn handle(call: &Call<'_>) -> ProtocolResult<Outcome> {
    let join: JoinRequest = messages::decode(call.envelope.require_data()?)?;
    if join.client.is_empty() || join.group.is_empty() {
        return Err(ProtocolError::invalid("join needs a client id and group"));
    }

    let router = call.router;
    let entity = &call.entity;

    if let Some(previous) = entity.get::<ClientComponent>() {
        router.groups().remove(&previous.group, entity);
        if router
            .clients()
            .get(&previous.id)
            .is_some_and(|e| Arc::ptr_eq(&e, entity))
        {
            router.clients().remove(&previous.id);
        }
    }

    if let Some(stale) = router.clients().get(&join.client) {
        if !Arc::ptr_eq(&stale, entity) {
            tracing::info!(client = %join.client, "replacing stale session");
            stale.shutdown();
        }
    }

    entity.set_name(join.name.clone());
    entity.add(ClientComponent {
        id: join.client.clone(),
        name: join.name.clone(),
        group: join.group.clone(),
    });
    entity.add(Group::from_id(join.group.clone()));
    router.clients().add(join.client.clone(), entity.clone());
    router.groups().add(join.group.clone(), entity.clone());

    tracing::info!(
        session = %call.session.id,
        client = %join.client,
        name = %join.name,
        group = ?join.group,
        "joined"
    );
    call.reply(Envelope::response(MessageKind::Join))
}
