//! Tunnel: turn the caller's connection into its inbound channel.
//!
//! The reply goes out before the connection is attached, so no relayed
//! request can overtake it on the wire.

use std::sync::Arc;

use shroud_core::{codec, Entity, Transport};
use shroud_types::{Envelope, MessageKind};

use super::{Call, Outcome};
use crate::components::TunnelComponent;
use crate::error::ProtocolResult;

/// Accept the tunnel request of a joined client.
pub async fn handle(call: &Call<'_>) -> ProtocolResult<Outcome> {
    let client = call.client()?;
    tracing::info!(client = %client.id, peer = %call.transport.peer(), "tunnel requested");
    let response = codec::response(&Envelope::response(MessageKind::Tunnel), &call.session.key)?;
    Ok(Outcome::Handover {
        response,
        entity: call.entity.clone(),
    })
}

/// Store `transport` as the entity's tunnel, closing any previous one.
pub fn attach(entity: &Arc<Entity>, transport: Arc<dyn Transport>) {
    if entity.is_shutdown() {
        tracing::debug!(entity = %entity.id(), "client left before its tunnel opened");
        let _ = tokio::spawn(async move { transport.close().await });
        return;
    }
    entity.add(TunnelComponent::new(transport));
    entity.update();
}
