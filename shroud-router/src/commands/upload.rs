//! Upload: push a file to a member in chunks.
//!
//! The offer (no id) names a target client and carries the size visibly; the
//! router relays it with a fresh transfer id and opens the transfer once the
//! target accepts. Each later request carries the id, a chunk window and the
//! opaque chunk payload, which is relayed to the target. At most `max_chunks`
//! chunks of one upload are in flight to the target at a time. A chunk the
//! target already holds is acknowledged without relaying it again, and the
//! transfer closes once the accepted chunks cover every byte.

use shroud_types::{Envelope, MessageKind};

use super::{allocator, ensure_capacity, find_transfer, open_transfer, target, Call, Outcome};
use crate::components::{ClientComponent, TransferComponent, TransferKind};
use crate::error::{ProtocolError, ProtocolResult};

/// Offer an upload or relay one of its chunks.
pub async fn handle(call: &Call<'_>) -> ProtocolResult<Outcome> {
    let client = call.client()?;
    match call.envelope.id.clone() {
        None => offer(call, &client).await,
        Some(id) => relay_chunk(call, &client, &id).await,
    }
}

async fn offer(call: &Call<'_>, client: &ClientComponent) -> ProtocolResult<Outcome> {
    let router = call.router;
    ensure_capacity(router)?;

    let owner_id = call
        .envelope
        .client
        .clone()
        .ok_or_else(|| ProtocolError::invalid("upload needs a target client"))?;
    let size = call
        .envelope
        .size
        .ok_or_else(|| ProtocolError::invalid("upload needs a size"))?;
    let data = call.envelope.require_data()?.to_string();
    let owner = target(router, client, &owner_id)?;

    let transfer = TransferComponent::new(
        TransferKind::Upload,
        client.id.clone(),
        owner_id.clone(),
        data.clone(),
        allocator(router, size),
    );
    let request = Envelope::request(MessageKind::Upload)
        .with_id(transfer.id.as_str())
        .with_client(client.id.clone())
        .with_size(size)
        .with_data(data);
    let (status, _) = router.relay(&owner, &request).await?;
    if !status.is_ok() {
        return Err(ProtocolError::Peer(status));
    }

    let reply = Envelope::response(MessageKind::Upload)
        .with_id(transfer.id.as_str())
        .with_client(owner_id)
        .with_size(size);
    if size > 0 {
        open_transfer(router, transfer);
    }
    call.reply(reply)
}

async fn relay_chunk(call: &Call<'_>, client: &ClientComponent, id: &str) -> ProtocolResult<Outcome> {
    let router = call.router;
    let (entity, transfer) = find_transfer(router, id, &client.id, TransferKind::Upload)?;
    let chunk = call
        .envelope
        .chunk
        .ok_or_else(|| ProtocolError::invalid("upload step needs a chunk"))?;
    let data = call.envelope.require_data()?;
    entity.update();

    let reply = Envelope::response(MessageKind::Upload)
        .with_id(id)
        .with_chunk(chunk);
    if !transfer.check_upload(&chunk)? {
        tracing::debug!(transfer = %id, offset = chunk.offset, "chunk already delivered");
        return call.reply(reply);
    }

    let _window = transfer
        .reserve()
        .await
        .ok_or_else(|| ProtocolError::TransferNotFound(id.to_string()))?;
    let owner = router.reachable(&transfer.owner).inspect_err(|_| {
        entity.shutdown();
    })?;
    let request = Envelope::request(MessageKind::Upload)
        .with_id(id)
        .with_client(client.id.clone())
        .with_chunk(chunk)
        .with_data(data);
    let (status, _) = router.relay(&owner, &request).await?;
    if !status.is_ok() {
        entity.shutdown();
        return Err(ProtocolError::Peer(status));
    }

    let finished = {
        let _scope = entity.lock().await;
        transfer.commit_upload(&chunk)?;
        transfer.finished()
    };
    if finished && entity.shutdown() {
        tracing::info!(transfer = %id, size = transfer.size(), "upload complete");
    }
    call.reply(reply)
}
