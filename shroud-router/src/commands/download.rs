//! Download: pull a file from a member in chunks.
//!
//! The first request (no id) names the file with an opaque payload and
//! optionally a target client; without a target, the members that answered
//! the caller's last search are tried in order. The owner reports the size,
//! the router opens a transfer and a pump task starts fetching chunks from
//! the owner, never more than the allocator's outstanding limit ahead of the
//! requester. Each later request carrying the transfer id collects one
//! fetched chunk, or an empty reply if none is ready yet.

use std::sync::Arc;

use shroud_core::Entity;
use shroud_types::{Chunk, ClientId, Envelope, MessageKind};

use super::{allocator, ensure_capacity, find_transfer, open_transfer, target, Call, Outcome};
use crate::components::{ClientComponent, SearchList, TransferComponent, TransferKind};
use crate::error::{ProtocolError, ProtocolResult};
use crate::server::Router;

/// Start a download or collect its next chunk.
pub async fn handle(call: &Call<'_>) -> ProtocolResult<Outcome> {
    let client = call.client()?;
    match call.envelope.id.clone() {
        None => start(call, &client).await,
        Some(id) => collect(call, &client, &id).await,
    }
}

async fn start(call: &Call<'_>, client: &ClientComponent) -> ProtocolResult<Outcome> {
    let router = call.router;
    ensure_capacity(router)?;
    let data = call.envelope.require_data()?.to_string();

    let candidates: Vec<ClientId> = match &call.envelope.client {
        Some(owner) => vec![owner.clone()],
        None => call
            .entity
            .get::<SearchList>()
            .map(|list| list.clients())
            .unwrap_or_default(),
    };
    if candidates.is_empty() {
        return Err(ProtocolError::NoTarget);
    }

    let request = Envelope::request(MessageKind::Download)
        .with_client(client.id.clone())
        .with_data(data.clone());

    let mut last = ProtocolError::NoTarget;
    for candidate in candidates {
        let owner = match target(router, client, &candidate) {
            Ok(owner) => owner,
            Err(e) => {
                last = e;
                continue;
            }
        };
        match router.relay(&owner, &request).await {
            Ok((status, Some(reply))) if status.is_ok() => match reply.size {
                Some(size) => return open(call, client, candidate, data, size),
                None => last = ProtocolError::Internal("owner sent no size".to_string()),
            },
            Ok((status, _)) => last = ProtocolError::Peer(status),
            Err(e) => last = e,
        }
        tracing::debug!(owner = %candidate, "download candidate declined: {}", last);
    }
    Err(last)
}

fn open(
    call: &Call<'_>,
    client: &ClientComponent,
    owner: ClientId,
    data: String,
    size: u64,
) -> ProtocolResult<Outcome> {
    let router = call.router;
    let transfer = TransferComponent::new(
        TransferKind::Download,
        client.id.clone(),
        owner.clone(),
        data,
        allocator(router, size),
    );
    let reply = Envelope::response(MessageKind::Download)
        .with_id(transfer.id.as_str())
        .with_client(owner)
        .with_size(size);

    if size == 0 {
        return call.reply(reply);
    }

    let (entity, transfer) = open_transfer(router, transfer);
    let pump = tokio::spawn(pump(router.clone(), entity, transfer.clone()));
    transfer.set_pump(pump);
    call.reply(reply)
}

async fn collect(call: &Call<'_>, client: &ClientComponent, id: &str) -> ProtocolResult<Outcome> {
    let (entity, transfer) = find_transfer(call.router, id, &client.id, TransferKind::Download)?;
    entity.update();

    if let Some(reason) = transfer.failure() {
        tracing::warn!(transfer = %id, "download failed: {}", reason);
        entity.shutdown();
        return Err(ProtocolError::ClientNotFound(transfer.owner.to_string()));
    }

    let ready = {
        let _scope = entity.lock().await;
        transfer.take_ready()
    };
    let Some(ready) = ready else {
        return call.reply(Envelope::response(MessageKind::Download).with_id(id));
    };

    if transfer.finished() {
        tracing::info!(transfer = %id, size = transfer.size(), "download complete");
        entity.shutdown();
    }
    call.reply(
        Envelope::response(MessageKind::Download)
            .with_id(id)
            .with_chunk(ready.chunk)
            .with_data(ready.data),
    )
}

/// Fetch chunks from the owner until every window has been handed out.
async fn pump(router: Arc<Router>, entity: Arc<Entity>, transfer: Arc<TransferComponent>) {
    loop {
        let next = {
            let _scope = entity.lock().await;
            transfer.pop_chunk()
        };
        let Some(chunk) = next else {
            if transfer.fully_allocated() {
                break;
            }
            transfer.acknowledged().await;
            continue;
        };

        if let Err(e) = fetch(&router, &transfer, chunk).await {
            tracing::warn!(transfer = %transfer.id, offset = chunk.offset, "chunk fetch failed: {}", e);
            transfer.fail(e.to_string());
            break;
        }
        entity.update();
    }
    tracing::debug!(transfer = %transfer.id, "pump done");
}

async fn fetch(router: &Router, transfer: &TransferComponent, chunk: Chunk) -> ProtocolResult<()> {
    let owner = router.reachable(&transfer.owner)?;
    let request = Envelope::request(MessageKind::Download)
        .with_id(transfer.id.as_str())
        .with_client(transfer.requester.clone())
        .with_chunk(chunk)
        .with_data(transfer.request.clone());

    let (status, reply) = router.relay(&owner, &request).await?;
    if !status.is_ok() {
        return Err(ProtocolError::Peer(status));
    }
    let data = reply
        .and_then(|r| r.data)
        .ok_or_else(|| ProtocolError::Internal("owner sent no chunk data".to_string()))?;
    transfer.stash(chunk, data);
    Ok(())
}
