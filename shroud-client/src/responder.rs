//! Response side of relayed commands, served on the tunnel.
//!
//! The router issues requests down our tunnel on behalf of other members:
//! searches, browses, download windows and upload chunks. It can read the
//! envelope but not the group-sealed data, so every payload is opened and
//! answered here with the group key.

use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use shroud_core::{codec, ChunkLedger, Group, Key};
use shroud_types::messages::{
    BrowseRequest, DownloadRequest, FileChunk, SearchRequest, SearchResults, UploadOffer,
};
use shroud_types::{Action, ClientId, Envelope, HttpResponse, MessageKind, SearchId, StatusCode, TransferId};
use tokio::fs::File;
use tokio::sync::Mutex;

use crate::context::ClientContext;
use crate::disk;
use crate::error::{ClientError, Result};
use crate::link::Link;
use crate::share::SharedFile;

/// A file a member is uploading to us.
struct UploadSink {
    from: ClientId,
    path: PathBuf,
    size: u64,
    target: Mutex<SinkTarget>,
}

/// The file being written and the windows already in it.
struct SinkTarget {
    file: File,
    ledger: ChunkLedger,
}

/// Answers relayed requests for one group.
pub struct Responder {
    context: ClientContext,
    group: Group,
    uploads: DashMap<TransferId, Arc<UploadSink>>,
    resolved: DashMap<String, SharedFile>,
}

impl Responder {
    /// Responder for `group` using the shares and folders in `context`.
    pub fn new(context: ClientContext, group: Group) -> Self {
        Self {
            context,
            group,
            uploads: DashMap::new(),
            resolved: DashMap::new(),
        }
    }

    /// Answer requests on `tunnel` until the router closes it.
    pub async fn serve(&self, tunnel: &Link) -> Result<()> {
        let transport = tunnel.transport();
        let key = &tunnel.session().key;
        loop {
            let request = match transport.recv_request().await {
                Ok(request) => request,
                Err(e) if e.is_disconnect() => {
                    tracing::debug!("tunnel closed: {}", e);
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            };
            let response = self.answer(&request.body, key).await;
            transport.send_response(&response).await?;
        }
    }

    /// Turn one sealed request body into a sealed response.
    pub async fn answer(&self, body: &[u8], key: &Key) -> HttpResponse {
        let envelope = match codec::open(body, key) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!("unreadable tunnel request: {}", e);
                return codec::status(StatusCode::BadRequest);
            }
        };
        let kind = envelope.kind;
        match self.respond(envelope).await {
            Ok(reply) => codec::response(&reply, key)
                .unwrap_or_else(|_| codec::status(StatusCode::InternalServerError)),
            Err(e) => {
                let status = status_of(&e);
                tracing::debug!(?kind, %status, "tunnel request refused: {}", e);
                codec::status(status)
            }
        }
    }

    /// Handle one opened envelope.
    pub async fn respond(&self, envelope: Envelope) -> Result<Envelope> {
        match (envelope.kind, envelope.action) {
            (MessageKind::Search, Action::Request) => self.search(&envelope).await,
            (MessageKind::Search, Action::Response) => self.search_results(&envelope),
            (MessageKind::Browse, Action::Request) => self.browse(&envelope).await,
            (MessageKind::Download, Action::Request) => self.serve_download(&envelope).await,
            (MessageKind::Upload, Action::Request) => self.receive_upload(&envelope).await,
            (MessageKind::Ping, _) => Ok(Envelope::response(MessageKind::Ping)),
            _ => Err(ClientError::Status(StatusCode::BadRequest)),
        }
    }

    /// Uploads still being received.
    pub fn pending_uploads(&self) -> usize {
        self.uploads.len()
    }

    // ===== Search =====

    async fn search(&self, envelope: &Envelope) -> Result<Envelope> {
        let request: SearchRequest = codec::open_payload(envelope, &self.group.key)?;
        let shares = self.context.shares.clone();
        let keyword = request.keyword.clone();
        let files = blocking(move || shares.search(&keyword)).await?;
        tracing::debug!(keyword = %request.keyword, hits = files.len(), "search request");

        let reply = Envelope::response(MessageKind::Search);
        if files.is_empty() {
            return Ok(reply);
        }
        Ok(reply.with_data(codec::seal_payload(&SearchResults { files }, &self.group.key)?))
    }

    fn search_results(&self, envelope: &Envelope) -> Result<Envelope> {
        let search = envelope
            .id
            .as_deref()
            .map(SearchId::new)
            .ok_or(ClientError::Status(StatusCode::BadRequest))?;
        let client = envelope
            .client
            .clone()
            .ok_or(ClientError::Status(StatusCode::BadRequest))?;
        let results: SearchResults = codec::open_payload(envelope, &self.group.key)?;
        self.context.searches.record(&search, &client, results.files);
        Ok(Envelope::response(MessageKind::Search))
    }

    // ===== Browse =====

    async fn browse(&self, envelope: &Envelope) -> Result<Envelope> {
        let request: BrowseRequest = codec::open_payload(envelope, &self.group.key)?;
        let shares = self.context.shares.clone();
        let listing = blocking(move || shares.browse(request.folder.as_deref()))
            .await?
            .ok_or(ClientError::Status(StatusCode::NotFound))?;
        Ok(Envelope::response(MessageKind::Browse)
            .with_data(codec::seal_payload(&listing, &self.group.key)?))
    }

    // ===== Download (we own the file) =====

    async fn serve_download(&self, envelope: &Envelope) -> Result<Envelope> {
        let request: DownloadRequest = codec::open_payload(envelope, &self.group.key)?;
        let file = self.lookup(request.file).await?;

        let Some(chunk) = envelope.chunk else {
            tracing::info!(file = %file.name, size = file.size, "download requested");
            return Ok(Envelope::response(MessageKind::Download).with_size(file.size));
        };
        if chunk.end() > file.size {
            return Err(ClientError::Status(StatusCode::BadRequest));
        }

        let bytes = disk::read_at(&file.path, chunk.offset, chunk.size).await?;
        let data = codec::seal_payload(&FileChunk::from_bytes(&bytes), &self.group.key)?;
        Ok(Envelope::response(MessageKind::Download)
            .with_chunk(chunk)
            .with_data(data))
    }

    // ===== Upload (we receive the file) =====

    async fn receive_upload(&self, envelope: &Envelope) -> Result<Envelope> {
        let id = envelope
            .id
            .as_deref()
            .map(TransferId::new)
            .ok_or(ClientError::Status(StatusCode::BadRequest))?;
        match envelope.chunk {
            None => self.accept_upload(id, envelope).await,
            Some(chunk) => {
                let sink = self
                    .uploads
                    .get(&id)
                    .map(|s| Arc::clone(s.value()))
                    .ok_or(ClientError::Status(StatusCode::NotFound))?;
                let payload: FileChunk = codec::open_payload(envelope, &self.group.key)?;
                let bytes = payload.to_bytes()?;
                if bytes.len() as u64 != chunk.size {
                    return Err(ClientError::Status(StatusCode::BadRequest));
                }

                let finished = {
                    let mut target = sink.target.lock().await;
                    if target.ledger.check(&chunk)? {
                        disk::write_at(&mut target.file, chunk.offset, &bytes).await?;
                        target.ledger.commit(&chunk)?;
                    } else {
                        tracing::debug!(transfer = %id, offset = chunk.offset, "chunk already written");
                    }
                    target.ledger.finished()
                };
                if finished && self.uploads.remove(&id).is_some() {
                    tracing::info!(
                        transfer = %id,
                        from = %sink.from,
                        path = %sink.path.display(),
                        size = sink.size,
                        "upload received"
                    );
                }
                Ok(Envelope::response(MessageKind::Upload).with_chunk(chunk))
            }
        }
    }

    /// Resolve a file id, remembering the answer for the following windows.
    async fn lookup(&self, id: String) -> Result<SharedFile> {
        if let Some(file) = self.resolved.get(&id) {
            return Ok(file.clone());
        }
        let shares = self.context.shares.clone();
        let key = id.clone();
        let file = blocking(move || shares.file(&key))
            .await?
            .ok_or(ClientError::Status(StatusCode::NotFound))?;
        self.resolved.insert(id, file.clone());
        Ok(file)
    }

    async fn accept_upload(&self, id: TransferId, envelope: &Envelope) -> Result<Envelope> {
        let from = envelope
            .client
            .clone()
            .ok_or(ClientError::Status(StatusCode::BadRequest))?;
        let offer: UploadOffer = codec::open_payload(envelope, &self.group.key)?;
        if envelope.size != Some(offer.size) {
            return Err(ClientError::Status(StatusCode::BadRequest));
        }
        let path = disk::destination(&self.context.download_dir, &offer.name)
            .ok_or(ClientError::Status(StatusCode::BadRequest))?;

        let file = disk::create_sized(&path, offer.size).await?;
        tracing::info!(transfer = %id, from = %from, path = %path.display(), size = offer.size, "upload accepted");
        if offer.size > 0 {
            self.uploads.insert(
                id,
                Arc::new(UploadSink {
                    from,
                    path,
                    size: offer.size,
                    target: Mutex::new(SinkTarget {
                        file,
                        ledger: ChunkLedger::new(offer.size),
                    }),
                }),
            );
        }
        Ok(Envelope::response(MessageKind::Upload))
    }
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ClientError::protocol(format!("share scan failed: {}", e)))
}

/// Status sent back for a failed tunnel request.
fn status_of(error: &ClientError) -> StatusCode {
    match error {
        ClientError::Status(status) => *status,
        ClientError::Codec(_)
        | ClientError::Crypto(_)
        | ClientError::Wire(_)
        | ClientError::Chunk(_) => StatusCode::BadRequest,
        ClientError::Io(e) if e.kind() == std::io::ErrorKind::NotFound => StatusCode::NotFound,
        _ => StatusCode::InternalServerError,
    }
}
