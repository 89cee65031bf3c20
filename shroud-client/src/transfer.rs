//! Download and upload machines.
//!
//! Each transfer runs on its own [`Machine`]:
//!
//! - Download: `Init` asks the router for the file, `Download` collects one
//!   chunk per step and writes it at its offset. An empty reply sleeps for
//!   the poll delay. A busy router (503) sleeps for the restart delay and
//!   starts over. Anything else ends the transfer with Error status.
//! - Upload: `Init` offers the file, `Upload` keeps up to the allocator's
//!   outstanding limit of chunks in flight until every byte is accepted.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use shroud_core::{ChunkAllocator, Machine, State, StateHandler, Status, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_OUTSTANDING};
use shroud_types::{ClientId, TransferId};
use tokio::fs::File;
use tokio::sync::Mutex;
use tokio::task::JoinSet;

use crate::commands::{Client, DownloadTicket};
use crate::config::TimeoutConfig;
use crate::disk;
use crate::error::{ClientError, Result};

/// Run `handler` on a fresh machine until it stops and return its final status.
pub async fn drive<H: StateHandler>(name: impl Into<String>, handler: Arc<H>) -> Status {
    let machine = Machine::new(name);
    machine.start(handler);
    machine.join().await;
    machine.status()
}

/// Final report of a transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReport {
    /// Router transfer id, once assigned.
    pub id: Option<TransferId>,
    /// Total size in bytes, once known.
    pub size: Option<u64>,
    /// Bytes written or acknowledged.
    pub done: u64,
    /// Why the transfer stopped early.
    pub failure: Option<String>,
}

impl TransferReport {
    /// True when every byte made it.
    pub fn complete(&self) -> bool {
        self.failure.is_none() && self.size.is_some_and(|size| size == self.done)
    }
}

// ===== Download =====

#[derive(Default)]
struct DownloadState {
    ticket: Option<DownloadTicket>,
    file: Option<File>,
    seen: HashSet<u64>,
    written: u64,
    failure: Option<String>,
}

/// Pulls one file from a group member into a local path.
pub struct DownloadMachine {
    client: Arc<Client>,
    owner: Option<ClientId>,
    file: String,
    destination: PathBuf,
    timeouts: TimeoutConfig,
    state: Mutex<DownloadState>,
}

impl DownloadMachine {
    /// Download file `file` (a share id) to `destination`.
    ///
    /// Without an `owner`, the router picks among the members that answered
    /// our latest search.
    pub fn new(
        client: Arc<Client>,
        owner: Option<ClientId>,
        file: impl Into<String>,
        destination: impl Into<PathBuf>,
        timeouts: TimeoutConfig,
    ) -> Self {
        Self {
            client,
            owner,
            file: file.into(),
            destination: destination.into(),
            timeouts,
            state: Mutex::new(DownloadState::default()),
        }
    }

    /// Progress so far.
    pub async fn report(&self) -> TransferReport {
        let state = self.state.lock().await;
        TransferReport {
            id: state.ticket.as_ref().map(|t| t.id.clone()),
            size: state.ticket.as_ref().map(|t| t.size),
            done: state.written,
            failure: state.failure.clone(),
        }
    }

    async fn start(&self, machine: &Arc<Machine>) -> Result<()> {
        let ticket = match self.client.start_download(self.owner.as_ref(), &self.file).await {
            Ok(ticket) => ticket,
            Err(e) if e.is_busy() => {
                tracing::info!(file = %self.file, "router busy, retrying download later");
                machine.set_status(Status::Warning);
                machine.sleep(self.timeouts.restart(), State::Init);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let file = disk::create_sized(&self.destination, ticket.size).await?;
        tracing::info!(
            transfer = %ticket.id,
            owner = %ticket.owner,
            size = ticket.size,
            path = %self.destination.display(),
            "download started"
        );
        let empty = ticket.size == 0;
        {
            let mut state = self.state.lock().await;
            state.ticket = Some(ticket);
            state.file = Some(file);
        }

        if empty {
            machine.set_status(Status::Success);
            machine.finish();
        } else {
            machine.set_status(Status::Info);
            machine.set_state(State::Download);
        }
        Ok(())
    }

    async fn step(&self, machine: &Arc<Machine>) -> Result<()> {
        let mut state = self.state.lock().await;
        let ticket = state.ticket.clone().ok_or(ClientError::NotConnected)?;

        let Some((chunk, bytes)) = self.client.next_chunk(&ticket.id).await? else {
            machine.sleep(self.timeouts.poll(), State::Download);
            return Ok(());
        };
        if chunk.end() > ticket.size {
            return Err(ClientError::protocol(format!(
                "chunk at {} runs past the end of the file",
                chunk.offset
            )));
        }

        if state.seen.insert(chunk.offset) {
            let file = state.file.as_mut().ok_or(ClientError::NotConnected)?;
            disk::write_at(file, chunk.offset, &bytes).await?;
            state.written += chunk.size;
        }

        if state.written == ticket.size {
            state.file = None;
            tracing::info!(transfer = %ticket.id, size = ticket.size, "download complete");
            machine.set_status(Status::Success);
            machine.finish();
        } else {
            machine.set_state(State::Download);
        }
        Ok(())
    }
}

#[async_trait]
impl StateHandler for DownloadMachine {
    type Error = ClientError;

    async fn on_state(&self, state: State, machine: &Arc<Machine>) -> Result<()> {
        match state {
            State::Init => self.start(machine).await,
            State::Download => self.step(machine).await,
            State::Shutdown => {
                self.state.lock().await.file = None;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    async fn on_error(&self, state: State, error: &ClientError, machine: &Arc<Machine>) {
        tracing::warn!(file = %self.file, %state, %error, "download failed");
        self.state.lock().await.failure = Some(error.to_string());
        machine.set_status(Status::Error);
        machine.set_state(State::Shutdown);
    }
}

// ===== Upload =====

#[derive(Default)]
struct UploadState {
    id: Option<TransferId>,
    allocator: Option<ChunkAllocator>,
    failure: Option<String>,
}

/// Pushes one local file to a group member.
pub struct UploadMachine {
    client: Arc<Client>,
    member: ClientId,
    source: PathBuf,
    name: String,
    timeouts: TimeoutConfig,
    chunk_size: u64,
    max_outstanding: usize,
    state: Mutex<UploadState>,
}

impl UploadMachine {
    /// Upload `source` to `member` under its file name.
    pub fn new(
        client: Arc<Client>,
        member: ClientId,
        source: impl Into<PathBuf>,
        timeouts: TimeoutConfig,
    ) -> Self {
        let source = source.into();
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        Self {
            client,
            member,
            source,
            name,
            timeouts,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_outstanding: DEFAULT_MAX_OUTSTANDING,
            state: Mutex::new(UploadState::default()),
        }
    }

    /// Use a different chunk window.
    pub fn with_chunks(mut self, chunk_size: u64, max_outstanding: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self.max_outstanding = max_outstanding.max(1);
        self
    }

    /// Progress so far.
    pub async fn report(&self) -> TransferReport {
        let state = self.state.lock().await;
        TransferReport {
            id: state.id.clone(),
            size: state.allocator.as_ref().map(ChunkAllocator::size),
            done: state.allocator.as_ref().map_or(0, ChunkAllocator::committed),
            failure: state.failure.clone(),
        }
    }

    async fn offer(&self, machine: &Arc<Machine>) -> Result<()> {
        let size = tokio::fs::metadata(&self.source).await?.len();
        let id = match self.client.offer_upload(&self.member, &self.name, size).await {
            Ok(id) => id,
            Err(e) if e.is_busy() => {
                tracing::info!(path = %self.source.display(), "router busy, retrying upload later");
                machine.set_status(Status::Warning);
                machine.sleep(self.timeouts.restart(), State::Init);
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        tracing::info!(transfer = %id, member = %self.member, size, "upload accepted");

        {
            let mut state = self.state.lock().await;
            state.id = Some(id);
            state.allocator = Some(ChunkAllocator::new(size, self.chunk_size, self.max_outstanding));
        }
        if size == 0 {
            machine.set_status(Status::Success);
            machine.finish();
        } else {
            machine.set_status(Status::Info);
            machine.set_state(State::Upload);
        }
        Ok(())
    }

    async fn send(&self, machine: &Arc<Machine>) -> Result<()> {
        let mut state = self.state.lock().await;
        let id = state.id.clone().ok_or(ClientError::NotConnected)?;
        let allocator = state.allocator.as_mut().ok_or(ClientError::NotConnected)?;
        let mut in_flight = JoinSet::new();

        loop {
            while let Some(chunk) = allocator.pop_chunk() {
                let client = self.client.clone();
                let source = self.source.clone();
                let id = id.clone();
                in_flight.spawn(async move {
                    let bytes = disk::read_at(&source, chunk.offset, chunk.size).await?;
                    client.send_chunk(&id, chunk, &bytes).await?;
                    Ok::<_, ClientError>(chunk)
                });
            }
            match in_flight.join_next().await {
                None => break,
                Some(Ok(Ok(chunk))) => allocator.push_data(&chunk, chunk.size)?,
                Some(Ok(Err(e))) => return Err(e),
                Some(Err(e)) => return Err(ClientError::protocol(format!("chunk task failed: {}", e))),
            }
        }

        if !allocator.finished() {
            return Err(ClientError::protocol("upload stopped before the end"));
        }
        tracing::info!(transfer = %id, size = allocator.size(), "upload complete");
        machine.set_status(Status::Success);
        machine.finish();
        Ok(())
    }
}

#[async_trait]
impl StateHandler for UploadMachine {
    type Error = ClientError;

    async fn on_state(&self, state: State, machine: &Arc<Machine>) -> Result<()> {
        match state {
            State::Init => self.offer(machine).await,
            State::Upload => self.send(machine).await,
            _ => Ok(()),
        }
    }

    async fn on_error(&self, state: State, error: &ClientError, machine: &Arc<Machine>) {
        tracing::warn!(path = %self.source.display(), %state, %error, "upload failed");
        self.state.lock().await.failure = Some(error.to_string());
        machine.set_status(Status::Error);
        machine.set_state(State::Shutdown);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::Link;
    use shroud_core::{codec, Group, MockTransport, Session};
    use shroud_types::messages::FileChunk;
    use shroud_types::{Chunk, Envelope, HttpResponse, MessageKind, StatusCode};
    use std::time::Duration;

    const ARTIFACT: &[u8] = b"the shared secret picture, in bytes";

    async fn joined(mock: &MockTransport) -> (Arc<Client>, Session) {
        let session = Session::generate().unwrap();
        mock.queue_response(codec::response(&Envelope::response(MessageKind::Join), &session.key).unwrap());
        let link = Link::attach(Arc::new(mock.clone()), session.clone());
        let client = Client::join(link, ClientId::random(), "alice", Group::from_artifact(ARTIFACT))
            .await
            .unwrap();
        (Arc::new(client), session)
    }

    fn fast() -> TimeoutConfig {
        TimeoutConfig {
            restart_secs: 0,
            ping_secs: 60,
            poll_millis: 1,
        }
    }

    fn reply(mock: &MockTransport, session: &Session, envelope: Envelope) {
        mock.queue_response(codec::response(&envelope, &session.key).unwrap());
    }

    fn chunk_reply(group: &Group, offset: u64, bytes: &[u8]) -> Envelope {
        Envelope::response(MessageKind::Download)
            .with_id("t1")
            .with_chunk(Chunk::new(offset, bytes.len() as u64))
            .with_data(codec::seal_payload(&FileChunk::from_bytes(bytes), &group.key).unwrap())
    }

    // ===== Download =====

    #[tokio::test]
    async fn download_polls_and_writes_out_of_order() {
        let mock = MockTransport::new();
        let (client, session) = joined(&mock).await;
        let group = client.group().clone();
        let owner = ClientId::random();

        mock.queue_response(HttpResponse::new(StatusCode::ServiceUnavailable));
        reply(
            &mock,
            &session,
            Envelope::response(MessageKind::Download)
                .with_id("t1")
                .with_client(owner.clone())
                .with_size(8),
        );
        reply(&mock, &session, Envelope::response(MessageKind::Download).with_id("t1"));
        reply(&mock, &session, chunk_reply(&group, 4, b"5678"));
        reply(&mock, &session, chunk_reply(&group, 0, b"1234"));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let download = Arc::new(DownloadMachine::new(client, Some(owner), "file", &path, fast()));
        let status = tokio::time::timeout(Duration::from_secs(5), drive("download", download.clone()))
            .await
            .unwrap();

        assert_eq!(status, Status::Success);
        assert!(download.report().await.complete());
        assert_eq!(std::fs::read(&path).unwrap(), b"12345678");
    }

    #[tokio::test]
    async fn download_refused_by_owner_fails() {
        let mock = MockTransport::new();
        let (client, _session) = joined(&mock).await;
        mock.queue_response(HttpResponse::new(StatusCode::NotFound));

        let dir = tempfile::tempdir().unwrap();
        let download = Arc::new(DownloadMachine::new(client, None, "file", dir.path().join("x"), fast()));
        let status = drive("download", download.clone()).await;

        assert_eq!(status, Status::Error);
        let report = download.report().await;
        assert!(!report.complete());
        assert!(report.failure.unwrap().contains("404"));
    }

    #[tokio::test]
    async fn empty_file_completes_at_once() {
        let mock = MockTransport::new();
        let (client, session) = joined(&mock).await;
        reply(
            &mock,
            &session,
            Envelope::response(MessageKind::Download)
                .with_id("t1")
                .with_client(ClientId::random())
                .with_size(0),
        );
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty");
        let download = Arc::new(DownloadMachine::new(client, None, "file", &path, fast()));
        assert_eq!(drive("download", download).await, Status::Success);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
    }

    // ===== Upload =====

    #[tokio::test]
    async fn upload_sends_every_window() {
        let mock = MockTransport::new();
        let (client, session) = joined(&mock).await;
        let group = client.group().clone();
        reply(&mock, &session, Envelope::response(MessageKind::Upload).with_id("u1"));
        for _ in 0..3 {
            reply(&mock, &session, Envelope::response(MessageKind::Upload).with_id("u1"));
        }

        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("notes.txt");
        std::fs::write(&source, b"0123456789").unwrap();

        let upload = Arc::new(
            UploadMachine::new(client, ClientId::random(), &source, fast()).with_chunks(4, 2),
        );
        assert_eq!(drive("upload", upload.clone()).await, Status::Success);
        let report = upload.report().await;
        assert!(report.complete());
        assert_eq!(report.done, 10);

        let mut received = Vec::new();
        for request in mock.sent_requests().iter().skip(2) {
            let envelope = codec::open(&request.body, &session.key).unwrap();
            let chunk = envelope.chunk.unwrap();
            let bytes = codec::open_payload::<FileChunk>(&envelope, &group.key)
                .unwrap()
                .to_bytes()
                .unwrap();
            received.push((chunk.offset, bytes));
        }
        received.sort();
        let joined: Vec<u8> = received.into_iter().flat_map(|(_, b)| b).collect();
        assert_eq!(joined, b"0123456789");
    }

    #[tokio::test]
    async fn upload_of_missing_file_fails() {
        let mock = MockTransport::new();
        let (client, _session) = joined(&mock).await;
        let upload = Arc::new(UploadMachine::new(
            client,
            ClientId::random(),
            "/no/such/file",
            fast(),
        ));
        assert_eq!(drive("upload", upload.clone()).await, Status::Error);
        assert!(upload.report().await.failure.is_some());
    }
}
