//! Router-side components attached to client and transfer entities.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use shroud_core::{ChunkAllocator, ChunkError, ChunkLedger, Component, Entity, Transport};
use shroud_types::{Chunk, ClientId, GroupId, SearchId, TransferId};
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;

/// Identity a session announced on join.
#[derive(Debug, Clone)]
pub struct ClientComponent {
    /// Client id.
    pub id: ClientId,
    /// Display name.
    pub name: String,
    /// Group the client derived from its artifact.
    pub group: GroupId,
}

impl Component for ClientComponent {}

/// The long-lived connection the router issues relayed requests on.
pub struct TunnelComponent {
    transport: Arc<dyn Transport>,
}

impl TunnelComponent {
    /// Wrap a handed-over connection.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// The tunnel connection.
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }
}

impl Component for TunnelComponent {
    fn shutdown(&self) {
        let transport = self.transport.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let _ = transport.close().await;
            });
        }
    }

    fn valid(&self) -> bool {
        self.transport.is_connected()
    }
}

impl std::fmt::Debug for TunnelComponent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelComponent")
            .field("peer", &self.transport.peer())
            .finish()
    }
}

/// Members that answered the owner's most recent search.
#[derive(Debug, Default)]
pub struct SearchList {
    inner: Mutex<(Option<SearchId>, Vec<ClientId>)>,
}

impl SearchList {
    /// Start tracking a new search, forgetting the previous one.
    pub fn reset(&self, search: SearchId) {
        *self.lock() = (Some(search), Vec::new());
    }

    /// Record that `client` answered `search`. Stale searches are ignored.
    pub fn record(&self, search: &SearchId, client: ClientId) {
        let mut inner = self.lock();
        if inner.0.as_ref() == Some(search) && !inner.1.contains(&client) {
            inner.1.push(client);
        }
    }

    /// Responders in arrival order.
    pub fn clients(&self) -> Vec<ClientId> {
        self.lock().1.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, (Option<SearchId>, Vec<ClientId>)> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Component for SearchList {}

/// Direction of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    /// Requester pulls from owner.
    Download,
    /// Requester pushes to owner.
    Upload,
}

/// A chunk fetched from the owner and waiting for the requester.
#[derive(Debug, Clone)]
pub struct ReadyChunk {
    /// Window the data covers.
    pub chunk: Chunk,
    /// Group-encrypted chunk payload.
    pub data: String,
}

#[derive(Debug)]
struct TransferState {
    allocator: ChunkAllocator,
    ready: VecDeque<ReadyChunk>,
    ledger: ChunkLedger,
    failed: Option<String>,
}

/// One in-flight transfer between two members.
///
/// Allocation state is only touched while the owning entity's scope is held.
pub struct TransferComponent {
    /// Transfer id.
    pub id: TransferId,
    /// Direction.
    pub kind: TransferKind,
    /// Client that started the transfer.
    pub requester: ClientId,
    /// Client holding (download) or receiving (upload) the file.
    pub owner: ClientId,
    /// Group-encrypted request payload repeated on every chunk fetch.
    pub request: String,
    state: Mutex<TransferState>,
    wake: Notify,
    window: Arc<Semaphore>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl TransferComponent {
    /// Create transfer state for `size` bytes.
    pub fn new(
        kind: TransferKind,
        requester: ClientId,
        owner: ClientId,
        request: String,
        allocator: ChunkAllocator,
    ) -> Self {
        let window = Arc::new(Semaphore::new(allocator.max_outstanding()));
        let ledger = ChunkLedger::new(allocator.size());
        Self {
            id: TransferId::random(),
            kind,
            requester,
            owner,
            request,
            state: Mutex::new(TransferState {
                allocator,
                ready: VecDeque::new(),
                ledger,
                failed: None,
            }),
            wake: Notify::new(),
            window,
            pump: Mutex::new(None),
        }
    }

    /// Total bytes.
    pub fn size(&self) -> u64 {
        self.lock().allocator.size()
    }

    /// Next window to fetch from the owner.
    pub fn pop_chunk(&self) -> Option<Chunk> {
        self.lock().allocator.pop_chunk()
    }

    /// True once every window has been handed out.
    pub fn fully_allocated(&self) -> bool {
        self.lock().allocator.exhausted()
    }

    /// Park a fetched chunk for the requester.
    pub fn stash(&self, chunk: Chunk, data: String) {
        self.lock().ready.push_back(ReadyChunk { chunk, data });
    }

    /// Hand the oldest fetched chunk to the requester and acknowledge it.
    pub fn take_ready(&self) -> Option<ReadyChunk> {
        let ready = {
            let mut state = self.lock();
            let ready = state.ready.pop_front()?;
            if let Err(e) = state.allocator.push_data(&ready.chunk, ready.chunk.size) {
                tracing::warn!(transfer = %self.id, error = %e, "chunk acknowledgement rejected");
            }
            ready
        };
        self.wake.notify_one();
        Some(ready)
    }

    /// Check an upload chunk against what the owner already holds.
    ///
    /// `Ok(false)` means the window was already delivered.
    pub fn check_upload(&self, chunk: &Chunk) -> Result<bool, ChunkError> {
        self.lock().ledger.check(chunk)
    }

    /// Record an upload chunk the owner acknowledged.
    pub fn commit_upload(&self, chunk: &Chunk) -> Result<bool, ChunkError> {
        self.lock().ledger.commit(chunk)
    }

    /// Reserve one of the transfer's outstanding upload windows.
    ///
    /// Waits while the window is full. `None` once the transfer is closed.
    pub async fn reserve(&self) -> Option<OwnedSemaphorePermit> {
        self.window.clone().acquire_owned().await.ok()
    }

    /// True once every byte reached its destination.
    pub fn finished(&self) -> bool {
        let state = self.lock();
        match self.kind {
            TransferKind::Download => state.allocator.finished(),
            TransferKind::Upload => state.ledger.finished(),
        }
    }

    /// Mark the transfer as failed.
    pub fn fail(&self, reason: impl Into<String>) {
        self.lock().failed = Some(reason.into());
        self.wake.notify_one();
    }

    /// Failure reason, if any.
    pub fn failure(&self) -> Option<String> {
        self.lock().failed.clone()
    }

    /// Wait until a chunk is acknowledged.
    pub async fn acknowledged(&self) {
        self.wake.notified().await;
    }

    /// Remember the task fetching chunks so shutdown can stop it.
    pub fn set_pump(&self, pump: JoinHandle<()>) {
        let previous = self
            .pump
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(pump);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TransferState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Component for TransferComponent {
    fn init(&self, _owner: &Weak<Entity>) {
        tracing::debug!(transfer = %self.id, kind = ?self.kind, "transfer started");
    }

    fn shutdown(&self) {
        if let Some(pump) = self
            .pump
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            pump.abort();
        }
        self.wake.notify_waiters();
        self.window.close();
        tracing::debug!(transfer = %self.id, "transfer closed");
    }

    fn valid(&self) -> bool {
        self.lock().failed.is_none()
    }
}

impl std::fmt::Debug for TransferComponent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("TransferComponent")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("size", &state.allocator.size())
            .field(
                "committed",
                &match self.kind {
                    TransferKind::Download => state.allocator.committed(),
                    TransferKind::Upload => state.ledger.committed(),
                },
            )
            .field("ready", &state.ready.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn upload(size: u64, max_chunks: usize) -> TransferComponent {
        TransferComponent::new(
            TransferKind::Upload,
            ClientId::random(),
            ClientId::random(),
            "opaque".to_string(),
            ChunkAllocator::new(size, 64, max_chunks),
        )
    }

    #[tokio::test]
    async fn upload_window_is_bounded() {
        let transfer = upload(1000, 2);
        let first = transfer.reserve().await.unwrap();
        let _second = transfer.reserve().await.unwrap();
        let blocked = tokio::time::timeout(Duration::from_millis(50), transfer.reserve()).await;
        assert!(blocked.is_err());

        drop(first);
        assert!(transfer.reserve().await.is_some());
    }

    #[tokio::test]
    async fn closed_upload_refuses_reservations() {
        let transfer = upload(1000, 1);
        let _held = transfer.reserve().await.unwrap();
        transfer.shutdown();
        assert!(transfer.reserve().await.is_none());
    }

    #[test]
    fn upload_finishes_on_coverage_not_byte_count() {
        let transfer = upload(150, 4);
        assert_eq!(transfer.commit_upload(&Chunk::new(0, 100)), Ok(true));
        assert_eq!(transfer.commit_upload(&Chunk::new(0, 100)), Ok(false));
        assert!(!transfer.finished());
        assert_eq!(transfer.commit_upload(&Chunk::new(100, 50)), Ok(true));
        assert!(transfer.finished());
    }
}
