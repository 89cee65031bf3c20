//! Request side of every command.
//!
//! A [`Client`] is a joined session on one router. Application payloads are
//! sealed with the group key before they go into the envelope, so the router
//! sees only routing fields (kind, ids, chunk windows, sizes).

use std::sync::Arc;

use shroud_core::{codec, Group, Transport};
use shroud_types::messages::{
    self, BrowseListing, BrowseRequest, ClientInfo, DownloadRequest, FileChunk, GroupListing,
    JoinRequest, SearchRequest, UploadOffer,
};
use shroud_types::{Chunk, ClientId, Envelope, MessageKind, SearchId, TransferId};

use crate::error::{ClientError, Result};
use crate::link::Link;

/// A download the router accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTicket {
    /// Transfer id used to collect chunks.
    pub id: TransferId,
    /// Member serving the file.
    pub owner: ClientId,
    /// File size in bytes.
    pub size: u64,
}

/// A joined session on one router.
#[derive(Debug)]
pub struct Client {
    link: Link,
    id: ClientId,
    name: String,
    group: Group,
}

impl Client {
    /// Announce identity and group on an established link.
    pub async fn join(link: Link, id: ClientId, name: &str, group: Group) -> Result<Self> {
        let join = JoinRequest {
            client: id.clone(),
            name: name.to_string(),
            group: group.id.clone(),
        };
        let envelope = Envelope::request(MessageKind::Join).with_data(messages::encode(&join)?);
        link.call(&envelope).await?;
        tracing::info!(client = %id, group = %group.id, "joined");
        Ok(Self {
            link,
            id,
            name: name.to_string(),
            group,
        })
    }

    /// Our client id.
    pub fn id(&self) -> &ClientId {
        &self.id
    }

    /// Our display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Group we joined.
    pub fn group(&self) -> &Group {
        &self.group
    }

    /// Command connection.
    pub fn link(&self) -> &Link {
        &self.link
    }

    /// Turn a fresh connection into our tunnel.
    ///
    /// After the reply the router issues requests on this connection; answer
    /// them with [`crate::Responder::serve`].
    pub async fn open_tunnel(&self, transport: Arc<dyn Transport>) -> Result<Link> {
        let tunnel = Link::attach(transport, self.link.session().clone());
        tunnel.call(&Envelope::request(MessageKind::Tunnel)).await?;
        tracing::info!(client = %self.id, "tunnel open");
        Ok(tunnel)
    }

    /// Keep the session alive.
    pub async fn ping(&self) -> Result<()> {
        self.link.call(&Envelope::request(MessageKind::Ping)).await?;
        Ok(())
    }

    /// Other members of our group on this router.
    pub async fn group_members(&self) -> Result<Vec<ClientInfo>> {
        let reply = self.link.call_for(&Envelope::request(MessageKind::Group)).await?;
        let listing: GroupListing = messages::decode(reply.require_data()?)?;
        Ok(listing.clients)
    }

    /// Start a group-wide search. Results arrive on the tunnel tagged with
    /// the returned id.
    pub async fn search(&self, keyword: &str) -> Result<SearchId> {
        let request = SearchRequest {
            keyword: keyword.to_string(),
        };
        let envelope = Envelope::request(MessageKind::Search)
            .with_data(codec::seal_payload(&request, &self.group.key)?);
        let reply = self.link.call_for(&envelope).await?;
        let id = reply
            .id
            .ok_or_else(|| ClientError::protocol("search reply has no id"))?;
        Ok(SearchId::new(id))
    }

    /// List a member's shared folder (`None` for its share roots).
    pub async fn browse(&self, member: &ClientId, folder: Option<&str>) -> Result<BrowseListing> {
        let request = BrowseRequest {
            folder: folder.map(str::to_string),
        };
        let envelope = Envelope::request(MessageKind::Browse)
            .with_client(member.clone())
            .with_data(codec::seal_payload(&request, &self.group.key)?);
        let reply = self.link.call_for(&envelope).await?;
        Ok(codec::open_payload(&reply, &self.group.key)?)
    }

    /// Ask for a file by id.
    ///
    /// Without an `owner` the router tries the members that answered our
    /// latest search.
    pub async fn start_download(&self, owner: Option<&ClientId>, file: &str) -> Result<DownloadTicket> {
        let request = DownloadRequest {
            file: file.to_string(),
        };
        let mut envelope = Envelope::request(MessageKind::Download)
            .with_data(codec::seal_payload(&request, &self.group.key)?);
        if let Some(owner) = owner {
            envelope = envelope.with_client(owner.clone());
        }

        let reply = self.link.call_for(&envelope).await?;
        match (reply.id, reply.client, reply.size) {
            (Some(id), Some(owner), Some(size)) => Ok(DownloadTicket {
                id: TransferId::new(id),
                owner,
                size,
            }),
            _ => Err(ClientError::protocol("download reply is incomplete")),
        }
    }

    /// Collect the next chunk of a download, if the router has one ready.
    pub async fn next_chunk(&self, id: &TransferId) -> Result<Option<(Chunk, Vec<u8>)>> {
        let envelope = Envelope::request(MessageKind::Download).with_id(id.as_str());
        let Some(reply) = self.link.call(&envelope).await? else {
            return Ok(None);
        };
        let Some(chunk) = reply.chunk else {
            return Ok(None);
        };
        let payload: FileChunk = codec::open_payload(&reply, &self.group.key)?;
        let bytes = payload.to_bytes()?;
        if bytes.len() as u64 != chunk.size {
            return Err(ClientError::protocol(format!(
                "chunk at {} carries {} bytes, expected {}",
                chunk.offset,
                bytes.len(),
                chunk.size
            )));
        }
        Ok(Some((chunk, bytes)))
    }

    /// Offer `size` bytes named `name` to `member`.
    pub async fn offer_upload(&self, member: &ClientId, name: &str, size: u64) -> Result<TransferId> {
        let offer = UploadOffer {
            name: name.to_string(),
            size,
        };
        let envelope = Envelope::request(MessageKind::Upload)
            .with_client(member.clone())
            .with_size(size)
            .with_data(codec::seal_payload(&offer, &self.group.key)?);
        let reply = self.link.call_for(&envelope).await?;
        let id = reply
            .id
            .ok_or_else(|| ClientError::protocol("upload reply has no id"))?;
        Ok(TransferId::new(id))
    }

    /// Send one chunk of an accepted upload.
    pub async fn send_chunk(&self, id: &TransferId, chunk: Chunk, bytes: &[u8]) -> Result<()> {
        let envelope = Envelope::request(MessageKind::Upload)
            .with_id(id.as_str())
            .with_chunk(chunk)
            .with_data(codec::seal_payload(&FileChunk::from_bytes(bytes), &self.group.key)?);
        self.link.call(&envelope).await?;
        Ok(())
    }

    /// Leave the router. The connection is closed afterwards.
    pub async fn quit(&self) -> Result<()> {
        let result = self.link.call(&Envelope::request(MessageKind::Quit)).await;
        self.link.close().await;
        tracing::info!(client = %self.id, "quit");
        result.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shroud_core::{MockTransport, Session};
    use shroud_types::messages::FileEntry;
    use shroud_types::{HttpResponse, StatusCode};

    const ARTIFACT: &[u8] = b"the shared secret picture, in bytes";

    fn client(mock: &MockTransport) -> (Client, Session) {
        let session = Session::generate().unwrap();
        let link = Link::attach(Arc::new(mock.clone()), session.clone());
        let client = Client {
            link,
            id: ClientId::random(),
            name: "alice".to_string(),
            group: Group::from_artifact(ARTIFACT),
        };
        (client, session)
    }

    fn reply(mock: &MockTransport, session: &Session, envelope: Envelope) {
        mock.queue_response(codec::response(&envelope, &session.key).unwrap());
    }

    fn sent(mock: &MockTransport, session: &Session) -> Envelope {
        codec::open(&mock.last_request().unwrap().body, &session.key).unwrap()
    }

    // ===== Join / tunnel =====

    #[tokio::test]
    async fn join_sends_identity_in_clear_json() {
        let mock = MockTransport::new();
        let session = Session::generate().unwrap();
        reply(&mock, &session, Envelope::response(MessageKind::Join));
        let link = Link::attach(Arc::new(mock.clone()), session.clone());
        let group = Group::from_artifact(ARTIFACT);
        let id = ClientId::random();

        let client = Client::join(link, id.clone(), "alice", group.clone()).await.unwrap();
        assert_eq!(client.id(), &id);

        let join: JoinRequest = messages::decode(sent(&mock, &session).data.as_deref().unwrap()).unwrap();
        assert_eq!(join.client, id);
        assert_eq!(join.group, group.id);
    }

    #[tokio::test]
    async fn tunnel_reuses_session_on_new_connection() {
        let (client, session) = client(&MockTransport::new());
        let tunnel_mock = MockTransport::new();
        reply(&tunnel_mock, &session, Envelope::response(MessageKind::Tunnel));

        let tunnel = client.open_tunnel(Arc::new(tunnel_mock.clone())).await.unwrap();
        assert_eq!(tunnel.session().id, session.id);
        assert_eq!(sent(&tunnel_mock, &session).kind, MessageKind::Tunnel);
    }

    // ===== Group-sealed payloads =====

    #[tokio::test]
    async fn search_keyword_is_group_sealed() {
        let mock = MockTransport::new();
        let (client, session) = client(&mock);
        reply(&mock, &session, Envelope::response(MessageKind::Search).with_id("s1"));

        let id = client.search("blue train").await.unwrap();
        assert_eq!(id.as_str(), "s1");

        let envelope = sent(&mock, &session);
        assert!(!envelope.data.as_deref().unwrap().contains("blue"));
        let request: SearchRequest = codec::open_payload(&envelope, &client.group().key).unwrap();
        assert_eq!(request.keyword, "blue train");

        let stranger = Group::from_artifact(b"some other picture entirely......");
        assert!(codec::open_payload::<SearchRequest>(&envelope, &stranger.key).is_err());
    }

    #[tokio::test]
    async fn browse_opens_listing() {
        let mock = MockTransport::new();
        let (client, session) = client(&mock);
        let listing = BrowseListing {
            folders: Vec::new(),
            files: vec![FileEntry {
                id: "f".to_string(),
                name: "a.txt".to_string(),
                size: 3,
            }],
        };
        let data = codec::seal_payload(&listing, &client.group().key).unwrap();
        reply(&mock, &session, Envelope::response(MessageKind::Browse).with_data(data));

        let bob = ClientId::random();
        let got = client.browse(&bob, None).await.unwrap();
        assert_eq!(got, listing);
        assert_eq!(sent(&mock, &session).client, Some(bob));
    }

    // ===== Transfers =====

    #[tokio::test]
    async fn download_ticket_and_chunks() {
        let mock = MockTransport::new();
        let (client, session) = client(&mock);
        let owner = ClientId::random();
        reply(
            &mock,
            &session,
            Envelope::response(MessageKind::Download)
                .with_id("t1")
                .with_client(owner.clone())
                .with_size(5),
        );
        let ticket = client.start_download(None, "file-id").await.unwrap();
        assert_eq!(ticket.size, 5);
        assert_eq!(ticket.owner, owner);
        assert!(sent(&mock, &session).client.is_none());

        reply(&mock, &session, Envelope::response(MessageKind::Download).with_id("t1"));
        assert!(client.next_chunk(&ticket.id).await.unwrap().is_none());

        let data = codec::seal_payload(&FileChunk::from_bytes(b"hello"), &client.group().key).unwrap();
        reply(
            &mock,
            &session,
            Envelope::response(MessageKind::Download)
                .with_id("t1")
                .with_chunk(Chunk::new(0, 5))
                .with_data(data),
        );
        let (chunk, bytes) = client.next_chunk(&ticket.id).await.unwrap().unwrap();
        assert_eq!(chunk, Chunk::new(0, 5));
        assert_eq!(bytes, b"hello");
    }

    #[tokio::test]
    async fn short_chunk_is_rejected() {
        let mock = MockTransport::new();
        let (client, session) = client(&mock);
        let data = codec::seal_payload(&FileChunk::from_bytes(b"hi"), &client.group().key).unwrap();
        reply(
            &mock,
            &session,
            Envelope::response(MessageKind::Download)
                .with_id("t1")
                .with_chunk(Chunk::new(0, 5))
                .with_data(data),
        );
        assert!(client.next_chunk(&TransferId::new("t1")).await.is_err());
    }

    #[tokio::test]
    async fn upload_offer_shows_size_hides_name() {
        let mock = MockTransport::new();
        let (client, session) = client(&mock);
        reply(&mock, &session, Envelope::response(MessageKind::Upload).with_id("u1"));

        let bob = ClientId::random();
        let id = client.offer_upload(&bob, "secret-plans.pdf", 42).await.unwrap();
        assert_eq!(id.as_str(), "u1");

        let envelope = sent(&mock, &session);
        assert_eq!(envelope.size, Some(42));
        assert!(!envelope.data.as_deref().unwrap().contains("secret-plans"));
    }

    #[tokio::test]
    async fn busy_router_is_reported() {
        let mock = MockTransport::new();
        let (client, _session) = client(&mock);
        mock.queue_response(HttpResponse::new(StatusCode::ServiceUnavailable));
        let err = client.start_download(None, "f").await.unwrap_err();
        assert!(err.is_busy());
    }

    #[tokio::test]
    async fn quit_closes_link() {
        let mock = MockTransport::new();
        let (client, session) = client(&mock);
        reply(&mock, &session, Envelope::response(MessageKind::Quit));
        client.quit().await.unwrap();
        assert!(!mock.is_connected());
    }
}
