//! Envelope - the routing layer every hop can read.
//!
//! The envelope is serialized to JSON and then session-encrypted into the
//! frame body. A relaying router decrypts the session layer, so it sees the
//! kind, action and routing fields. The `data` field holds the application
//! payload, which is group-encrypted by the endpoints and stays opaque to a
//! router outside the group.

use serde::{Deserialize, Serialize};

use crate::{ClientId, WireError};

/// Command discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Obtain a session id and session key.
    Handshake,
    /// Announce client identity and group membership.
    Join,
    /// Hand a long-lived connection to the router for inbound work.
    Tunnel,
    /// Keep the session alive.
    Ping,
    /// List the other members of the caller's group.
    Group,
    /// Fan a keyword search out to the group.
    Search,
    /// List a member's shared folder.
    Browse,
    /// Pull a file from a member in chunks.
    Download,
    /// Push a file to a member in chunks.
    Upload,
    /// Leave the router.
    Quit,
}

/// Direction of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Initiating side.
    Request,
    /// Answering side.
    Response,
}

/// An `(offset, size)` window of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Chunk {
    /// Byte offset in the file.
    pub offset: u64,
    /// Length of the window in bytes.
    pub size: u64,
}

impl Chunk {
    /// Create a chunk descriptor.
    pub fn new(offset: u64, size: u64) -> Self {
        Self { offset, size }
    }

    /// One past the last byte covered.
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }

    /// True when the two windows share at least one byte.
    pub fn overlaps(&self, other: &Chunk) -> bool {
        self.offset < other.end() && other.offset < self.end()
    }
}

/// The routing envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Command discriminator.
    pub kind: MessageKind,
    /// Request or response.
    pub action: Action,
    /// Search or transfer id this message belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Client the command targets, or the client a relayed reply came from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<ClientId>,
    /// Total transfer size, visible so a router can allocate chunks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Chunk window carried by a transfer step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk: Option<Chunk>,
    /// Application payload (group-encrypted unless router-originated).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl Envelope {
    /// Create an envelope with no routing fields.
    pub fn new(kind: MessageKind, action: Action) -> Self {
        Self {
            kind,
            action,
            id: None,
            client: None,
            size: None,
            chunk: None,
            data: None,
        }
    }

    /// Shorthand for a request envelope.
    pub fn request(kind: MessageKind) -> Self {
        Self::new(kind, Action::Request)
    }

    /// Shorthand for a response envelope.
    pub fn response(kind: MessageKind) -> Self {
        Self::new(kind, Action::Response)
    }

    /// Set the search or transfer id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the target or source client.
    pub fn with_client(mut self, client: ClientId) -> Self {
        self.client = Some(client);
        self
    }

    /// Set the total transfer size.
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    /// Set the chunk window.
    pub fn with_chunk(mut self, chunk: Chunk) -> Self {
        self.chunk = Some(chunk);
        self
    }

    /// Set the application payload.
    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = Some(data.into());
        self
    }

    /// True when a non-empty payload is attached.
    pub fn has_data(&self) -> bool {
        self.data.as_deref().is_some_and(|d| !d.is_empty())
    }

    /// The payload, or an error naming the missing field.
    pub fn require_data(&self) -> Result<&str, WireError> {
        self.data
            .as_deref()
            .filter(|d| !d.is_empty())
            .ok_or(WireError::MissingField("data"))
    }

    /// Serialize to the JSON text that gets session-encrypted.
    pub fn to_wire(&self) -> Result<String, WireError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse the JSON text recovered from a session-decrypted body.
    pub fn from_wire(text: &str) -> Result<Self, WireError> {
        Ok(serde_json::from_str(text)?)
    }
}
