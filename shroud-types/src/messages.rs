//! Application payloads carried in [`Envelope::data`](crate::Envelope).
//!
//! Payloads exchanged between group members are group-encrypted JSON. The
//! few payloads a router produces or consumes itself (handshake key, join
//! details, group listing) travel under the session layer only.

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};

use crate::{ClientId, GroupId, WireError};

/// Token a client sends to open a handshake.
pub const HANDSHAKE_GREETING: &str = "shroud/1";

/// Serialize a payload to JSON text.
pub fn encode<T: Serialize>(payload: &T) -> Result<String, WireError> {
    Ok(serde_json::to_string(payload)?)
}

/// Parse a payload from JSON text.
pub fn decode<T: for<'de> Deserialize<'de>>(text: &str) -> Result<T, WireError> {
    Ok(serde_json::from_str(text)?)
}

/// Handshake reply: the session key the router generated.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeKey {
    /// Hex-encoded session key bytes.
    pub key: String,
}

impl std::fmt::Debug for HandshakeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandshakeKey")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// Identity a client announces on join.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRequest {
    /// Stable client id.
    pub client: ClientId,
    /// Display name.
    pub name: String,
    /// Group derived from the client's artifact.
    pub group: GroupId,
}

/// A group member as the router describes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    /// Client id.
    pub id: ClientId,
    /// Display name.
    pub name: String,
}

/// Reply to a group listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupListing {
    /// Members other than the caller.
    pub clients: Vec<ClientInfo>,
}

/// A shared file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Id the owner resolves back to a path.
    pub id: String,
    /// File name without directories.
    pub name: String,
    /// Size in bytes.
    pub size: u64,
}

/// A shared folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderEntry {
    /// Id the owner resolves back to a path.
    pub id: String,
    /// Folder name without parents.
    pub name: String,
}

/// Keyword search, group-encrypted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Case-insensitive substring to match against file names.
    pub keyword: String,
}

/// Matches from one member, group-encrypted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResults {
    /// Matching files.
    pub files: Vec<FileEntry>,
}

/// Browse a member's share, group-encrypted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowseRequest {
    /// Folder id to list, or the share roots when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder: Option<String>,
}

/// Folder listing, group-encrypted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowseListing {
    /// Subfolders.
    pub folders: Vec<FolderEntry>,
    /// Files.
    pub files: Vec<FileEntry>,
}

/// Which file a download wants, group-encrypted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRequest {
    /// File id from a search result or listing.
    pub file: String,
}

/// What an upload offers, group-encrypted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadOffer {
    /// File name the receiver should create.
    pub name: String,
    /// Size in bytes.
    pub size: u64,
}

/// Raw bytes of one chunk, group-encrypted.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChunk {
    /// Base64 of the chunk bytes.
    pub data: String,
}

impl FileChunk {
    /// Wrap raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            data: STANDARD.encode(bytes),
        }
    }

    /// Recover the raw bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        Ok(STANDARD.decode(&self.data)?)
    }
}

impl std::fmt::Debug for FileChunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileChunk")
            .field("data", &format!("[{} chars]", self.data.len()))
            .finish()
    }
}
