//! Session and group key components.
//!
//! Every message body is session-encrypted; the `data` field inside it is
//! additionally group-encrypted so only members sharing the same artifact
//! can read it.

use shroud_types::{GroupId, SessionId};

use crate::entity::Component;
use crate::key::{CryptoError, Key};

/// Session identity and the key negotiated at handshake.
#[derive(Debug, Clone, Default)]
pub struct Session {
    /// Session id carried in the `session` cookie.
    pub id: SessionId,
    /// Session key. Empty until the handshake completes.
    pub key: Key,
}

impl Session {
    /// Session with a known id and key.
    pub fn new(id: SessionId, key: Key) -> Self {
        Self { id, key }
    }

    /// Fresh router-side session: random id and random key.
    pub fn generate() -> Result<Self, CryptoError> {
        Ok(Self {
            id: SessionId::random(),
            key: Key::random()?,
        })
    }

    /// True once both id and key are present.
    pub fn established(&self) -> bool {
        !self.id.is_empty() && self.key.is_set()
    }

    /// Encrypt under the session key.
    pub fn encrypt(&self, text: &str) -> Result<String, CryptoError> {
        self.key.encrypt(text)
    }

    /// Decrypt under the session key.
    pub fn decrypt(&self, text: &str) -> Result<String, CryptoError> {
        self.key.decrypt(text)
    }
}

impl Component for Session {}

/// Group identity and the key folded from the shared artifact.
#[derive(Debug, Clone, Default)]
pub struct Group {
    /// Hex digest of the group key.
    pub id: GroupId,
    /// Group key.
    pub key: Key,
}

impl Group {
    /// Derive the group from artifact bytes.
    pub fn from_artifact(artifact: &[u8]) -> Self {
        let key = Key::from_artifact(artifact);
        let id = GroupId::from_key(key.as_bytes().unwrap_or_default());
        Self { id, key }
    }

    /// A group known only by id, as a router sees it.
    pub fn from_id(id: GroupId) -> Self {
        Self {
            id,
            key: Key::none(),
        }
    }

    /// Encrypt under the group key.
    pub fn encrypt(&self, text: &str) -> Result<String, CryptoError> {
        self.key.encrypt(text)
    }

    /// Decrypt under the group key.
    pub fn decrypt(&self, text: &str) -> Result<String, CryptoError> {
        self.key.decrypt(text)
    }
}

impl Component for Group {}
