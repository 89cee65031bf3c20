//! Identity types for shroud.
//!
//! Every id on the wire is a 128-bit random value rendered as 32 lowercase
//! hex characters. The exception is [`GroupId`], which is derived from the
//! group key and never generated.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

macro_rules! hex_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new random id.
            pub fn random() -> Self {
                Self(uuid::Uuid::new_v4().simple().to_string())
            }

            /// Wrap an id received from the wire.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the id as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// True when the id carries no characters.
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let short = self.0.get(..8).unwrap_or(&self.0);
                write!(f, "{}({})", stringify!($name), short)
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }
    };
}

hex_id! {
    /// Routing token issued by the router during handshake.
    ///
    /// Travels in the `session` cookie of every later request.
    SessionId
}

hex_id! {
    /// Stable identity a client announces when it joins.
    ClientId
}

hex_id! {
    /// Identity of an entity held in a router index.
    EntityId
}

hex_id! {
    /// Identifier of an in-flight download or upload.
    TransferId
}

hex_id! {
    /// Identifier the router hands out for one search fan-out.
    SearchId
}

hex_id! {
    /// Identifier of a trust domain.
    ///
    /// Derived from the group key, so two participants holding the same
    /// artifact compute the same id without exchanging it.
    GroupId
}

impl GroupId {
    /// Derive the group id from group key bytes (lowercase hex SHA-256).
    pub fn from_key(key: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(key)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_ids_are_32_hex_chars() {
        let id = SessionId::random();
        assert_eq!(id.as_str().len(), 32);
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn random_ids_differ() {
        assert_ne!(ClientId::random(), ClientId::random());
    }

    #[test]
    fn group_id_is_deterministic() {
        let a = GroupId::from_key(b"0123456789abcdef");
        let b = GroupId::from_key(b"0123456789abcdef");
        let c = GroupId::from_key(b"fedcba9876543210");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn debug_is_truncated() {
        let id = TransferId::new("0123456789abcdef0123456789abcdef");
        assert_eq!(format!("{:?}", id), "TransferId(01234567)");
    }

    #[test]
    fn debug_handles_short_ids() {
        let id = SearchId::new("abc");
        assert_eq!(format!("{:?}", id), "SearchId(abc)");
    }

    #[test]
    fn serde_is_transparent() {
        let id = ClientId::new("deadbeef");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"deadbeef\"");
        let back: ClientId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
