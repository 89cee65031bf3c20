//! # shroud-core
//!
//! Building blocks shared by the shroud client and router.
//!
//! - [`Entity`] and [`Component`] - typed composition of per-connection state
//! - [`EntityMap`] and [`EntityListMap`] - concurrent indexes with idle eviction
//! - [`IdleComponent`] - expires an entity after a period without activity
//! - [`Key`], [`Session`], [`Group`] - the session and group encryption layers
//! - [`codec`] - sealing envelopes and payloads into frames
//! - [`ChunkAllocator`] and [`ChunkLedger`] - flow-controlled chunking of transfers
//! - [`Machine`] and [`StateHandler`] - queue-driven state machines
//! - [`Transport`] - framed connections, over TCP or in memory
//!
//! ## Design Philosophy
//!
//! Everything here is independent of the role a process plays. The router
//! and client crates compose these pieces into their own machines.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod chunk;
pub mod codec;
pub mod entity;
pub mod idle;
pub mod index;
pub mod key;
pub mod machine;
pub mod session;
pub mod state;
pub mod transport;

pub use chunk::{ChunkAllocator, ChunkError, ChunkLedger, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_OUTSTANDING};
pub use codec::CodecError;
pub use entity::{Component, Entity, EntityError};
pub use idle::IdleComponent;
pub use index::{EntityIndex, EntityListMap, EntityMap};
pub use key::{fold_artifact, CryptoError, Key, GROUP_SEED, IV, SESSION_KEY_SIZE};
pub use machine::{Machine, StateHandler, DEFAULT_HEARTBEAT, DEFAULT_RESTART_DELAY};
pub use session::{Group, Session};
pub use state::{State, StateQueue, Status};
pub use transport::{MockTransport, StreamTransport, Transport, TransportError, DEFAULT_MAX_BODY};
