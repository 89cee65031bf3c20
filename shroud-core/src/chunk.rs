//! Flow-controlled chunk allocation.
//!
//! A transfer of `size` bytes is cut into `chunk_size` windows. At most
//! `max_outstanding` windows may be handed out and not yet acknowledged.
//! Acknowledgements may arrive in any order; every window carries its own
//! offset, so the receiver writes bytes where they belong.
//!
//! The allocator is not synchronized. Callers hold the owning entity's scope
//! (see [`Entity::lock`](crate::Entity::lock)) around pop/push sequences.

use std::collections::BTreeMap;

use shroud_types::Chunk;
use thiserror::Error;

/// Default window size (64 KiB).
pub const DEFAULT_CHUNK_SIZE: u64 = 64 * 1024;

/// Default number of unacknowledged windows.
pub const DEFAULT_MAX_OUTSTANDING: usize = 4;

/// Chunk bookkeeping errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChunkError {
    /// The chunk was never handed out, or was already acknowledged.
    #[error("chunk at offset {0} is not outstanding")]
    NotOutstanding(u64),

    /// The chunk does not match the window that was handed out.
    #[error("chunk at offset {offset} has size {got}, expected {expected}")]
    SizeMismatch {
        /// Chunk offset.
        offset: u64,
        /// Size that was allocated.
        expected: u64,
        /// Size that arrived.
        got: u64,
    },

    /// The chunk reaches past the end of the transfer.
    #[error("chunk at offset {offset} ends past {size}")]
    PastEnd {
        /// Chunk offset.
        offset: u64,
        /// Transfer size.
        size: u64,
    },

    /// The chunk partly overlaps bytes already committed.
    #[error("chunk at offset {0} overlaps committed data")]
    Overlap(u64),
}

/// Splits a byte range into flow-controlled chunks.
#[derive(Debug, Clone)]
pub struct ChunkAllocator {
    size: u64,
    chunk_size: u64,
    max_outstanding: usize,
    next_offset: u64,
    outstanding: BTreeMap<u64, u64>,
    committed: u64,
    blocks: u64,
}

impl ChunkAllocator {
    /// Allocator for `size` bytes. Zero limits are raised to one.
    pub fn new(size: u64, chunk_size: u64, max_outstanding: usize) -> Self {
        Self {
            size,
            chunk_size: chunk_size.max(1),
            max_outstanding: max_outstanding.max(1),
            next_offset: 0,
            outstanding: BTreeMap::new(),
            committed: 0,
            blocks: 0,
        }
    }

    /// Allocator with the default window size and outstanding limit.
    pub fn with_defaults(size: u64) -> Self {
        Self::new(size, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_OUTSTANDING)
    }

    /// Hand out the next window, or `None` when at capacity or fully allocated.
    pub fn pop_chunk(&mut self) -> Option<Chunk> {
        if !self.has_capacity() || self.next_offset >= self.size {
            return None;
        }

        let len = self.chunk_size.min(self.size - self.next_offset);
        let chunk = Chunk::new(self.next_offset, len);
        self.next_offset += len;
        self.outstanding.insert(chunk.offset, len);
        Some(chunk)
    }

    /// Acknowledge a window whose `len` bytes have been written.
    pub fn push_data(&mut self, chunk: &Chunk, len: u64) -> Result<(), ChunkError> {
        let expected = *self
            .outstanding
            .get(&chunk.offset)
            .ok_or(ChunkError::NotOutstanding(chunk.offset))?;
        if chunk.size != expected || len != expected {
            return Err(ChunkError::SizeMismatch {
                offset: chunk.offset,
                expected,
                got: len.min(chunk.size),
            });
        }

        self.outstanding.remove(&chunk.offset);
        self.committed += expected;
        self.blocks += 1;
        Ok(())
    }

    /// Put an outstanding window back so it is handed out again.
    ///
    /// Used when a peer fails to deliver a window. Only the most recent
    /// window can be rewound; older ones stay outstanding.
    pub fn rewind(&mut self, chunk: &Chunk) -> bool {
        if chunk.end() != self.next_offset || self.outstanding.remove(&chunk.offset).is_none() {
            return false;
        }
        self.next_offset = chunk.offset;
        true
    }

    /// True while another window may be handed out.
    pub fn has_capacity(&self) -> bool {
        self.outstanding.len() < self.max_outstanding
    }

    /// True once every window has been handed out.
    pub fn exhausted(&self) -> bool {
        self.next_offset >= self.size
    }

    /// True once every byte has been acknowledged.
    pub fn finished(&self) -> bool {
        self.committed == self.size
    }

    /// Total bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Window size.
    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Most windows handed out at once.
    pub fn max_outstanding(&self) -> usize {
        self.max_outstanding
    }

    /// Handed out but not yet acknowledged.
    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }

    /// Bytes acknowledged so far.
    pub fn committed(&self) -> u64 {
        self.committed
    }

    /// Windows acknowledged so far.
    pub fn blocks(&self) -> u64 {
        self.blocks
    }

    /// Number of windows the whole transfer takes.
    pub fn total_chunks(&self) -> u64 {
        self.size.div_ceil(self.chunk_size)
    }

    /// Completion ratio in `0.0..=1.0`.
    pub fn progress(&self) -> f64 {
        if self.size == 0 {
            1.0
        } else {
            self.committed as f64 / self.size as f64
        }
    }
}

/// Receiver-side record of which windows of a transfer have landed.
///
/// The sender picks the windows. A window committed twice counts once, and
/// the transfer is finished only when the committed windows cover every byte.
#[derive(Debug, Clone, Default)]
pub struct ChunkLedger {
    size: u64,
    windows: BTreeMap<u64, u64>,
    committed: u64,
}

impl ChunkLedger {
    /// Ledger for a transfer of `size` bytes.
    pub fn new(size: u64) -> Self {
        Self {
            size,
            windows: BTreeMap::new(),
            committed: 0,
        }
    }

    /// Check that `chunk` could be committed without recording it.
    ///
    /// Returns `Ok(false)` for an exact repeat of a committed window.
    pub fn check(&self, chunk: &Chunk) -> Result<bool, ChunkError> {
        if chunk.end() > self.size {
            return Err(ChunkError::PastEnd {
                offset: chunk.offset,
                size: self.size,
            });
        }
        if self.windows.get(&chunk.offset) == Some(&chunk.size) {
            return Ok(false);
        }
        let before = self.windows.range(..chunk.offset).next_back();
        if let Some((&offset, &len)) = before {
            if offset + len > chunk.offset {
                return Err(ChunkError::Overlap(chunk.offset));
            }
        }
        if let Some((&offset, _)) = self.windows.range(chunk.offset..).next() {
            if offset < chunk.end() {
                return Err(ChunkError::Overlap(chunk.offset));
            }
        }
        Ok(true)
    }

    /// Record `chunk`. Returns `Ok(false)` when it was already committed.
    pub fn commit(&mut self, chunk: &Chunk) -> Result<bool, ChunkError> {
        let fresh = self.check(chunk)?;
        if fresh && chunk.size > 0 {
            self.windows.insert(chunk.offset, chunk.size);
            self.committed += chunk.size;
        }
        Ok(fresh)
    }

    /// True once the committed windows cover the whole transfer.
    pub fn finished(&self) -> bool {
        self.committed == self.size
    }

    /// Bytes committed so far.
    pub fn committed(&self) -> u64 {
        self.committed
    }

    /// Total bytes.
    pub fn size(&self) -> u64 {
        self.size
    }
}
