//! Index block node format.
//!
//! Index blocks are the nodes of both B-trees in the file. Each entry maps a
//! 64-bit key to a target position and optionally carries a child pointer to
//! the subtree of keys smaller than it; keys larger than every entry live
//! under the tail pointer. A leaf has no children and a zero tail.
//!
//! ```text
//! [entry_count: 4] { [key: 8][target: 8][child: 8] } * n [tail: 8]
//! ```

#![allow(clippy::cast_possible_truncation)]

use crate::storage::block::{BlockType, BlockWriter, RawBlock, on_disk_size};
use crate::storage::error::StorageError;

/// Encoded size of one entry.
pub const ENTRY_SIZE: u32 = 24;

/// Zero is never a valid block position (the header lives there).
pub const NO_BLOCK: u64 = 0;

/// A single key in an index block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub key: i64,
    /// Data block position (main index) or free range start (free list).
    pub target: u64,
    /// Subtree of keys smaller than `key`, or [`NO_BLOCK`] in a leaf.
    pub child: u64,
}

impl IndexEntry {
    #[must_use]
    pub const fn leaf(key: i64, target: u64) -> Self {
        Self {
            key,
            target,
            child: NO_BLOCK,
        }
    }
}

/// B-tree node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexBlock {
    /// Entries in ascending key order.
    pub entries: Vec<IndexEntry>,
    /// Subtree of keys greater than every entry, or [`NO_BLOCK`] in a leaf.
    pub tail: u64,
}

impl IndexBlock {
    /// Empty leaf, used for fresh roots.
    #[must_use]
    pub const fn new_leaf() -> Self {
        Self {
            entries: Vec::new(),
            tail: NO_BLOCK,
        }
    }

    #[must_use]
    pub const fn is_leaf(&self) -> bool {
        self.tail == NO_BLOCK
    }

    /// Binary search for `key`.
    ///
    /// `Ok(i)` is the entry holding the key, `Err(i)` the slot where it would
    /// be inserted (and the child to descend into).
    pub fn search(&self, key: i64) -> Result<usize, usize> {
        self.entries.binary_search_by_key(&key, |e| e.key)
    }

    /// Child pointer for slot `index`: the entry's child, or the tail for the
    /// slot past the last entry.
    #[must_use]
    pub fn child_at(&self, index: usize) -> u64 {
        self.entries.get(index).map_or(self.tail, |e| e.child)
    }

    /// Repoint slot `index` to `child`, returning the previous pointer.
    pub fn set_child(&mut self, index: usize, child: u64) -> u64 {
        match self.entries.get_mut(index) {
            Some(entry) => std::mem::replace(&mut entry.child, child),
            None => std::mem::replace(&mut self.tail, child),
        }
    }

    /// Declared body size for nodes of the given branch factor.
    #[must_use]
    pub const fn body_size(branch_factor: usize) -> u32 {
        4 + ENTRY_SIZE * branch_factor as u32 + 8
    }

    /// On-disk length of nodes of the given branch factor.
    #[must_use]
    pub const fn disk_size(branch_factor: usize) -> u64 {
        on_disk_size(Self::body_size(branch_factor))
    }

    pub fn encode(&self, branch_factor: usize) -> Result<Vec<u8>, StorageError> {
        let mut writer = BlockWriter::new(BlockType::Index, Self::body_size(branch_factor));
        writer.put_u32(self.entries.len() as u32);
        for entry in &self.entries {
            writer.put_i64(entry.key);
            writer.put_u64(entry.target);
            writer.put_u64(entry.child);
        }
        writer.put_u64(self.tail);
        writer.finish()
    }

    pub fn decode(raw: &RawBlock, branch_factor: usize) -> Result<Self, StorageError> {
        if raw.declared != Self::body_size(branch_factor) {
            return Err(StorageError::corrupted_block(
                "index",
                raw.pos,
                format!(
                    "declared size {} does not match branch factor {branch_factor}",
                    raw.declared
                ),
            ));
        }
        let mut reader = raw.reader();
        let count = reader.u32()? as usize;
        if count > branch_factor {
            return Err(StorageError::corrupted_block(
                "index",
                raw.pos,
                format!("{count} entries exceed branch factor {branch_factor}"),
            ));
        }
        let mut entries = Vec::with_capacity(count + 1);
        for _ in 0..count {
            entries.push(IndexEntry {
                key: reader.i64()?,
                target: reader.u64()?,
                child: reader.u64()?,
            });
        }
        let tail = reader.u64()?;
        reader.finish()?;
        Ok(Self { entries, tail })
    }
}
