//! Header block structure and serialization.
//!
//! The header block occupies offset 0 and records where both trees start
//! plus the branch factor the file was built with.

use crate::storage::block::{BlockType, BlockWriter, RawBlock, on_disk_size};
use crate::storage::error::StorageError;

/// Position of the header block.
pub const HEADER_POS: u64 = 0;

/// Declared body size: two root positions and the branch factor.
pub const HEADER_BODY_SIZE: u32 = 8 + 8 + 2;

/// On-disk length of the header block.
pub const HEADER_DISK_SIZE: u64 = on_disk_size(HEADER_BODY_SIZE);

/// The header block contains all metadata about the cache file.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct HeaderBlock {
    /// Root of the main key index.
    pub main_root: u64,
    /// Root of the free-list tree.
    pub free_list_root: u64,
    /// Maximum entries per index block.
    pub branch_factor: u16,
}

impl HeaderBlock {
    /// Header for a file whose roots have not been allocated yet.
    #[must_use]
    pub const fn new(branch_factor: u16) -> Self {
        Self {
            main_root: 0,
            free_list_root: 0,
            branch_factor,
        }
    }

    /// Encode into a full on-disk block image.
    pub fn encode(&self) -> Result<Vec<u8>, StorageError> {
        let mut writer = BlockWriter::new(BlockType::Header, HEADER_BODY_SIZE);
        writer.put_u64(self.main_root);
        writer.put_u64(self.free_list_root);
        writer.put_u16(self.branch_factor);
        writer.finish()
    }

    /// Decode from a raw block and validate the root positions.
    pub fn decode(raw: &RawBlock) -> Result<Self, StorageError> {
        let mut reader = raw.reader();
        let main_root = reader.u64()?;
        let free_list_root = reader.u64()?;
        let branch_factor = reader.u16()?;
        reader.finish()?;

        for (name, root) in [("main index", main_root), ("free list", free_list_root)] {
            if root < HEADER_DISK_SIZE {
                return Err(StorageError::corrupted_block(
                    "header",
                    raw.pos,
                    format!("{name} root {root} points inside the header"),
                ));
            }
        }

        Ok(Self {
            main_root,
            free_list_root,
            branch_factor,
        })
    }
}
