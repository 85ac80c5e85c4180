//! Data block format.
//!
//! ```text
//! [capacity: 4][len: 4][bytes: len]
//! ```
//!
//! The capacity is fixed when the block is allocated; a later value can be
//! rewritten in place while it fits.

#![allow(clippy::cast_possible_truncation)]

use crate::storage::block::{BlockType, BlockWriter, RawBlock, on_disk_size};
use crate::storage::error::StorageError;

/// A serialized value plus the space reserved for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataBlock {
    capacity: u32,
    bytes: Vec<u8>,
}

impl DataBlock {
    /// New block sized exactly to `bytes`.
    pub fn new(bytes: Vec<u8>) -> Result<Self, StorageError> {
        let capacity = u32::try_from(bytes.len())
            .ok()
            .filter(|len| len.checked_add(8).is_some())
            .ok_or_else(|| {
                StorageError::Unsupported(format!(
                    "value of {} bytes is too large for a data block",
                    bytes.len()
                ))
            })?;
        Ok(Self { capacity, bytes })
    }

    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[must_use]
    pub const fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Whether a value of `len` bytes can replace the current one in place.
    #[must_use]
    pub const fn fits(&self, len: usize) -> bool {
        len <= self.capacity as usize
    }

    /// Replace the stored value. Callers check [`Self::fits`] first.
    pub fn replace(&mut self, bytes: Vec<u8>) -> Result<(), StorageError> {
        if !self.fits(bytes.len()) {
            return Err(StorageError::Unsupported(format!(
                "value of {} bytes does not fit a data block of capacity {}",
                bytes.len(),
                self.capacity
            )));
        }
        self.bytes = bytes;
        Ok(())
    }

    const fn body_size(capacity: u32) -> u32 {
        8 + capacity
    }

    /// On-disk length, which is also the size returned to the allocator.
    #[must_use]
    pub const fn disk_size(&self) -> u64 {
        on_disk_size(Self::body_size(self.capacity))
    }

    pub fn encode(&self) -> Result<Vec<u8>, StorageError> {
        let mut writer = BlockWriter::new(BlockType::Data, Self::body_size(self.capacity));
        writer.put_u32(self.capacity);
        writer.put_u32(self.bytes.len() as u32);
        writer.put_bytes(&self.bytes);
        writer.finish()
    }

    pub fn decode(raw: &RawBlock) -> Result<Self, StorageError> {
        let mut reader = raw.reader();
        let capacity = reader.u32()?;
        if capacity.checked_add(8) != Some(raw.declared) {
            return Err(StorageError::corrupted_block(
                "data",
                raw.pos,
                format!(
                    "capacity {capacity} disagrees with declared size {}",
                    raw.declared
                ),
            ));
        }
        let len = reader.u32()? as usize;
        if len > capacity as usize {
            return Err(StorageError::corrupted_block(
                "data",
                raw.pos,
                format!("value length {len} exceeds capacity {capacity}"),
            ));
        }
        let bytes = reader.bytes(len)?.to_vec();
        reader.finish()?;
        Ok(Self { capacity, bytes })
    }
}
