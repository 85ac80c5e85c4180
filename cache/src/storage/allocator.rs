//! Free-space management for data blocks.
//!
//! Freed ranges are tracked in the free-list tree, keyed by their length.
//! Only one range is remembered per length: freeing a second range of the
//! same length replaces the first, and adjacent ranges are never coalesced.
//! Index blocks never pass through here; they are always appended.

use crate::btree::BTree;
use crate::storage::error::StorageError;
use crate::storage::store::{BlockStore, Tree};

/// Find room for `size` bytes.
///
/// The largest free range is used when it is big enough, with its surplus
/// freed again; otherwise the file is extended.
pub fn allocate(store: &mut BlockStore, size: u64) -> Result<u64, StorageError> {
    let mut free_list = BTree::new(store, Tree::FreeList);
    if let Some(largest) = free_list.last()? {
        let available = range_size(largest.key)?;
        if available >= size {
            free_list.remove(largest.key)?;
            tracing::trace!(
                "reusing free range {}+{available} for {size} bytes",
                largest.target
            );
            free(store, largest.target + size, available - size)?;
            return Ok(largest.target);
        }
    }
    let pos = store.extend(size);
    tracing::trace!("extended file by {size} bytes at {pos}");
    Ok(pos)
}

/// Record `size` bytes at `pos` as reusable.
pub fn free(store: &mut BlockStore, pos: u64, size: u64) -> Result<(), StorageError> {
    if size == 0 {
        return Ok(());
    }
    let key = i64::try_from(size)
        .map_err(|_| StorageError::Unsupported(format!("free range of {size} bytes")))?;
    let replaced = BTree::new(store, Tree::FreeList).insert(key, pos)?;
    match replaced {
        Some(previous) => tracing::trace!(
            "freed {pos}+{size}, forgetting earlier range at {previous} of the same size"
        ),
        None => tracing::trace!("freed {pos}+{size}"),
    }
    Ok(())
}

fn range_size(key: i64) -> Result<u64, StorageError> {
    u64::try_from(key)
        .map_err(|_| StorageError::Corrupted(format!("free list holds a negative size {key}")))
}
