//! Block store: the in-memory view of the cache file.
//!
//! The store owns the file handle, the header, a bounded LRU of clean index
//! blocks and a write batch of dirty blocks. Mutating accessors move blocks
//! into the batch; [`BlockStore::flush`] writes the batch out and hands the
//! index blocks back to the LRU. Dirty blocks are never subject to eviction.

use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::path::Path;

use lru::LruCache;

use crate::storage::block::BlockType;
use crate::storage::data::DataBlock;
use crate::storage::error::StorageError;
use crate::storage::file::BlockFile;
use crate::storage::header::{HEADER_DISK_SIZE, HEADER_POS, HeaderBlock};
use crate::storage::index::IndexBlock;

/// Which of the two trees in the file an operation addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tree {
    /// Key hash to data block position.
    Main,
    /// Free range size to free range position.
    FreeList,
}

impl Tree {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Main => "main index",
            Self::FreeList => "free list",
        }
    }
}

/// How [`BlockStore::load`] found the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenState {
    /// The file was empty and has been initialized.
    Created,
    /// An existing header was read and validated.
    Existing,
}

/// Blocks modified since the last flush.
#[derive(Debug, Default)]
pub struct WriteBatch {
    header: bool,
    index: BTreeMap<u64, IndexBlock>,
    data: BTreeMap<u64, DataBlock>,
}

impl WriteBatch {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.header && self.index.is_empty() && self.data.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        usize::from(self.header) + self.index.len() + self.data.len()
    }

    fn clear(&mut self) {
        self.header = false;
        self.index.clear();
        self.data.clear();
    }
}

/// Storage engine beneath the B-tree algorithms.
pub struct BlockStore {
    file: BlockFile,
    header: HeaderBlock,
    index_cache: LruCache<u64, IndexBlock>,
    batch: WriteBatch,
}

impl BlockStore {
    /// Open the file at `path` without reading it yet.
    ///
    /// Call [`Self::load`] before using the store.
    pub fn open(
        path: &Path,
        branch_factor: u16,
        cache_capacity: usize,
    ) -> Result<Self, StorageError> {
        let file = BlockFile::open(path)?;
        let capacity = NonZeroUsize::new(cache_capacity).unwrap_or(NonZeroUsize::MIN);
        Ok(Self {
            file,
            header: HeaderBlock::new(branch_factor),
            index_cache: LruCache::new(capacity),
            batch: WriteBatch::default(),
        })
    }

    /// Initialize an empty file, or read and validate an existing header.
    pub fn load(&mut self) -> Result<OpenState, StorageError> {
        if self.file.len()? == 0 {
            self.initialize()?;
            return Ok(OpenState::Created);
        }

        let expected = self.header.branch_factor;
        let raw = self.file.read_block(HEADER_POS, BlockType::Header)?;
        let header = HeaderBlock::decode(&raw)?;
        if header.branch_factor != expected {
            return Err(StorageError::Corrupted(format!(
                "file was built with branch factor {} but {expected} is configured",
                header.branch_factor
            )));
        }
        self.header = header;
        tracing::debug!(
            "loaded {} (main root {}, free list root {})",
            self.file.path().display(),
            header.main_root,
            header.free_list_root
        );
        Ok(OpenState::Existing)
    }

    /// Discard all content and write a fresh, empty structure.
    pub fn rebuild(&mut self) -> Result<(), StorageError> {
        tracing::debug!("rebuilding {}", self.file.path().display());
        self.initialize()
    }

    fn initialize(&mut self) -> Result<(), StorageError> {
        self.index_cache.clear();
        self.batch.clear();
        self.file.truncate()?;
        let branch_factor = self.header.branch_factor;
        self.header = HeaderBlock::new(branch_factor);
        self.file.extend(HEADER_DISK_SIZE);
        self.header.main_root = self.create_index(IndexBlock::new_leaf());
        self.header.free_list_root = self.create_index(IndexBlock::new_leaf());
        self.batch.header = true;
        self.flush()?;
        tracing::info!("initialized cache file {}", self.file.path().display());
        Ok(())
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    #[must_use]
    pub const fn header(&self) -> &HeaderBlock {
        &self.header
    }

    /// Maximum entries per index block.
    #[must_use]
    pub const fn branch_factor(&self) -> usize {
        self.header.branch_factor as usize
    }

    /// Minimum entries per non-root index block.
    #[must_use]
    pub const fn min_entries(&self) -> usize {
        self.branch_factor() / 2
    }

    /// Logical end of the file.
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.file.end()
    }

    /// Reserve `size` bytes at the end of the file.
    pub const fn extend(&mut self, size: u64) -> u64 {
        self.file.extend(size)
    }

    #[must_use]
    pub const fn root(&self, tree: Tree) -> u64 {
        match tree {
            Tree::Main => self.header.main_root,
            Tree::FreeList => self.header.free_list_root,
        }
    }

    pub fn set_root(&mut self, tree: Tree, pos: u64) {
        match tree {
            Tree::Main => self.header.main_root = pos,
            Tree::FreeList => self.header.free_list_root = pos,
        }
        self.batch.header = true;
        tracing::debug!("{} root is now index block {pos}", tree.name());
    }

    /// Blocks waiting to be flushed.
    #[must_use]
    pub const fn pending(&self) -> &WriteBatch {
        &self.batch
    }

    /// Number of clean index blocks held in memory.
    #[must_use]
    pub fn cached_index_blocks(&self) -> usize {
        self.index_cache.len()
    }

    /// Read-only access to an index block.
    pub fn index(&mut self, pos: u64) -> Result<&IndexBlock, StorageError> {
        if self.batch.index.contains_key(&pos) {
            return self
                .batch
                .index
                .get(&pos)
                .ok_or_else(|| missing_block(pos));
        }
        if !self.index_cache.contains(&pos) {
            let block = self.read_index_block(pos)?;
            self.index_cache.put(pos, block);
        }
        self.index_cache.get(&pos).ok_or_else(|| missing_block(pos))
    }

    /// Mutable access to an index block, marking it dirty.
    pub fn index_mut(&mut self, pos: u64) -> Result<&mut IndexBlock, StorageError> {
        if !self.batch.index.contains_key(&pos) {
            let block = match self.index_cache.pop(&pos) {
                Some(block) => block,
                None => self.read_index_block(pos)?,
            };
            self.batch.index.insert(pos, block);
        }
        self.batch
            .index
            .get_mut(&pos)
            .ok_or_else(|| missing_block(pos))
    }

    /// Place a new index block at the end of the file.
    pub fn create_index(&mut self, block: IndexBlock) -> u64 {
        let pos = self.file.extend(IndexBlock::disk_size(self.branch_factor()));
        self.batch.index.insert(pos, block);
        tracing::trace!("created index block {pos}");
        pos
    }

    /// Drop an index block from memory, returning its content.
    ///
    /// The space it occupied is not reused.
    pub fn release_index(&mut self, pos: u64) -> Result<IndexBlock, StorageError> {
        let block = match self.batch.index.remove(&pos) {
            Some(block) => block,
            None => match self.index_cache.pop(&pos) {
                Some(block) => block,
                None => self.read_index_block(pos)?,
            },
        };
        tracing::trace!("released index block {pos}");
        Ok(block)
    }

    /// Read a data block, preferring an unflushed copy.
    pub fn data(&mut self, pos: u64) -> Result<DataBlock, StorageError> {
        if let Some(block) = self.batch.data.get(&pos) {
            return Ok(block.clone());
        }
        self.read_data_block(pos)
    }

    /// Stage a data block for writing at `pos`.
    pub fn put_data(&mut self, pos: u64, block: DataBlock) {
        self.batch.data.insert(pos, block);
    }

    /// Decode the index block at `pos` straight from disk.
    pub fn read_index_block(&mut self, pos: u64) -> Result<IndexBlock, StorageError> {
        let raw = self.file.read_block(pos, BlockType::Index)?;
        IndexBlock::decode(&raw, self.branch_factor())
    }

    /// Decode the data block at `pos` straight from disk.
    pub fn read_data_block(&mut self, pos: u64) -> Result<DataBlock, StorageError> {
        let raw = self.file.read_block(pos, BlockType::Data)?;
        DataBlock::decode(&raw)
    }

    /// Decode the header straight from disk.
    pub fn read_header(&mut self) -> Result<HeaderBlock, StorageError> {
        let raw = self.file.read_block(HEADER_POS, BlockType::Header)?;
        HeaderBlock::decode(&raw)
    }

    /// Write every pending block to disk.
    ///
    /// Data and index blocks go first and the header last, so the roots on
    /// disk only change once the nodes they point at are written.
    pub fn flush(&mut self) -> Result<(), StorageError> {
        if self.batch.is_empty() {
            return Ok(());
        }
        let count = self.batch.len();
        let branch_factor = self.branch_factor();

        for (pos, block) in std::mem::take(&mut self.batch.data) {
            self.file.write_block(pos, &block.encode()?)?;
        }
        let index = std::mem::take(&mut self.batch.index);
        for (pos, block) in &index {
            self.file.write_block(*pos, &block.encode(branch_factor)?)?;
        }
        for (pos, block) in index {
            self.index_cache.put(pos, block);
        }
        if self.batch.header {
            self.file.write_block(HEADER_POS, &self.header.encode()?)?;
            self.batch.header = false;
        }
        tracing::trace!("flushed {count} blocks");
        Ok(())
    }

    /// Forget unflushed changes and cached blocks, then re-read the header.
    ///
    /// Used after a failed operation left the in-memory state ahead of disk.
    pub fn abandon(&mut self) -> Result<(), StorageError> {
        self.batch.clear();
        self.index_cache.clear();
        let header = self.read_header()?;
        self.header = header;
        Ok(())
    }

    /// Flush and sync the file.
    pub fn sync(&mut self) -> Result<(), StorageError> {
        self.flush()?;
        self.file.sync()
    }
}

fn missing_block(pos: u64) -> StorageError {
    StorageError::Corrupted(format!("index block {pos} vanished from memory"))
}
