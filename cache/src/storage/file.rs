//! Cache file I/O operations.
//!
//! This module handles reading and writing framed blocks at arbitrary
//! offsets of the single cache file, and tracks the logical end of file used
//! to place newly allocated blocks.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::storage::block::{BlockType, CHECKSUM_SIZE, HEADER_SIZE, RawBlock};
use crate::storage::error::StorageError;

/// A cache file handle with positioned block I/O.
pub struct BlockFile {
    file: File,
    path: PathBuf,
    /// Offset at which the next block extending the file is placed.
    end: u64,
}

impl BlockFile {
    /// Open the file at `path`, creating it empty if it does not exist.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let end = file.metadata()?.len();
        tracing::trace!("opened {} ({end} bytes)", path.display());
        Ok(Self {
            file,
            path: path.to_path_buf(),
            end,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Logical end of file.
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.end
    }

    /// Physical length of the file on disk.
    pub fn len(&self) -> Result<u64, StorageError> {
        Ok(self.file.metadata()?.len())
    }

    /// Reserve `size` bytes at the end of the file, returning their offset.
    ///
    /// The bytes are materialized when a block is written there.
    pub const fn extend(&mut self, size: u64) -> u64 {
        let pos = self.end;
        self.end += size;
        pos
    }

    /// Discard all content.
    pub fn truncate(&mut self) -> Result<(), StorageError> {
        self.file.set_len(0)?;
        self.end = 0;
        Ok(())
    }

    /// Read the framed block at `pos` and validate its framing header.
    ///
    /// The body is not decoded; the checksum is verified by the decoder once
    /// it knows how many body bytes were encoded.
    pub fn read_block(&mut self, pos: u64, expected: BlockType) -> Result<RawBlock, StorageError> {
        let len = self.len()?;
        if pos.saturating_add(HEADER_SIZE) > len {
            return Err(StorageError::corrupted_block(
                expected.name(),
                pos,
                format!("block header lies past end of file ({len} bytes)"),
            ));
        }

        self.file.seek(SeekFrom::Start(pos))?;
        let mut header = [0u8; HEADER_SIZE as usize];
        self.file.read_exact(&mut header)?;
        let declared = RawBlock::check_header(pos, expected, header)?;

        let region_len = u64::from(declared) + CHECKSUM_SIZE;
        if pos + HEADER_SIZE + region_len > len {
            return Err(StorageError::corrupted_block(
                expected.name(),
                pos,
                format!("declared size {declared} extends past end of file ({len} bytes)"),
            ));
        }

        let mut region = vec![0u8; usize::try_from(region_len).unwrap_or(usize::MAX)];
        self.file.read_exact(&mut region)?;
        tracing::trace!("read {} block at {pos}", expected.name());
        Ok(RawBlock {
            pos,
            block_type: expected,
            declared,
            region,
        })
    }

    /// Write a full block image at `pos`.
    pub fn write_block(&mut self, pos: u64, bytes: &[u8]) -> Result<(), StorageError> {
        self.file.seek(SeekFrom::Start(pos))?;
        self.file.write_all(bytes)?;
        tracing::trace!("wrote {} bytes at {pos}", bytes.len());
        Ok(())
    }

    /// Flush file contents and metadata to disk.
    pub fn sync(&self) -> Result<(), StorageError> {
        self.file.sync_all()?;
        Ok(())
    }
}
