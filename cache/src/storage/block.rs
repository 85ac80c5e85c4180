//! Block framing.
//!
//! Every structure in the cache file is stored as a block:
//!
//! ```text
//! [marker: 1 = 0xCC][type: 1][declared body size: 4][body][crc32: 8][padding]
//! ```
//!
//! The declared body size is the capacity reserved for the body, not the
//! number of bytes actually encoded. The checksum follows the encoded body
//! immediately and covers the type byte plus the encoded body; zero padding
//! fills the remainder so the block always occupies
//! `HEADER_SIZE + declared + CHECKSUM_SIZE` bytes. All integers are big-endian.

#![allow(clippy::cast_possible_truncation)]

use super::error::StorageError;

/// First byte of every block.
pub const BLOCK_MARKER: u8 = 0xCC;

/// Marker, type tag and declared body size.
pub const HEADER_SIZE: u64 = 6;

/// Trailing checksum, stored as a 64-bit integer.
pub const CHECKSUM_SIZE: u64 = 8;

/// Type of block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BlockType {
    Header = 0x55,
    Index = 0x77,
    Data = 0x33,
}

impl BlockType {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Header => "header",
            Self::Index => "index",
            Self::Data => "data",
        }
    }
}

impl TryFrom<u8> for BlockType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x55 => Ok(Self::Header),
            0x77 => Ok(Self::Index),
            0x33 => Ok(Self::Data),
            other => Err(other),
        }
    }
}

/// Total on-disk length of a block with the given declared body size.
#[must_use]
pub const fn on_disk_size(declared: u32) -> u64 {
    HEADER_SIZE + declared as u64 + CHECKSUM_SIZE
}

fn checksum(block_type: BlockType, body: &[u8]) -> u64 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&[block_type as u8]);
    hasher.update(body);
    u64::from(hasher.finalize())
}

/// Accumulates a block body and frames it.
pub struct BlockWriter {
    block_type: BlockType,
    declared: u32,
    body: Vec<u8>,
}

impl BlockWriter {
    #[must_use]
    pub fn new(block_type: BlockType, declared: u32) -> Self {
        Self {
            block_type,
            declared,
            body: Vec::with_capacity(declared as usize),
        }
    }

    pub fn put_u16(&mut self, value: u16) {
        self.body.extend_from_slice(&value.to_be_bytes());
    }

    pub fn put_u32(&mut self, value: u32) {
        self.body.extend_from_slice(&value.to_be_bytes());
    }

    pub fn put_u64(&mut self, value: u64) {
        self.body.extend_from_slice(&value.to_be_bytes());
    }

    pub fn put_i64(&mut self, value: i64) {
        self.body.extend_from_slice(&value.to_be_bytes());
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.body.extend_from_slice(bytes);
    }

    /// Produce the full on-disk image of the block, padding included.
    ///
    /// Fails if the encoded body does not fit the declared size.
    pub fn finish(self) -> Result<Vec<u8>, StorageError> {
        if self.body.len() > self.declared as usize {
            return Err(StorageError::Unsupported(format!(
                "{} block body of {} bytes exceeds its declared size of {} bytes",
                self.block_type.name(),
                self.body.len(),
                self.declared
            )));
        }
        let total = on_disk_size(self.declared) as usize;
        let mut out = Vec::with_capacity(total);
        out.push(BLOCK_MARKER);
        out.push(self.block_type as u8);
        out.extend_from_slice(&self.declared.to_be_bytes());
        out.extend_from_slice(&self.body);
        out.extend_from_slice(&checksum(self.block_type, &self.body).to_be_bytes());
        out.resize(total, 0);
        Ok(out)
    }
}

/// A block read back from disk whose framing header has been validated.
///
/// `region` holds the declared body plus the checksum area.
#[derive(Debug)]
pub struct RawBlock {
    pub pos: u64,
    pub block_type: BlockType,
    pub declared: u32,
    pub region: Vec<u8>,
}

impl RawBlock {
    /// Validate a framing header read from `pos`.
    ///
    /// Returns the declared body size.
    pub fn check_header(
        pos: u64,
        expected: BlockType,
        header: [u8; HEADER_SIZE as usize],
    ) -> Result<u32, StorageError> {
        if header[0] != BLOCK_MARKER {
            return Err(StorageError::corrupted_block(
                expected.name(),
                pos,
                format!("bad block marker 0x{:02X}", header[0]),
            ));
        }
        match BlockType::try_from(header[1]) {
            Ok(found) if found == expected => {}
            Ok(found) => {
                return Err(StorageError::corrupted_block(
                    expected.name(),
                    pos,
                    format!("found a {} block instead", found.name()),
                ));
            }
            Err(tag) => {
                return Err(StorageError::corrupted_block(
                    expected.name(),
                    pos,
                    format!("unknown block type 0x{tag:02X}"),
                ));
            }
        }
        Ok(u32::from_be_bytes([header[2], header[3], header[4], header[5]]))
    }

    /// Cursor over the encoded body.
    #[must_use]
    pub fn reader(&self) -> BlockReader<'_> {
        BlockReader {
            block: self,
            offset: 0,
        }
    }
}

/// Sequential reader over a block body.
///
/// Reads past the declared body size report corruption.
pub struct BlockReader<'a> {
    block: &'a RawBlock,
    offset: usize,
}

impl<'a> BlockReader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], StorageError> {
        let end = self.offset + len;
        if end > self.block.declared as usize {
            return Err(StorageError::corrupted_block(
                self.block.block_type.name(),
                self.block.pos,
                format!(
                    "encoded body overruns its declared size of {} bytes",
                    self.block.declared
                ),
            ));
        }
        let bytes = &self.block.region[self.offset..end];
        self.offset = end;
        Ok(bytes)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], StorageError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn u16(&mut self) -> Result<u16, StorageError> {
        Ok(u16::from_be_bytes(self.take_array()?))
    }

    pub fn u32(&mut self) -> Result<u32, StorageError> {
        Ok(u32::from_be_bytes(self.take_array()?))
    }

    pub fn u64(&mut self) -> Result<u64, StorageError> {
        Ok(u64::from_be_bytes(self.take_array()?))
    }

    pub fn i64(&mut self) -> Result<i64, StorageError> {
        Ok(i64::from_be_bytes(self.take_array()?))
    }

    pub fn bytes(&mut self, len: usize) -> Result<&'a [u8], StorageError> {
        self.take(len)
    }

    /// Check the checksum that follows the bytes consumed so far.
    pub fn finish(self) -> Result<(), StorageError> {
        let body = &self.block.region[..self.offset];
        let start = self.offset;
        let stored = self
            .block
            .region
            .get(start..start + CHECKSUM_SIZE as usize)
            .and_then(|bytes| <[u8; 8]>::try_from(bytes).ok())
            .map(u64::from_be_bytes)
            .ok_or_else(|| {
                StorageError::corrupted_block(
                    self.block.block_type.name(),
                    self.block.pos,
                    "checksum area is truncated",
                )
            })?;
        let actual = checksum(self.block.block_type, body);
        if stored != actual {
            return Err(StorageError::corrupted_block(
                self.block.block_type.name(),
                self.block.pos,
                format!("checksum mismatch (stored {stored:#x}, computed {actual:#x})"),
            ));
        }
        Ok(())
    }
}
