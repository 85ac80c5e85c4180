//! Block storage engine for the cache file.
//!
//! # File Format
//!
//! The cache is a single file of variable-length blocks, each framed with a
//! marker byte, a type tag, a declared body size and a CRC32 checksum:
//!
//! - Offset 0: header block (tree roots and branch factor)
//! - Index blocks: nodes of the main index and of the free list, always
//!   appended at the end of the file
//! - Data blocks: serialized values, placed by the [`allocator`] in a reused
//!   free range or at the end of the file
//!
//! Integers are big-endian throughout.

pub mod allocator;
pub mod block;
pub mod data;
pub mod error;
pub mod file;
pub mod header;
pub mod index;
pub mod store;

pub use data::DataBlock;
pub use error::StorageError;
pub use header::HeaderBlock;
pub use index::{IndexBlock, IndexEntry};
pub use store::{BlockStore, OpenState, Tree, WriteBatch};
