//! Persistent, file-backed B-tree indexed cache.
//!
//! A [`PersistentIndexedCache`] maps keys to serialized values in a single
//! file. The file holds checksummed blocks: a header, the nodes of two
//! B-trees (the key index and a free list of reusable ranges) and data
//! blocks holding values.
//!
//! ```no_run
//! use btree_cache::{DirectoryBackingStore, PersistentIndexedCache, StringSerializer};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let backing = DirectoryBackingStore::new("/tmp/artifact-cache")?;
//! let mut cache = PersistentIndexedCache::open(backing, StringSerializer)?;
//! cache.put("core.jar", &"sha1:4f2a".to_string())?;
//! assert_eq!(cache.get("core.jar")?, Some("sha1:4f2a".to_string()));
//! # Ok(())
//! # }
//! ```

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod backing;
pub mod btree;
pub mod cache;
pub mod config;
pub mod error;
pub mod serializer;
pub mod storage;
pub mod verify;

#[cfg(test)]
mod testing;

pub use backing::{BackingStore, DirectoryBackingStore};
pub use cache::{CacheStats, PersistentIndexedCache};
pub use config::{CacheConfig, ConfigError};
pub use error::CacheError;
pub use serializer::{BincodeSerializer, BytesSerializer, Serializer, SerializerError, StringSerializer};
pub use storage::StorageError;
