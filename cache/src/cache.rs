//! Persistent indexed cache.
//!
//! Maps string keys to serialized values in a single file. Keys are reduced
//! to a 64-bit hash and looked up in an on-disk B-tree whose entries point
//! at data blocks; freed data blocks are recycled through a second B-tree.
//!
//! Every mutating call flushes before it returns, so an instance can be
//! dropped at any time. Two distinct keys whose hashes collide share an
//! entry; the later write wins.
//!
//! # Corruption
//!
//! Any block that fails its framing or checksum check, or a tree whose
//! links disagree, makes the whole file untrustworthy. The cache then
//! truncates and reinitializes it: `get` reports a miss, while `put` and
//! `remove` return the corruption error after rebuilding.

use std::fmt::Display;
use std::marker::PhantomData;
use std::path::Path;

use crate::backing::{BackingStore, DirectoryBackingStore};
use crate::btree::BTree;
use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::serializer::Serializer;
use crate::storage::{BlockStore, DataBlock, OpenState, Tree, allocator};
use crate::verify;

/// Hash a key to the 64-bit value stored in the index.
///
/// The first eight bytes of the key's BLAKE3 digest, big-endian.
#[must_use]
pub fn key_hash(key: &str) -> i64 {
    let digest = blake3::hash(key.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest.as_bytes()[..8]);
    i64::from_be_bytes(prefix)
}

/// Diagnostic snapshot of a cache instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Clean index blocks currently held in memory.
    pub cached_index_blocks: usize,
    /// Logical length of the cache file in bytes.
    pub file_length: u64,
    pub branch_factor: u16,
}

/// A persistent map from keys to values of type `V`.
pub struct PersistentIndexedCache<V, S, B = DirectoryBackingStore> {
    store: BlockStore,
    serializer: S,
    backing: B,
    config: CacheConfig,
    /// Whether the backing store has been told about writes since opening.
    marked_updated: bool,
    _value: PhantomData<fn() -> V>,
}

impl<V, S, B> PersistentIndexedCache<V, S, B>
where
    S: Serializer<V>,
    B: BackingStore,
{
    /// Open the cache in `backing`'s directory with the default configuration.
    pub fn open(backing: B, serializer: S) -> Result<Self, CacheError> {
        Self::open_with_config(backing, serializer, CacheConfig::default())
    }

    /// Open the cache in `backing`'s directory.
    ///
    /// An existing file is reused when the backing store reports it valid and
    /// it was built with the same branch factor; otherwise it is discarded.
    pub fn open_with_config(
        mut backing: B,
        serializer: S,
        config: CacheConfig,
    ) -> Result<Self, CacheError> {
        config.validate()?;
        let (store, created) = Self::open_store(&mut backing, &config)?;
        let cache = Self {
            store,
            serializer,
            backing,
            config,
            marked_updated: created,
            _value: PhantomData,
        };
        tracing::debug!("opened {cache}");
        Ok(cache)
    }

    /// Open and load the store, recovering from corruption.
    ///
    /// Returns the store and whether its file was (re)initialized.
    fn open_store(backing: &mut B, config: &CacheConfig) -> Result<(BlockStore, bool), CacheError> {
        let path = backing.base_directory().join(&config.file_name);
        let opening = || format!("could not open cache '{}'", path.display());

        let mut store = BlockStore::open(&path, config.branch_factor, config.index_cache_capacity)
            .map_err(|e| CacheError::from(e).context(opening()))?;

        let state = if backing.is_valid() {
            match store.load() {
                Ok(state) => state,
                Err(e) if e.is_corruption() => {
                    tracing::warn!(
                        "discarding corrupt cache '{}': {e}",
                        path.display()
                    );
                    store
                        .rebuild()
                        .map_err(|e| CacheError::from(e).context(opening()))?;
                    OpenState::Created
                }
                Err(e) => return Err(CacheError::from(e).context(opening())),
            }
        } else {
            if store.end() > 0 {
                tracing::warn!(
                    "backing store reports cache '{}' invalid, discarding its content",
                    path.display()
                );
            }
            store
                .rebuild()
                .map_err(|e| CacheError::from(e).context(opening()))?;
            OpenState::Created
        };

        let created = state == OpenState::Created;
        if created {
            backing
                .mark_updated()
                .map_err(|e| CacheError::from(e).context(opening()))?;
        }
        Ok((store, created))
    }

    /// Path of the cache file.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.store.path()
    }

    #[must_use]
    pub const fn config(&self) -> &CacheConfig {
        &self.config
    }

    #[must_use]
    pub const fn backing(&self) -> &B {
        &self.backing
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            cached_index_blocks: self.store.cached_index_blocks(),
            file_length: self.store.end(),
            branch_factor: self.store.header().branch_factor,
        }
    }

    /// Value stored under `key`.
    ///
    /// A corrupt file is rebuilt and reported as a miss.
    pub fn get<K: Display + ?Sized>(&mut self, key: &K) -> Result<Option<V>, CacheError> {
        let key = key.to_string();
        match self.lookup(&key) {
            Ok(value) => Ok(value),
            Err(e) if e.is_corruption() => {
                tracing::warn!("{self} is corrupt, rebuilding: {e}");
                self.rebuild()
                    .map_err(|e| e.context(format!("could not rebuild {self}")))?;
                Ok(None)
            }
            Err(e) => Err(e.context(format!("could not read entry '{key}' from {self}"))),
        }
    }

    fn lookup(&mut self, key: &str) -> Result<Option<V>, CacheError> {
        let Some(pos) = BTree::new(&mut self.store, Tree::Main).get(key_hash(key))? else {
            return Ok(None);
        };
        let block = self.store.data(pos)?;
        Ok(Some(self.serializer.read(block.bytes())?))
    }

    /// Store `value` under `key`, replacing any previous value.
    pub fn put<K: Display + ?Sized>(&mut self, key: &K, value: &V) -> Result<(), CacheError> {
        let key = key.to_string();
        let bytes = self
            .serializer
            .write(value)
            .map_err(|e| {
                CacheError::from(e).context(format!("could not add entry '{key}' to {self}"))
            })?;

        match self.store_value(&key, bytes) {
            Ok(()) => self.note_updated(),
            Err(e) => Err(self.recover(e, format!("could not add entry '{key}' to {self}"))),
        }
    }

    fn store_value(&mut self, key: &str, bytes: Vec<u8>) -> Result<(), CacheError> {
        let hash = key_hash(key);
        if let Some(pos) = BTree::new(&mut self.store, Tree::Main).get(hash)? {
            let mut block = self.store.data(pos)?;
            if block.fits(bytes.len()) {
                block.replace(bytes)?;
                self.store.put_data(pos, block);
                self.store.flush()?;
                return Ok(());
            }
            allocator::free(&mut self.store, pos, block.disk_size())?;
        }

        let block = DataBlock::new(bytes)?;
        let pos = allocator::allocate(&mut self.store, block.disk_size())?;
        self.store.put_data(pos, block);
        BTree::new(&mut self.store, Tree::Main).insert(hash, pos)?;
        self.store.flush()?;
        Ok(())
    }

    /// Remove the value stored under `key`. Absent keys are ignored.
    pub fn remove<K: Display + ?Sized>(&mut self, key: &K) -> Result<(), CacheError> {
        let key = key.to_string();
        match self.remove_value(&key) {
            Ok(true) => self.note_updated(),
            Ok(false) => Ok(()),
            Err(e) => Err(self.recover(e, format!("could not remove entry '{key}' from {self}"))),
        }
    }

    fn remove_value(&mut self, key: &str) -> Result<bool, CacheError> {
        let Some(pos) = BTree::new(&mut self.store, Tree::Main).remove(key_hash(key))? else {
            return Ok(false);
        };
        let size = self.store.data(pos)?.disk_size();
        allocator::free(&mut self.store, pos, size)?;
        self.store.flush()?;
        Ok(true)
    }

    /// Close and reopen the file, dropping every cached index block.
    pub fn reset(&mut self) -> Result<(), CacheError> {
        self.store
            .sync()
            .map_err(|e| CacheError::from(e).context(format!("could not close {self}")))?;
        let (store, created) = Self::open_store(&mut self.backing, &self.config)?;
        self.store = store;
        self.marked_updated = created;
        tracing::debug!("reopened {self}");
        Ok(())
    }

    /// Check the structure of the file.
    ///
    /// Fails with [`CacheError::Verification`] listing every problem found.
    pub fn verify(&mut self) -> Result<(), CacheError> {
        let problems = self
            .store
            .flush()
            .and_then(|()| verify::verify(&mut self.store))
            .map_err(|e| CacheError::from(e).context(format!("could not verify {self}")))?;
        if problems.is_empty() {
            return Ok(());
        }
        Err(CacheError::Verification(format!(
            "some problems were found when checking the integrity of {self}:\n  {}",
            problems.join("\n  ")
        )))
    }

    /// Flush, sync and close the file.
    pub fn close(mut self) -> Result<(), CacheError> {
        self.store
            .sync()
            .map_err(|e| CacheError::from(e).context(format!("could not close {self}")))?;
        tracing::debug!("closed {self}");
        Ok(())
    }

    fn note_updated(&mut self) -> Result<(), CacheError> {
        if !self.marked_updated {
            self.backing.mark_updated()?;
            self.marked_updated = true;
        }
        Ok(())
    }

    fn rebuild(&mut self) -> Result<(), CacheError> {
        self.store.rebuild()?;
        self.backing.mark_updated()?;
        self.marked_updated = true;
        Ok(())
    }

    /// Bring in-memory state back in line with the file after a failed
    /// write, then attach `context` to the error.
    fn recover(&mut self, error: CacheError, context: String) -> CacheError {
        let trouble = if error.is_corruption() {
            tracing::warn!("{self} is corrupt, rebuilding: {error}");
            self.rebuild().err()
        } else {
            match self.store.abandon() {
                Ok(()) => None,
                Err(e) if e.is_corruption() => {
                    tracing::warn!("{self} is corrupt, rebuilding: {e}");
                    self.rebuild().err()
                }
                Err(e) => Some(CacheError::from(e)),
            }
        };
        if let Some(e) = trouble {
            tracing::warn!("could not recover {self}: {e}");
        }
        error.context(context)
    }
}

impl<V, S, B> std::fmt::Display for PersistentIndexedCache<V, S, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cache '{}'", self.store.path().display())
    }
}

impl<V, S, B> std::fmt::Debug for PersistentIndexedCache<V, S, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentIndexedCache")
            .field("path", &self.store.path())
            .field("branch_factor", &self.store.header().branch_factor)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serializer::{BincodeSerializer, BytesSerializer, StringSerializer};
    use crate::storage::header::HEADER_DISK_SIZE;
    use crate::storage::index::IndexBlock;
    use crate::testing::{flip_byte, init_tracing};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::HashMap;
    use tempfile::{TempDir, tempdir};

    type StringCache = PersistentIndexedCache<String, StringSerializer>;

    fn open_cache(dir: &Path, branch: u16) -> StringCache {
        init_tracing();
        let backing = DirectoryBackingStore::new(dir).expect("backing store");
        let config = CacheConfig::default()
            .with_branch_factor(branch)
            .with_index_cache_capacity(16);
        PersistentIndexedCache::open_with_config(backing, StringSerializer, config)
            .expect("open cache")
    }

    fn create_test_cache(branch: u16) -> (TempDir, StringCache) {
        let dir = tempdir().expect("create temp dir");
        let cache = open_cache(dir.path(), branch);
        (dir, cache)
    }

    fn put(cache: &mut StringCache, key: &str, value: &str) {
        cache.put(key, &value.to_string()).expect("put");
    }

    fn main_entries(cache: &mut StringCache) -> usize {
        BTree::new(&mut cache.store, Tree::Main).count().expect("count")
    }

    fn free_ranges(cache: &mut StringCache) -> usize {
        BTree::new(&mut cache.store, Tree::FreeList)
            .count()
            .expect("count")
    }

    #[test]
    fn test_key_hash_is_stable() {
        assert_eq!(key_hash("a"), key_hash("a"));
        assert_ne!(key_hash("a"), key_hash("b"));
        assert_ne!(key_hash(""), key_hash(" "));
    }

    #[test]
    fn test_put_then_get() {
        let (_dir, mut cache) = create_test_cache(4);
        assert_eq!(cache.get("missing").expect("get"), None);
        put(&mut cache, "a", "value of a");
        assert_eq!(cache.get("a").expect("get"), Some("value of a".to_string()));
        cache.verify().expect("verify");
    }

    #[test]
    fn test_non_string_keys_use_display() {
        let (_dir, mut cache) = create_test_cache(4);
        cache.put(&42, &"answer".to_string()).expect("put");
        assert_eq!(cache.get("42").expect("get"), Some("answer".to_string()));
    }

    #[test]
    fn test_overwrite_in_place() {
        let (_dir, mut cache) = create_test_cache(4);
        put(&mut cache, "k", "a fairly long first value");
        let length = cache.stats().file_length;

        put(&mut cache, "k", "short");
        assert_eq!(cache.get("k").expect("get"), Some("short".to_string()));
        assert_eq!(cache.stats().file_length, length);
        assert_eq!(main_entries(&mut cache), 1);
        assert_eq!(free_ranges(&mut cache), 0);

        // The original capacity is kept, so growing back still fits.
        put(&mut cache, "k", "a fairly long first value");
        assert_eq!(cache.stats().file_length, length);
        cache.verify().expect("verify");
    }

    #[test]
    fn test_overwrite_with_larger_value_moves_block() {
        let (_dir, mut cache) = create_test_cache(4);
        put(&mut cache, "k", "x");
        put(&mut cache, "k", "a value that does not fit the first block");
        assert_eq!(
            cache.get("k").expect("get"),
            Some("a value that does not fit the first block".to_string())
        );
        assert_eq!(main_entries(&mut cache), 1);
        assert_eq!(free_ranges(&mut cache), 1);
        cache.verify().expect("verify");
    }

    #[test]
    fn test_freed_block_is_reused() {
        let (_dir, mut cache) = create_test_cache(4);
        put(&mut cache, "first", "0123456789");
        put(&mut cache, "second", "abc");
        cache.remove("first").expect("remove");
        let length = cache.stats().file_length;

        // Same size and smaller both fit the freed range.
        put(&mut cache, "third", "9876543210");
        assert_eq!(cache.stats().file_length, length);
        cache.remove("third").expect("remove");
        put(&mut cache, "fourth", "tiny");
        assert_eq!(cache.stats().file_length, length);

        assert_eq!(cache.get("second").expect("get"), Some("abc".to_string()));
        assert_eq!(cache.get("fourth").expect("get"), Some("tiny".to_string()));
        cache.verify().expect("verify");
    }

    #[test]
    fn test_remove() {
        let (_dir, mut cache) = create_test_cache(4);
        put(&mut cache, "a", "1");
        cache.remove("a").expect("remove");
        assert_eq!(cache.get("a").expect("get"), None);

        put(&mut cache, "a", "2");
        assert_eq!(cache.get("a").expect("get"), Some("2".to_string()));
    }

    #[test]
    fn test_remove_absent_key_is_noop() {
        let (_dir, mut cache) = create_test_cache(4);
        cache.remove("nothing").expect("remove on empty cache");
        put(&mut cache, "a", "1");
        let length = cache.stats().file_length;
        cache.remove("nothing").expect("remove absent");
        cache.remove("nothing").expect("remove absent again");
        assert_eq!(cache.stats().file_length, length);
        assert_eq!(cache.get("a").expect("get"), Some("1".to_string()));
    }

    #[test]
    fn test_split_creates_two_level_tree() {
        let (_dir, mut cache) = create_test_cache(4);
        for i in 0..5 {
            put(&mut cache, &format!("key-{i}"), &format!("value-{i}"));
        }
        let root = cache.store.root(Tree::Main);
        let node = cache.store.index(root).expect("root").clone();
        assert!(!node.is_leaf());
        assert_eq!(node.entries.len(), 1);
        for i in 0..5 {
            assert_eq!(
                cache.get(&format!("key-{i}")).expect("get"),
                Some(format!("value-{i}"))
            );
        }
        cache.verify().expect("verify");
    }

    #[test]
    fn test_letters_scenario() {
        let (_dir, mut cache) = create_test_cache(4);
        for key in ["a", "b", "c", "d", "e", "f", "g", "h"] {
            put(&mut cache, key, &key.repeat(3));
        }
        let root = cache.store.root(Tree::Main);
        let node = cache.store.index(root).expect("root").clone();
        assert!(!node.is_leaf());
        for child in node.entries.iter().map(|e| e.child).chain([node.tail]) {
            assert!(cache.store.index(child).expect("child").is_leaf());
        }
        assert_eq!(cache.get("e").expect("get"), Some("eee".to_string()));
        cache.verify().expect("verify");

        for key in ["a", "b", "c", "d"] {
            cache.remove(key).expect("remove");
        }
        cache.verify().expect("verify after removals");
        for key in ["e", "f", "g", "h"] {
            assert_eq!(cache.get(key).expect("get"), Some(key.repeat(3)));
        }
        assert_eq!(cache.get("a").expect("get"), None);
    }

    #[test]
    fn test_merge_back_to_single_leaf() {
        let (_dir, mut cache) = create_test_cache(4);
        for i in 0..120 {
            put(&mut cache, &format!("key-{i}"), "v");
        }
        cache.verify().expect("verify full tree");
        for i in 3..120 {
            cache.remove(&format!("key-{i}")).expect("remove");
        }
        cache.verify().expect("verify after merges");
        for i in 0..3 {
            assert_eq!(cache.get(&format!("key-{i}")).expect("get"), Some("v".to_string()));
        }
        let root = cache.store.root(Tree::Main);
        assert!(cache.store.index(root).expect("root").is_leaf());
    }

    #[test]
    fn test_random_operations_match_model() {
        for (seed, branch) in [(1u64, 4u16), (2, 5), (3, 16)] {
            let (_dir, mut cache) = create_test_cache(branch);
            let mut rng = StdRng::seed_from_u64(seed);
            let mut model: HashMap<String, String> = HashMap::new();

            for step in 0..600 {
                let key = format!("key-{}", rng.random_range(0..150));
                if rng.random_bool(0.3) {
                    cache.remove(&key).expect("remove");
                    model.remove(&key);
                } else {
                    let len: u8 = rng.random_range(0..40);
                    let value: String = (0..len).map(|i| char::from(b'a' + i % 26)).collect();
                    cache.put(&key, &value).expect("put");
                    model.insert(key, value);
                }
                if step % 100 == 99 {
                    cache.verify().expect("verify during run");
                }
            }

            cache.verify().expect("verify after run");
            for i in 0..150 {
                let key = format!("key-{i}");
                assert_eq!(cache.get(&key).expect("get"), model.get(&key).cloned(), "{key}");
            }
        }
    }

    #[test]
    fn test_values_survive_reset_and_reopen() {
        let dir = tempdir().expect("create temp dir");
        {
            let mut cache = open_cache(dir.path(), 4);
            for i in 0..30 {
                put(&mut cache, &format!("key-{i}"), &format!("value-{i}"));
            }
            cache.reset().expect("reset");
            assert_eq!(cache.stats().cached_index_blocks, 0);
            assert_eq!(cache.get("key-7").expect("get"), Some("value-7".to_string()));
            cache.close().expect("close");
        }

        let mut cache = open_cache(dir.path(), 4);
        for i in 0..30 {
            assert_eq!(
                cache.get(&format!("key-{i}")).expect("get"),
                Some(format!("value-{i}"))
            );
        }
        cache.verify().expect("verify");
    }

    #[test]
    fn test_branch_factor_change_discards_content() {
        let dir = tempdir().expect("create temp dir");
        {
            let mut cache = open_cache(dir.path(), 4);
            put(&mut cache, "a", "1");
        }
        let mut cache = open_cache(dir.path(), 8);
        assert_eq!(cache.get("a").expect("get"), None);
        assert_eq!(cache.stats().branch_factor, 8);
        put(&mut cache, "a", "2");
        cache.verify().expect("verify");
    }

    #[test]
    fn test_invalid_backing_store_discards_content() {
        let dir = tempdir().expect("create temp dir");
        {
            let mut cache = open_cache(dir.path(), 4);
            put(&mut cache, "a", "1");
            cache.backing().invalidate().expect("invalidate");
        }
        let mut cache = open_cache(dir.path(), 4);
        assert!(cache.backing().is_valid());
        assert_eq!(cache.get("a").expect("get"), None);
    }

    #[test]
    fn test_corrupt_index_block_rebuilds_on_get() {
        let dir = tempdir().expect("create temp dir");
        {
            let mut cache = open_cache(dir.path(), 4);
            put(&mut cache, "a", "1");
            put(&mut cache, "b", "2");
        }
        // Root leaf sits right after the header; hit its first entry.
        flip_byte(&dir.path().join("cache.bin"), HEADER_DISK_SIZE + 12);

        let mut cache = open_cache(dir.path(), 4);
        assert_eq!(cache.get("a").expect("corruption is a miss"), None);
        assert_eq!(cache.get("b").expect("get"), None);
        put(&mut cache, "c", "3");
        assert_eq!(cache.get("c").expect("get"), Some("3".to_string()));
        cache.verify().expect("verify after rebuild");
    }

    #[test]
    fn test_corrupt_index_block_fails_put_then_recovers() {
        let dir = tempdir().expect("create temp dir");
        {
            let mut cache = open_cache(dir.path(), 4);
            put(&mut cache, "a", "1");
        }
        flip_byte(&dir.path().join("cache.bin"), HEADER_DISK_SIZE + 12);

        let mut cache = open_cache(dir.path(), 4);
        let err = cache.put("b", &"2".to_string()).expect_err("corrupt file");
        assert!(err.is_corruption());
        assert!(err.to_string().contains("could not add entry 'b'"));
        assert_eq!(cache.get("a").expect("get"), None);
        put(&mut cache, "b", "2");
        assert_eq!(cache.get("b").expect("get"), Some("2".to_string()));
    }

    #[test]
    fn test_corrupt_data_block_rebuilds() {
        let dir = tempdir().expect("create temp dir");
        {
            let mut cache = open_cache(dir.path(), 4);
            put(&mut cache, "a", "payload");
        }
        // The first data block follows the header and both empty roots.
        let data = HEADER_DISK_SIZE + 2 * IndexBlock::disk_size(4);
        flip_byte(&dir.path().join("cache.bin"), data + 16);

        let mut cache = open_cache(dir.path(), 4);
        assert_eq!(cache.get("a").expect("get"), None);
        cache.verify().expect("verify");
    }

    #[test]
    fn test_corrupt_header_rebuilds_on_open() {
        let dir = tempdir().expect("create temp dir");
        {
            let mut cache = open_cache(dir.path(), 4);
            put(&mut cache, "a", "1");
        }
        flip_byte(&dir.path().join("cache.bin"), 0);

        let mut cache = open_cache(dir.path(), 4);
        assert_eq!(cache.get("a").expect("get"), None);
        cache.verify().expect("verify");
    }

    #[test]
    fn test_truncated_file_rebuilds() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("cache.bin");
        {
            let mut cache = open_cache(dir.path(), 4);
            for i in 0..10 {
                put(&mut cache, &format!("key-{i}"), "value");
            }
        }
        let len = std::fs::metadata(&path).expect("metadata").len();
        std::fs::OpenOptions::new()
            .write(true)
            .open(&path)
            .expect("open")
            .set_len(len - 20)
            .expect("truncate");

        let mut cache = open_cache(dir.path(), 4);
        for i in 0..10 {
            // Some reads may still succeed before the damage is reached.
            let _ = cache.get(&format!("key-{i}")).expect("get never fails");
        }
        put(&mut cache, "after", "rebuild");
        cache.verify().expect("verify");
    }

    #[test]
    fn test_deserialization_failure_is_reported() {
        let dir = tempdir().expect("create temp dir");
        {
            let backing = DirectoryBackingStore::new(dir.path()).expect("backing");
            let mut cache: PersistentIndexedCache<Vec<u8>, _> =
                PersistentIndexedCache::open(backing, BytesSerializer).expect("open bytes cache");
            cache.put("k", &vec![0xFF, 0xFE]).expect("put");
        }
        let backing = DirectoryBackingStore::new(dir.path()).expect("backing");
        let mut cache: StringCache =
            PersistentIndexedCache::open(backing, StringSerializer).expect("open string cache");
        let err = cache.get("k").expect_err("invalid utf-8");
        assert!(!err.is_corruption());
        assert!(matches!(err.root_cause(), CacheError::Serialization(_)));
        // Nothing was discarded.
        cache.remove("k").expect("remove");
    }

    #[test]
    fn test_bincode_values() {
        #[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
        struct Entry {
            hash: [u8; 16],
            length: u64,
        }

        let dir = tempdir().expect("create temp dir");
        let backing = DirectoryBackingStore::new(dir.path()).expect("backing");
        let mut cache: PersistentIndexedCache<Entry, _> =
            PersistentIndexedCache::open(backing, BincodeSerializer::new()).expect("open");
        let entry = Entry {
            hash: [7; 16],
            length: 1 << 40,
        };
        cache.put("/lib/core.jar", &entry).expect("put");
        assert_eq!(cache.get("/lib/core.jar").expect("get"), Some(entry));
    }

    #[test]
    fn test_large_values() {
        let (_dir, mut cache) = create_test_cache(4);
        let big = "x".repeat(100_000);
        put(&mut cache, "big", &big);
        put(&mut cache, "small", "s");
        assert_eq!(cache.get("big").expect("get"), Some(big));
        cache.remove("big").expect("remove");
        put(&mut cache, "medium", &"y".repeat(5_000));
        cache.verify().expect("verify");
    }

    #[test]
    fn test_index_cache_is_bounded() {
        let (_dir, mut cache) = create_test_cache(4);
        for i in 0..200 {
            put(&mut cache, &format!("key-{i}"), "v");
        }
        assert!(cache.stats().cached_index_blocks <= 16);
    }

    #[test]
    fn test_display_and_path() {
        let (dir, cache) = create_test_cache(4);
        let path = dir.path().join("cache.bin");
        assert_eq!(cache.path(), path);
        assert_eq!(cache.to_string(), format!("cache '{}'", path.display()));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let dir = tempdir().expect("create temp dir");
        let backing = DirectoryBackingStore::new(dir.path()).expect("backing");
        let config = CacheConfig::default().with_branch_factor(2);
        let err = StringCache::open_with_config(backing, StringSerializer, config)
            .expect_err("branch factor too small");
        assert!(matches!(err, CacheError::Config(_)));
    }

    #[test]
    fn test_verify_reports_problems() {
        let (_dir, mut cache) = create_test_cache(4);
        put(&mut cache, "a", "1");
        let root = cache.store.root(Tree::Main);
        cache.store.index_mut(root).expect("root").entries[0].target = root;
        cache.store.flush().expect("flush");

        let err = cache.verify().expect_err("dangling data pointer");
        let CacheError::Verification(message) = err else {
            panic!("expected a verification failure, got {err}");
        };
        assert!(message.contains("some problems were found"));
        assert!(message.contains(&format!("DataBlock {root}")));
    }
}
