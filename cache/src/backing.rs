//! Backing store: where a cache lives and whether its content is current.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Owner of the directory holding a cache file.
pub trait BackingStore {
    /// Directory the cache file is created in.
    fn base_directory(&self) -> &Path;

    /// Whether the persisted content may be used. When `false` the cache
    /// discards its file on open.
    fn is_valid(&self) -> bool;

    /// Record that the cache content has been written.
    fn mark_updated(&mut self) -> io::Result<()>;
}

/// Name of the marker file kept next to the cache file.
pub const PROPERTIES_FILE: &str = "cache.properties";

/// Version recorded in the marker file. Bump when the file format changes.
pub const FORMAT_VERSION: u32 = 1;

const VERSION_KEY: &str = "format.version";

/// Backing store over a plain directory.
///
/// Validity is tracked with a `cache.properties` marker recording the
/// format version the directory was last written with.
#[derive(Debug, Clone)]
pub struct DirectoryBackingStore {
    base: PathBuf,
}

impl DirectoryBackingStore {
    /// Use `base`, creating it if needed.
    pub fn new(base: impl Into<PathBuf>) -> io::Result<Self> {
        let base = base.into();
        fs::create_dir_all(&base)?;
        Ok(Self { base })
    }

    fn properties_path(&self) -> PathBuf {
        self.base.join(PROPERTIES_FILE)
    }

    /// Format version recorded in the marker, if any.
    #[must_use]
    pub fn recorded_version(&self) -> Option<u32> {
        let text = fs::read_to_string(self.properties_path()).ok()?;
        text.lines().find_map(|line| {
            let (key, value) = line.split_once('=')?;
            (key.trim() == VERSION_KEY)
                .then(|| value.trim().parse().ok())
                .flatten()
        })
    }

    /// Remove the marker so the next open discards the cache.
    pub fn invalidate(&self) -> io::Result<()> {
        match fs::remove_file(self.properties_path()) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

impl BackingStore for DirectoryBackingStore {
    fn base_directory(&self) -> &Path {
        &self.base
    }

    fn is_valid(&self) -> bool {
        self.recorded_version() == Some(FORMAT_VERSION)
    }

    fn mark_updated(&mut self) -> io::Result<()> {
        fs::write(
            self.properties_path(),
            format!("{VERSION_KEY}={FORMAT_VERSION}\n"),
        )
    }
}
