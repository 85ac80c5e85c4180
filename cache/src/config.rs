//! Cache configuration.
//!
//! # Environment Variables
//!
//! [`CacheConfig::from_env`] reads overrides for the defaults:
//!
//! - `BTREE_CACHE_BRANCH_FACTOR`: maximum entries per index block (default: `512`)
//! - `BTREE_CACHE_INDEX_CACHE_CAPACITY`: index blocks kept in memory (default: `100`)
//! - `BTREE_CACHE_FILE_NAME`: cache file name in the base directory (default: `cache.bin`)
//!
//! # Invariants
//!
//! After [`CacheConfig::validate`] succeeds:
//! - `branch_factor` is within [`CacheConfig::BRANCH_FACTOR_RANGE`]
//! - `index_cache_capacity` is at least one
//! - `file_name` is a single path component

use std::ops::RangeInclusive;
use std::path::{Component, Path};

/// Cache configuration.
///
/// The branch factor is persisted in the cache file; reopening a file with a
/// different branch factor discards its content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Maximum number of entries per index block.
    pub branch_factor: u16,
    /// Number of clean index blocks held in the LRU cache.
    pub index_cache_capacity: usize,
    /// Name of the cache file inside the backing store's base directory.
    pub file_name: String,
}

/// Error returned when a configuration value is rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidValue { name: String, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { name, message } => {
                write!(f, "invalid value for {name}: {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            branch_factor: Self::DEFAULT_BRANCH_FACTOR,
            index_cache_capacity: Self::DEFAULT_INDEX_CACHE_CAPACITY,
            file_name: Self::DEFAULT_FILE_NAME.to_string(),
        }
    }
}

impl CacheConfig {
    pub const DEFAULT_BRANCH_FACTOR: u16 = 512;
    pub const DEFAULT_INDEX_CACHE_CAPACITY: usize = 100;
    pub const DEFAULT_FILE_NAME: &'static str = "cache.bin";
    pub const BRANCH_FACTOR_RANGE: RangeInclusive<u16> = 4..=4096;

    #[must_use]
    pub const fn with_branch_factor(mut self, branch_factor: u16) -> Self {
        self.branch_factor = branch_factor;
        self
    }

    #[must_use]
    pub const fn with_index_cache_capacity(mut self, capacity: usize) -> Self {
        self.index_cache_capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = file_name.into();
        self
    }

    /// Defaults overridden by environment variables, validated.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(value) = Self::load_parsed("BTREE_CACHE_BRANCH_FACTOR")? {
            config.branch_factor = value;
        }
        if let Some(value) = Self::load_parsed("BTREE_CACHE_INDEX_CACHE_CAPACITY")? {
            config.index_cache_capacity = value;
        }
        if let Ok(file_name) = std::env::var("BTREE_CACHE_FILE_NAME") {
            config.file_name = file_name;
        }
        config.validate()?;
        Ok(config)
    }

    fn load_parsed<T: std::str::FromStr>(name: &str) -> Result<Option<T>, ConfigError>
    where
        T::Err: std::fmt::Display,
    {
        match std::env::var(name) {
            Ok(raw) => raw
                .trim()
                .parse()
                .map(Some)
                .map_err(|e: T::Err| ConfigError::InvalidValue {
                    name: name.to_string(),
                    message: format!("'{raw}': {e}"),
                }),
            Err(_) => Ok(None),
        }
    }

    /// Check every value against its allowed range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !Self::BRANCH_FACTOR_RANGE.contains(&self.branch_factor) {
            return Err(ConfigError::InvalidValue {
                name: "branch_factor".to_string(),
                message: format!(
                    "{} is outside {}..={}",
                    self.branch_factor,
                    Self::BRANCH_FACTOR_RANGE.start(),
                    Self::BRANCH_FACTOR_RANGE.end()
                ),
            });
        }
        if self.index_cache_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                name: "index_cache_capacity".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        let mut components = Path::new(&self.file_name).components();
        let plain = matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        );
        if !plain {
            return Err(ConfigError::InvalidValue {
                name: "file_name".to_string(),
                message: format!("'{}' is not a plain file name", self.file_name),
            });
        }
        Ok(())
    }
}
