//! Errors returned by the cache façade.

use crate::config::ConfigError;
use crate::serializer::SerializerError;
use crate::storage::StorageError;

/// Errors that can occur during cache operations.
#[derive(Debug)]
pub enum CacheError {
    /// Storage layer failure (I/O, corruption, unsupported operation).
    Storage(StorageError),
    /// I/O failure outside the cache file, such as the backing store marker.
    Io(std::io::Error),
    /// The value could not be serialized or deserialized.
    Serialization(SerializerError),
    /// `verify` found structural problems.
    Verification(String),
    /// The configuration was rejected.
    Config(ConfigError),
    /// An operation failed; `context` names it and the cache file.
    Failed {
        context: String,
        source: Box<Self>,
    },
}

impl CacheError {
    /// Wrap `self` with a description of the failed operation.
    #[must_use]
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Failed {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Whether the error, or the error it wraps, is file corruption.
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        match self {
            Self::Storage(e) => e.is_corruption(),
            Self::Failed { source, .. } => source.is_corruption(),
            Self::Io(_) | Self::Serialization(_) | Self::Verification(_) | Self::Config(_) => {
                false
            }
        }
    }

    /// The innermost error, past any context wrappers.
    #[must_use]
    pub fn root_cause(&self) -> &Self {
        match self {
            Self::Failed { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

impl std::fmt::Display for CacheError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Storage(e) => write!(f, "{e}"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Serialization(e) => write!(f, "serialization error: {e}"),
            Self::Verification(msg) => write!(f, "verification failed: {msg}"),
            Self::Config(e) => write!(f, "configuration error: {e}"),
            Self::Failed { context, source } => write!(f, "{context}: {source}"),
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Storage(e) => Some(e),
            Self::Io(e) => Some(e),
            Self::Serialization(e) => Some(e),
            Self::Config(e) => Some(e),
            Self::Failed { source, .. } => Some(source.as_ref()),
            Self::Verification(_) => None,
        }
    }
}

impl From<StorageError> for CacheError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

impl From<std::io::Error> for CacheError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<SerializerError> for CacheError {
    fn from(e: SerializerError) -> Self {
        Self::Serialization(e)
    }
}

impl From<ConfigError> for CacheError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}
