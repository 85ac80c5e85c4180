//! Errors produced by the block storage layer.
//!
//! Every layer below the cache façade reports failures through
//! [`StorageError`]. The façade pattern-matches on the variant to decide
//! between rebuilding the file (corruption) and propagating the failure.

/// Errors that can occur during block storage operations.
#[derive(Debug)]
pub enum StorageError {
    /// I/O error from the underlying file.
    Io(std::io::Error),
    /// A block failed its framing, type or checksum check, or the on-disk
    /// structure disagrees with the running configuration.
    Corrupted(String),
    /// An operation reached a code path that is not implemented.
    Unsupported(String),
}

impl StorageError {
    /// Build a corruption error for the block at `pos`.
    pub fn corrupted_block(kind: &str, pos: u64, reason: impl std::fmt::Display) -> Self {
        Self::Corrupted(format!("corrupted {kind} block at offset {pos}: {reason}"))
    }

    /// Whether this error means the file content can no longer be trusted.
    #[must_use]
    pub const fn is_corruption(&self) -> bool {
        matches!(self, Self::Corrupted(_))
    }
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Corrupted(msg) => write!(f, "corruption: {msg}"),
            Self::Unsupported(msg) => write!(f, "unsupported operation: {msg}"),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Corrupted(_) | Self::Unsupported(_) => None,
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}
