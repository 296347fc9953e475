//! Error types for the mnemo core library.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type for all mnemo operations.
#[derive(Error, Debug)]
pub enum MnemoError {
    /// The embedding provider did not answer within the configured bound.
    #[error("Embedding timed out after {timeout_ms}ms")]
    EmbeddingTimeout {
        /// The timeout that elapsed.
        timeout_ms: u64,
    },

    /// The embedding provider failed to produce a vector.
    #[error("Embedding failed: {0}")]
    Embedding(String),

    /// A vector did not have the index dimensionality.
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimensionality of the index.
        expected: usize,
        /// Dimensionality of the rejected vector.
        actual: usize,
    },

    /// A memory with the given ID was not found.
    #[error("Memory not found: {0}")]
    MemoryNotFound(crate::MemoryId),

    /// Serialization or deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Writing a persisted artifact failed. The in-memory state is intact,
    /// so the write can be retried.
    #[error("Failed to persist {}: {source}", path.display())]
    Persist {
        /// The file that could not be written.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MnemoError {
    /// Whether repeating the failed operation may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::EmbeddingTimeout { .. } | Self::Embedding(_) | Self::Persist { .. } | Self::Io(_)
        )
    }
}

/// Convenience Result type alias.
pub type Result<T> = std::result::Result<T, MnemoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persist_errors_are_retryable() {
        let err = MnemoError::Persist {
            path: PathBuf::from("/tmp/memory_index.bin"),
            source: std::io::Error::other("disk full"),
        };
        assert!(err.is_retryable());
        assert!(err.to_string().contains("memory_index.bin"));
    }

    #[test]
    fn config_errors_are_not_retryable() {
        assert!(!MnemoError::Config("bad".into()).is_retryable());
        assert!(!MnemoError::DimensionMismatch { expected: 3, actual: 4 }.is_retryable());
    }
}
