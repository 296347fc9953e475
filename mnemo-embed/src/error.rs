//! Embedding request error types.

use mnemo_core::MnemoError;
use thiserror::Error;

/// Errors from a remote embedding call.
#[derive(Debug, Error)]
pub enum EmbedError {
    /// HTTP request failed.
    #[error("Embedding request failed: {0}")]
    RequestFailed(String),

    /// The response body was not the expected JSON shape.
    #[error("Failed to parse embedding response: {0}")]
    ParseError(String),

    /// Request timed out.
    #[error("Embedding request timed out after {0}ms")]
    Timeout(u64),

    /// The provider could not be reached.
    #[error("Embedding provider unavailable: {0}")]
    Unavailable(String),

    /// All retry attempts exhausted.
    #[error("All embedding attempts exhausted after {attempts} tries: {last_error}")]
    RetriesExhausted {
        /// Attempts made.
        attempts: u32,
        /// The last failure seen.
        last_error: String,
    },

    /// Configuration error.
    #[error("Embedding configuration error: {0}")]
    ConfigError(String),
}

impl From<reqwest::Error> for EmbedError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            EmbedError::Timeout(0)
        } else if err.is_connect() {
            EmbedError::Unavailable(err.to_string())
        } else {
            EmbedError::RequestFailed(err.to_string())
        }
    }
}

impl From<EmbedError> for MnemoError {
    fn from(err: EmbedError) -> Self {
        match err {
            EmbedError::Timeout(timeout_ms) => MnemoError::EmbeddingTimeout { timeout_ms },
            EmbedError::ConfigError(msg) => MnemoError::Config(msg),
            other => MnemoError::Embedding(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_into_engine_errors() {
        assert!(matches!(
            MnemoError::from(EmbedError::Timeout(250)),
            MnemoError::EmbeddingTimeout { timeout_ms: 250 }
        ));
        assert!(matches!(
            MnemoError::from(EmbedError::ConfigError("no key".into())),
            MnemoError::Config(_)
        ));
        let err = MnemoError::from(EmbedError::RetriesExhausted {
            attempts: 2,
            last_error: "HTTP 503".into(),
        });
        assert!(err.is_retryable());
        assert!(err.to_string().contains("HTTP 503"));
    }
}
