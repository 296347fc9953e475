//! # mnemo-embed: HTTP embedding providers for mnemo
//!
//! Plugs remote embedding APIs into the engine's
//! [`EmbeddingProvider`](mnemo_core::embedding::EmbeddingProvider) seam:
//!   - **Ollama** (local, `/api/embeddings`)
//!   - **OpenAI-compatible API** (`/v1/embeddings`)
//!
//! The engine wraps every provider in its own timeout and dimension check,
//! so this crate only speaks HTTP and retries.

#![deny(clippy::unwrap_used)]
#![warn(missing_docs)]

pub mod client;
pub mod error;

use std::sync::Arc;

use mnemo_core::config::EmbeddingConfig;
use mnemo_core::embedding::EmbeddingProvider;
use mnemo_core::engine::local_provider;

pub use client::{EmbedBackend, HttpEmbeddingProvider};
pub use error::EmbedError;

/// Build the provider named by `config.provider`: `"ollama"` and `"openai"`
/// are served here, everything else by the core crate.
///
/// # Errors
///
/// Unknown provider names, or a local model that fails to load.
pub fn provider_from_config(
    config: &EmbeddingConfig,
) -> mnemo_core::error::Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "ollama" | "openai" => Ok(Arc::new(HttpEmbeddingProvider::from_config(config)?)),
        _ => local_provider(config),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_by_provider_name() {
        let mut config = EmbeddingConfig::default();
        let local = provider_from_config(&config).expect("hashing");
        assert_eq!(local.model_name(), "feature-hashing-bow");

        config.provider = "ollama".into();
        let remote = provider_from_config(&config).expect("ollama");
        assert_eq!(remote.model_name(), "all-minilm");
        assert_eq!(remote.dimensions(), 384);

        config.provider = "carrier-pigeon".into();
        assert!(provider_from_config(&config).is_err());
    }
}
