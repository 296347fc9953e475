//! HTTP embedding client for Ollama and OpenAI-compatible backends.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use mnemo_core::config::EmbeddingConfig;
use mnemo_core::embedding::EmbeddingProvider;
use mnemo_core::{Embedding, MnemoError};
use reqwest::Client;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::error::EmbedError;

/// Remote embedding backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmbedBackend {
    /// Ollama running locally (`POST /api/embeddings`).
    Ollama {
        /// e.g. `http://localhost:11434`
        base_url: String,
    },
    /// OpenAI-compatible API (`POST /v1/embeddings`).
    OpenAiCompatible {
        /// e.g. `https://api.openai.com`
        base_url: String,
        /// Sent as a bearer token when present.
        api_key: Option<String>,
    },
}

/// An [`EmbeddingProvider`] backed by an HTTP embedding endpoint.
pub struct HttpEmbeddingProvider {
    backend: EmbedBackend,
    http: Client,
    model: String,
    dimensions: usize,
    max_retries: u32,
    request_timeout: Duration,
}

impl std::fmt::Debug for HttpEmbeddingProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpEmbeddingProvider")
            .field("endpoint", &self.endpoint())
            .field("model", &self.model)
            .field("dimensions", &self.dimensions)
            .finish_non_exhaustive()
    }
}

impl HttpEmbeddingProvider {
    /// Create a client for `backend`.
    #[must_use]
    pub fn new(
        backend: EmbedBackend,
        model: impl Into<String>,
        dimensions: usize,
        max_retries: u32,
        request_timeout: Duration,
    ) -> Self {
        Self {
            backend,
            http: Client::new(),
            model: model.into(),
            dimensions,
            max_retries,
            request_timeout,
        }
    }

    /// Build from the `[embedding]` config section. `provider` must be
    /// `"ollama"` or `"openai"`.
    ///
    /// # Errors
    ///
    /// [`EmbedError::ConfigError`] for any other provider name.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self, EmbedError> {
        let base_url = config.base_url.trim_end_matches('/').to_string();
        let backend = match config.provider.as_str() {
            "ollama" => EmbedBackend::Ollama { base_url },
            "openai" => EmbedBackend::OpenAiCompatible {
                base_url,
                api_key: config.api_key.clone(),
            },
            other => {
                return Err(EmbedError::ConfigError(format!(
                    "'{other}' is not an HTTP embedding provider"
                )));
            }
        };
        Ok(Self::new(
            backend,
            config.model.clone(),
            config.dimensions,
            config.max_retries,
            config.timeout(),
        ))
    }

    /// The configured backend.
    #[must_use]
    pub fn backend(&self) -> &EmbedBackend {
        &self.backend
    }

    /// Full URL embedding requests are posted to.
    #[must_use]
    pub fn endpoint(&self) -> String {
        match &self.backend {
            EmbedBackend::Ollama { base_url } => format!("{base_url}/api/embeddings"),
            EmbedBackend::OpenAiCompatible { base_url, .. } => format!("{base_url}/v1/embeddings"),
        }
    }

    /// JSON body for one request.
    #[must_use]
    pub fn request_body(&self, text: &str) -> Value {
        match &self.backend {
            EmbedBackend::Ollama { .. } => json!({ "model": self.model, "prompt": text }),
            EmbedBackend::OpenAiCompatible { .. } => json!({ "model": self.model, "input": text }),
        }
    }

    /// Extract the vector from a successful response body.
    ///
    /// # Errors
    ///
    /// [`EmbedError::ParseError`] if the body has no usable vector.
    pub fn parse_response(&self, body: &Value) -> Result<Vec<f32>, EmbedError> {
        match &self.backend {
            EmbedBackend::Ollama { .. } => parse_vector(&body["embedding"]),
            EmbedBackend::OpenAiCompatible { .. } => parse_vector(&body["data"][0]["embedding"]),
        }
    }

    /// Fetch one embedding, retrying up to `max_retries` times.
    ///
    /// # Errors
    ///
    /// [`EmbedError::RetriesExhausted`] after the last failed attempt, or
    /// [`EmbedError::ParseError`] for a malformed success response.
    pub async fn request_embedding(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let url = self.endpoint();
        let body = self.request_body(text);

        let mut last_error = String::new();
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                debug!(attempt = attempt + 1, max = self.max_retries + 1, "Retrying embedding call");
            }

            let start = Instant::now();
            let mut request = self.http.post(&url).json(&body).timeout(self.request_timeout);
            if let EmbedBackend::OpenAiCompatible {
                api_key: Some(key), ..
            } = &self.backend
            {
                request = request.bearer_auth(key);
            }

            match request.send().await {
                Ok(resp) if resp.status().is_success() => {
                    let json: Value = resp
                        .json()
                        .await
                        .map_err(|e| EmbedError::ParseError(e.to_string()))?;
                    let vector = self.parse_response(&json)?;
                    debug!(
                        model = %self.model,
                        dims = vector.len(),
                        latency_ms = start.elapsed().as_millis(),
                        "Embedding received"
                    );
                    return Ok(vector);
                }
                Ok(resp) => {
                    let status = resp.status();
                    last_error = format!("HTTP {status}: {}", resp.text().await.unwrap_or_default());
                    warn!(%url, error = %last_error, "Embedding endpoint returned an error");
                }
                Err(e) => {
                    let e = EmbedError::from(e);
                    last_error = e.to_string();
                    warn!(%url, error = %last_error, "Embedding request failed");
                }
            }
        }

        Err(EmbedError::RetriesExhausted {
            attempts: self.max_retries + 1,
            last_error,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed(&self, text: &str) -> mnemo_core::error::Result<Embedding> {
        self.request_embedding(text)
            .await
            .map(Embedding)
            .map_err(MnemoError::from)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Read a JSON array of numbers as `f32`s.
fn parse_vector(value: &Value) -> Result<Vec<f32>, EmbedError> {
    let array = value
        .as_array()
        .ok_or_else(|| EmbedError::ParseError("no embedding array in response".into()))?;
    if array.is_empty() {
        return Err(EmbedError::ParseError("empty embedding".into()));
    }
    array
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|x| x as f32)
                .ok_or_else(|| EmbedError::ParseError(format!("non-numeric component: {v}")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ollama() -> HttpEmbeddingProvider {
        HttpEmbeddingProvider::new(
            EmbedBackend::Ollama {
                base_url: "http://localhost:11434".into(),
            },
            "all-minilm",
            3,
            0,
            Duration::from_secs(1),
        )
    }

    fn openai() -> HttpEmbeddingProvider {
        HttpEmbeddingProvider::new(
            EmbedBackend::OpenAiCompatible {
                base_url: "https://api.example.com".into(),
                api_key: Some("sk-test".into()),
            },
            "text-embedding-3-small",
            3,
            0,
            Duration::from_secs(1),
        )
    }

    #[test]
    fn endpoints_and_bodies() {
        assert_eq!(ollama().endpoint(), "http://localhost:11434/api/embeddings");
        assert_eq!(
            ollama().request_body("hi"),
            json!({ "model": "all-minilm", "prompt": "hi" })
        );
        assert_eq!(openai().endpoint(), "https://api.example.com/v1/embeddings");
        assert_eq!(
            openai().request_body("hi"),
            json!({ "model": "text-embedding-3-small", "input": "hi" })
        );
    }

    #[test]
    fn parses_both_response_shapes() {
        let v = ollama()
            .parse_response(&json!({ "embedding": [0.5, -1.0, 2] }))
            .expect("ollama");
        assert_eq!(v, vec![0.5, -1.0, 2.0]);

        let v = openai()
            .parse_response(&json!({ "data": [{ "embedding": [1.0, 0.0, 0.25], "index": 0 }] }))
            .expect("openai");
        assert_eq!(v, vec![1.0, 0.0, 0.25]);
    }

    #[test]
    fn rejects_malformed_responses() {
        assert!(matches!(
            ollama().parse_response(&json!({ "error": "model not found" })),
            Err(EmbedError::ParseError(_))
        ));
        assert!(matches!(
            ollama().parse_response(&json!({ "embedding": [] })),
            Err(EmbedError::ParseError(_))
        ));
        assert!(matches!(
            openai().parse_response(&json!({ "data": [{ "embedding": ["a"] }] })),
            Err(EmbedError::ParseError(_))
        ));
    }

    #[test]
    fn config_selects_backend() {
        let config = EmbeddingConfig {
            provider: "openai".into(),
            base_url: "https://api.example.com/".into(),
            api_key: Some("sk-test".into()),
            ..EmbeddingConfig::default()
        };
        let provider = HttpEmbeddingProvider::from_config(&config).expect("openai");
        assert_eq!(provider.endpoint(), "https://api.example.com/v1/embeddings");

        let config = EmbeddingConfig {
            provider: "hashing".into(),
            ..EmbeddingConfig::default()
        };
        assert!(matches!(
            HttpEmbeddingProvider::from_config(&config),
            Err(EmbedError::ConfigError(_))
        ));
    }

    #[tokio::test]
    async fn unreachable_server_exhausts_retries() {
        let provider = HttpEmbeddingProvider::new(
            EmbedBackend::Ollama {
                base_url: "http://127.0.0.1:9".into(),
            },
            "all-minilm",
            3,
            1,
            Duration::from_millis(500),
        );
        match provider.request_embedding("hello").await {
            Err(EmbedError::RetriesExhausted { attempts, .. }) => assert_eq!(attempts, 2),
            other => panic!("expected exhausted retries, got {other:?}"),
        }
    }
}
