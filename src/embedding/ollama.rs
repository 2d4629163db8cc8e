/// Embedding generation against a local Ollama server
use crate::embedding::Embedder;
use crate::error::{BackendError, Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Client for the Ollama `/api/embed` endpoint
pub struct OllamaEmbedder {
    base_url: String,
    model: String,
    /// Frozen at the dimension of the first returned vector
    dimensions: AtomicUsize,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    #[allow(dead_code)]
    model: Option<String>,
    embeddings: Vec<Vec<f32>>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: String,
}

impl OllamaEmbedder {
    /// Create an embedder talking to the Ollama server at `base_url`.
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(Error::from)?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            dimensions: AtomicUsize::new(0),
            client,
        })
    }

    async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let response = self
            .client
            .post(format!("{}/api/embed", self.base_url))
            .json(&EmbedRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await
            .map_err(|e| {
                Error::Backend(BackendError::Network {
                    base_url: self.base_url.clone(),
                    message: e.to_string(),
                })
            })?;

        let status = response.status();
        let body = response.text().await.map_err(Error::from)?;

        if !status.is_success() {
            if let Ok(err) = serde_json::from_str::<ErrorResponse>(&body) {
                if !err.error.is_empty() {
                    return Err(Error::Backend(BackendError::Api(err.error)));
                }
            }
            return Err(Error::Backend(BackendError::Status {
                status: status.as_u16(),
                body,
            }));
        }

        let parsed: EmbedResponse = serde_json::from_str(&body)
            .map_err(|e| Error::Backend(BackendError::InvalidResponse(e.to_string())))?;

        if parsed.embeddings.len() != texts.len() {
            return Err(Error::Backend(BackendError::CountMismatch {
                expected: texts.len(),
                actual: parsed.embeddings.len(),
            }));
        }

        // Freeze the dimension on first success; reject later vectors that
        // disagree instead of storing them.
        if let Some(first) = parsed.embeddings.first() {
            let _ = self.dimensions.compare_exchange(
                0,
                first.len(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            );
            let expected = self.dimensions.load(Ordering::SeqCst);
            for vector in &parsed.embeddings {
                if vector.len() != expected {
                    return Err(Error::Backend(BackendError::DimensionMismatch {
                        expected,
                        actual: vector.len(),
                    }));
                }
            }
        }

        Ok(parsed.embeddings)
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut results = self.embed_batch(&[text.to_string()]).await?;
        results.pop().ok_or_else(|| {
            Error::Backend(BackendError::InvalidResponse(
                "no embeddings returned".to_string(),
            ))
        })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request(texts).await
    }

    fn dimensions(&self) -> usize {
        self.dimensions.load(Ordering::SeqCst)
    }
}
