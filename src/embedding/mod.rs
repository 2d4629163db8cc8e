/// Text embedding generation for semantic search
mod cache;
mod ollama;

pub use cache::{decode_embedding, encode_embedding, CachedEmbedder};
pub use ollama::OllamaEmbedder;

use crate::error::Result;
use async_trait::async_trait;

/// Generates vector embeddings from text
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate an embedding for a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for multiple texts, in input order. An empty
    /// input returns an empty output without contacting the backend.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embedding vector dimension; 0 until the first successful call.
    fn dimensions(&self) -> usize;
}
