/// Content-hash cache around an embedder
///
/// Keyed by the first 16 bytes of the SHA-256 of the input text, stored in a
/// small SQLite database as little-endian packed f32 blobs. The cache is
/// only written after a successful backend call.
use crate::embedding::Embedder;
use crate::error::Result;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Caching wrapper for an [`Embedder`]
pub struct CachedEmbedder {
    inner: Arc<dyn Embedder>,
    pool: SqlitePool,
}

impl CachedEmbedder {
    /// Open (or create) the cache database and wrap `inner`.
    pub async fn open(inner: Arc<dyn Embedder>, cache_path: &Path) -> Result<Self> {
        if let Some(parent) = cache_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", cache_path.display()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS embedding_cache (
                content_hash TEXT PRIMARY KEY,
                embedding BLOB NOT NULL
            )",
        )
        .execute(&pool)
        .await?;

        Ok(Self { inner, pool })
    }

    /// Close the cache database.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn get(&self, hash: &str) -> Option<Vec<f32>> {
        let blob: Option<Vec<u8>> =
            sqlx::query_scalar("SELECT embedding FROM embedding_cache WHERE content_hash = ?")
                .bind(hash)
                .fetch_optional(&self.pool)
                .await
                .ok()
                .flatten();
        blob.map(|b| decode_embedding(&b))
    }

    async fn put(&self, hash: &str, embedding: &[f32]) {
        let result = sqlx::query(
            "INSERT OR REPLACE INTO embedding_cache (content_hash, embedding) VALUES (?, ?)",
        )
        .bind(hash)
        .bind(encode_embedding(embedding))
        .execute(&self.pool)
        .await;
        if let Err(e) = result {
            tracing::warn!("failed to write embedding cache entry: {e}");
        }
    }
}

#[async_trait]
impl Embedder for CachedEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let hash = content_hash(text);
        if let Some(embedding) = self.get(&hash).await {
            return Ok(embedding);
        }

        let embedding = self.inner.embed(text).await?;
        self.put(&hash, &embedding).await;
        Ok(embedding)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let mut uncached_texts = Vec::new();
        let mut uncached_indices = Vec::new();

        for (i, text) in texts.iter().enumerate() {
            match self.get(&content_hash(text)).await {
                Some(embedding) => results[i] = Some(embedding),
                None => {
                    uncached_texts.push(text.clone());
                    uncached_indices.push(i);
                }
            }
        }

        if !uncached_texts.is_empty() {
            let embeddings = self.inner.embed_batch(&uncached_texts).await?;
            for (j, embedding) in embeddings.into_iter().enumerate() {
                let i = uncached_indices[j];
                self.put(&content_hash(&uncached_texts[j]), &embedding).await;
                results[i] = Some(embedding);
            }
        }

        Ok(results.into_iter().flatten().collect())
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }
}

/// Cache key: hex of the first 16 bytes of SHA-256 over the UTF-8 text.
fn content_hash(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    crate::catalog::hex_encode(&digest[..16])
}

/// Pack an embedding as little-endian f32 bytes.
pub fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(embedding.len() * 4);
    for v in embedding {
        buf.extend_from_slice(&v.to_le_bytes());
    }
    buf
}

/// Unpack little-endian f32 bytes into an embedding.
pub fn decode_embedding(buf: &[u8]) -> Vec<f32> {
    buf.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}
