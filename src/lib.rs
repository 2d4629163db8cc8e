//! mindcli — a local-first personal knowledge retrieval engine.
//!
//! mindcli ingests heterogeneous documents (notes, PDFs, emails, browser
//! history, clipboard entries) into a common document model and serves
//! hybrid keyword + semantic search with optional retrieval-augmented
//! answers from a local LLM.
//!
//! # Architecture
//!
//! ```text
//! Sources ──▶ Indexer ──▶ Catalog (SQLite)
//!                │  └────▶ FulltextIndex (Tantivy, BM25)
//!                └──▶ Chunker ──▶ Embedder (Ollama) ──▶ VectorIndex (HNSW)
//!
//! query ──▶ parse_query ──▶ HybridSearcher (BM25 ∥ vector, RRF) ──▶ results
//!                                   └──▶ LlmClient (streaming answers)
//! ```
//!
//! Documents flow from [`sources::Source`] implementations through the
//! [`indexer::Indexer`] worker pool. Unchanged files (by stored modification
//! time) are skipped; parsed documents land in the [`catalog::Catalog`] and
//! the [`fulltext::FulltextIndex`], and are chunked and embedded into the
//! [`vector_index::VectorIndex`] when an embedding backend is available.
//! Queries fan out to both indexes in parallel and are fused with weighted
//! Reciprocal Rank Fusion; the vector leg degrades gracefully.
//!
//! # Storage layout
//!
//! All state lives under the configured data directory:
//!
//! | Artifact | Contents |
//! |---|---|
//! | `mindcli.db` | documents, chunks, tags, collections |
//! | `search.tantivy/` | full-text index |
//! | `vectors.graph` (+ `vectors.keys`) | HNSW vector index |
//! | `embeddings.db` | embedding cache (`content_hash → blob`) |
//!
//! # Example
//!
//! ```no_run
//! use mindcli::{Catalog, Config, FulltextIndex, Indexer};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> mindcli::Result<()> {
//! let config = Config::load_or_default()?;
//! let catalog = Arc::new(Catalog::open(&config.database_path()?).await?);
//! let fulltext = Arc::new(FulltextIndex::open(&config.search_index_path()?)?);
//!
//! let indexer = Indexer::from_config(catalog, fulltext, None, None, &config);
//! let stats = indexer.index_all(&CancellationToken::new()).await?;
//! println!("indexed {} files", stats.indexed_files);
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod chunker;
pub mod config;
pub mod embedding;
pub mod error;
pub mod export;
pub mod fulltext;
pub mod indexer;
pub mod query;
pub mod sources;
pub mod types;
pub mod vector_index;
pub mod watcher;

#[cfg(test)]
pub(crate) mod test_http;

pub use catalog::Catalog;
pub use config::Config;
pub use error::{Error, Result};
pub use fulltext::FulltextIndex;
pub use indexer::{Indexer, ProgressReporter, Stats};
pub use query::{parse_query, HybridSearcher, LlmClient, ParsedQuery, QueryIntent};
pub use types::{Chunk, Collection, Document, SearchResult, SourceKind};
pub use vector_index::VectorIndex;
pub use watcher::FileWatcher;
