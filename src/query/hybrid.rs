/// Hybrid search combining BM25 and vector similarity
///
/// Runs the full-text and vector legs in parallel and fuses the ranked
/// lists with weighted Reciprocal Rank Fusion. Degrades to keyword-only
/// search when the vector stack is missing, empty, or failing; a full-text
/// failure propagates.
use crate::catalog::Catalog;
use crate::embedding::Embedder;
use crate::error::{Error, Result};
use crate::fulltext::{FtsResult, FulltextIndex};
use crate::types::SearchResult;
use crate::vector_index::{VectorIndex, VectorResult};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Standard RRF constant
const RRF_K: f64 = 60.0;

/// Combines BM25 full-text search with vector similarity search
pub struct HybridSearcher {
    fulltext: Arc<FulltextIndex>,
    vectors: Option<Arc<VectorIndex>>,
    embedder: Option<Arc<dyn Embedder>>,
    catalog: Arc<Catalog>,
    /// Balance between the legs: 0 = pure BM25, 1 = pure vector
    pub hybrid_weight: f64,
}

/// Accumulated fusion state for one document
#[derive(Debug, Clone, Default)]
struct FusedEntry {
    doc_id: String,
    bm25_score: f64,
    vector_score: f64,
    rrf_score: f64,
    chunk_key: Option<String>,
    highlights: HashMap<String, Vec<String>>,
}

impl HybridSearcher {
    /// Create a hybrid searcher. `vectors` and `embedder` may be absent, in
    /// which case only BM25 search is used.
    pub fn new(
        fulltext: Arc<FulltextIndex>,
        vectors: Option<Arc<VectorIndex>>,
        embedder: Option<Arc<dyn Embedder>>,
        catalog: Arc<Catalog>,
        hybrid_weight: f64,
    ) -> Self {
        Self {
            fulltext,
            vectors,
            embedder,
            catalog,
            hybrid_weight,
        }
    }

    /// Search, fusing both legs when the vector stack is usable.
    pub async fn search(
        &self,
        cancel: &CancellationToken,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchResult>> {
        let (vectors, embedder) = match (&self.vectors, &self.embedder) {
            (Some(vectors), Some(embedder)) if !vectors.is_empty() => {
                (vectors.clone(), embedder.clone())
            }
            _ => return self.bm25_only(query, limit).await,
        };

        let fts_task = {
            let fulltext = self.fulltext.clone();
            let query = query.to_string();
            let fetch = limit * 2;
            tokio::task::spawn_blocking(move || fulltext.search(&query, fetch))
        };
        let vector_leg = async {
            let embedding = embedder.embed(query).await?;
            vectors.search(&embedding, limit * 2)
        };

        let (fts_joined, vector_result) = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            joined = async { tokio::join!(fts_task, vector_leg) } => joined,
        };

        // A failing vector leg degrades to keyword-only search.
        let vector_results = match vector_result {
            Ok(results) => results,
            Err(e) => {
                tracing::warn!("vector search failed, falling back to keyword search: {e}");
                return self.bm25_only(query, limit).await;
            }
        };

        let bm25_results =
            fts_joined.map_err(|e| Error::Other(format!("search task failed: {e}")))??;

        let fused = fuse_results(&bm25_results, &vector_results, self.hybrid_weight);
        self.build_results(fused, limit).await
    }

    /// Keyword-only search path.
    async fn bm25_only(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>> {
        let fts_results = self.fulltext.search(query, limit)?;

        let mut results = Vec::with_capacity(fts_results.len());
        for hit in fts_results {
            let Ok(document) = self.catalog.get_document(&hit.id).await else {
                continue;
            };
            results.push(SearchResult {
                document,
                score: hit.score,
                bm25_score: hit.score,
                vector_score: 0.0,
                highlights: flatten_highlights(hit.highlights),
                chunk_id: None,
            });
        }
        Ok(results)
    }

    /// Materialize fused entries against the catalog. Entries whose
    /// document has vanished are skipped.
    async fn build_results(
        &self,
        mut fused: Vec<FusedEntry>,
        limit: usize,
    ) -> Result<Vec<SearchResult>> {
        fused.truncate(limit);

        let mut results = Vec::with_capacity(fused.len());
        for entry in fused {
            let Ok(document) = self.catalog.get_document(&entry.doc_id).await else {
                continue;
            };
            results.push(SearchResult {
                document,
                score: entry.rrf_score,
                bm25_score: entry.bm25_score,
                vector_score: entry.vector_score,
                highlights: flatten_highlights(entry.highlights),
                chunk_id: entry.chunk_key,
            });
        }
        Ok(results)
    }
}

/// Fuse the two ranked lists with weighted Reciprocal Rank Fusion:
/// each rank `r` contributes `weight * 1 / (k + r + 1)` to its document.
fn fuse_results(
    bm25_results: &[FtsResult],
    vector_results: &[VectorResult],
    hybrid_weight: f64,
) -> Vec<FusedEntry> {
    let bm25_weight = 1.0 - hybrid_weight;
    let vector_weight = hybrid_weight;

    let mut entries: HashMap<String, FusedEntry> = HashMap::new();

    for (rank, hit) in bm25_results.iter().enumerate() {
        let contribution = bm25_weight / (RRF_K + rank as f64 + 1.0);
        let entry = entries.entry(hit.id.clone()).or_insert_with(|| FusedEntry {
            doc_id: hit.id.clone(),
            ..Default::default()
        });
        entry.rrf_score += contribution;
        entry.bm25_score = hit.score;
        entry.highlights = hit.highlights.clone();
    }

    for (rank, hit) in vector_results.iter().enumerate() {
        let doc_id = extract_doc_id(&hit.key);
        let contribution = vector_weight / (RRF_K + rank as f64 + 1.0);
        let entry = entries
            .entry(doc_id.to_string())
            .or_insert_with(|| FusedEntry {
                doc_id: doc_id.to_string(),
                ..Default::default()
            });
        entry.rrf_score += contribution;
        entry.vector_score = hit.similarity;
        if entry.chunk_key.is_none() {
            entry.chunk_key = Some(hit.key.clone());
        }
    }

    let mut fused: Vec<FusedEntry> = entries.into_values().collect();
    fused.sort_by(|a, b| {
        b.rrf_score
            .partial_cmp(&a.rrf_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    fused
}

/// The document id is everything before the last colon of a chunk key.
fn extract_doc_id(chunk_key: &str) -> &str {
    chunk_key
        .rsplit_once(':')
        .map(|(doc_id, _)| doc_id)
        .unwrap_or(chunk_key)
}

fn flatten_highlights(highlights: HashMap<String, Vec<String>>) -> Vec<String> {
    let mut flat: Vec<String> = highlights.into_values().flatten().collect();
    flat.sort();
    flat
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::fulltext::FulltextIndex;
    use crate::types::{Document, SourceKind};
    use chrono::Utc;

    fn fts(id: &str, score: f64) -> FtsResult {
        FtsResult {
            id: id.to_string(),
            score,
            highlights: HashMap::new(),
        }
    }

    fn vector(key: &str, similarity: f64) -> VectorResult {
        VectorResult {
            key: key.to_string(),
            similarity,
        }
    }

    fn fixture_lists() -> (Vec<FtsResult>, Vec<VectorResult>) {
        (
            vec![fts("doc1", 1.5), fts("doc2", 1.0), fts("doc3", 0.5)],
            vec![
                vector("doc3:0", 0.95),
                vector("doc1:0", 0.8),
                vector("doc4:0", 0.7),
            ],
        )
    }

    #[test]
    fn test_extract_doc_id() {
        assert_eq!(extract_doc_id("doc1:0"), "doc1");
        assert_eq!(extract_doc_id("abc:def:12"), "abc:def");
        assert_eq!(extract_doc_id("nocolon"), "nocolon");
    }

    #[test]
    fn test_balanced_fusion_prefers_docs_in_both_lists() {
        let (bm25, vectors) = fixture_lists();
        let fused = fuse_results(&bm25, &vectors, 0.5);

        assert_eq!(fused.len(), 4);
        let top_two: Vec<&str> = fused[..2].iter().map(|e| e.doc_id.as_str()).collect();
        assert!(top_two.contains(&"doc1"));
        assert!(top_two.contains(&"doc3"));
        for entry in &fused {
            assert!(entry.rrf_score > 0.0);
        }
    }

    #[test]
    fn test_pure_bm25_weight_keeps_keyword_order() {
        let (bm25, vectors) = fixture_lists();
        let fused = fuse_results(&bm25, &vectors, 0.0);

        assert_eq!(fused[0].doc_id, "doc1");
        // Vector-only documents contribute nothing at weight 0.
        let doc4 = fused.iter().find(|e| e.doc_id == "doc4").unwrap();
        assert_eq!(doc4.rrf_score, 0.0);
    }

    #[test]
    fn test_pure_vector_weight_keeps_vector_order() {
        let (bm25, vectors) = fixture_lists();
        let fused = fuse_results(&bm25, &vectors, 1.0);

        assert_eq!(fused[0].doc_id, "doc3");
        let doc2 = fused.iter().find(|e| e.doc_id == "doc2").unwrap();
        assert_eq!(doc2.rrf_score, 0.0);
    }

    #[test]
    fn test_fusion_with_empty_vector_list_matches_bm25_order() {
        let (bm25, _) = fixture_lists();
        let fused = fuse_results(&bm25, &[], 0.0);
        let order: Vec<&str> = fused.iter().map(|e| e.doc_id.as_str()).collect();
        assert_eq!(order, vec!["doc1", "doc2", "doc3"]);
    }

    #[test]
    fn test_chunk_key_of_first_vector_hit_is_kept() {
        let vectors = vec![vector("doc1:2", 0.9), vector("doc1:0", 0.8)];
        let fused = fuse_results(&[], &vectors, 1.0);
        assert_eq!(fused.len(), 1);
        assert_eq!(fused[0].chunk_key.as_deref(), Some("doc1:2"));
    }

    async fn seeded_catalog_and_index(
        dir: &tempfile::TempDir,
    ) -> (Arc<Catalog>, Arc<FulltextIndex>) {
        let catalog = Arc::new(Catalog::open_in_memory().await.unwrap());
        let fulltext =
            Arc::new(FulltextIndex::open(&dir.path().join("search.tantivy")).unwrap());

        for (id, title, content) in [
            ("go1", "Go Programming", "Goroutines and channels in Go"),
            ("py1", "Python Basics", "Python asyncio basics"),
        ] {
            let doc = Document {
                id: id.to_string(),
                source: SourceKind::Markdown,
                path: format!("/notes/{id}.md"),
                title: title.to_string(),
                content: content.to_string(),
                preview: content.to_string(),
                metadata: HashMap::new(),
                content_hash: format!("hash-{id}"),
                indexed_at: Utc::now(),
                modified_at: Utc::now(),
            };
            catalog.put_document(&doc).await.unwrap();
            fulltext.index(&doc).unwrap();
        }
        (catalog, fulltext)
    }

    #[tokio::test]
    async fn test_search_without_vector_stack_uses_bm25() {
        let dir = tempfile::tempdir().unwrap();
        let (catalog, fulltext) = seeded_catalog_and_index(&dir).await;

        let searcher = HybridSearcher::new(fulltext, None, None, catalog, 0.5);
        let results = searcher
            .search(&CancellationToken::new(), "Goroutines", 10)
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].document.id, "go1");
        assert!(results[0].bm25_score > 0.0);
        assert_eq!(results[0].vector_score, 0.0);
    }

    #[tokio::test]
    async fn test_search_with_empty_vector_index_uses_bm25() {
        let dir = tempfile::tempdir().unwrap();
        let (catalog, fulltext) = seeded_catalog_and_index(&dir).await;
        let vectors = Arc::new(
            crate::vector_index::VectorIndex::open(&dir.path().join("vectors.graph")).unwrap(),
        );

        struct NeverEmbedder;
        #[async_trait::async_trait]
        impl Embedder for NeverEmbedder {
            async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
                panic!("embedder must not be called when the vector index is empty");
            }
            async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
                panic!("embedder must not be called when the vector index is empty");
            }
            fn dimensions(&self) -> usize {
                0
            }
        }

        let searcher = HybridSearcher::new(
            fulltext,
            Some(vectors),
            Some(Arc::new(NeverEmbedder)),
            catalog,
            0.5,
        );
        let results = searcher
            .search(&CancellationToken::new(), "Python", 10)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].document.id, "py1");
    }

    #[tokio::test]
    async fn test_results_have_descending_scores_and_resolvable_ids() {
        let dir = tempfile::tempdir().unwrap();
        let (catalog, fulltext) = seeded_catalog_and_index(&dir).await;

        let searcher = HybridSearcher::new(fulltext, None, None, catalog.clone(), 0.5);
        let results = searcher
            .search(&CancellationToken::new(), "basics", 5)
            .await
            .unwrap();

        assert!(results.len() <= 5);
        for pair in results.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
        for result in &results {
            catalog.get_document(&result.document.id).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_missing_documents_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let (catalog, fulltext) = seeded_catalog_and_index(&dir).await;

        // Make the catalog forget a document the index still has.
        catalog.delete_document("py1").await.unwrap();

        let searcher = HybridSearcher::new(fulltext, None, None, catalog, 0.5);
        let results = searcher
            .search(&CancellationToken::new(), "Python", 10)
            .await
            .unwrap();
        assert!(results.is_empty());
    }
}
