/// Indexing pipeline orchestration
///
/// Drives Source → Catalog → full-text index → (chunker + embeddings +
/// vector index) through a fixed pool of workers fed from a bounded job
/// channel. Per-document failures are reported and counted but never abort
/// a run; embedding failures leave the document searchable through the
/// full-text index.
use crate::catalog::Catalog;
use crate::chunker;
use crate::config::Config;
use crate::embedding::Embedder;
use crate::error::{Error, Result};
use crate::fulltext::FulltextIndex;
use crate::sources::{
    BrowserSource, ClipboardSource, EmailSource, FileInfo, MarkdownSource, PdfSource, Source,
};
use crate::types::{Chunk, Document};
use crate::vector_index::VectorIndex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Receives progress updates during indexing
pub trait ProgressReporter: Send + Sync {
    fn on_start(&self, source: &str, total: usize);
    fn on_progress(&self, source: &str, current: usize, total: usize, path: &str);
    fn on_complete(&self, source: &str, indexed: usize, errors: usize);
    fn on_error(&self, source: &str, path: &str, error: &Error);
}

/// No-op progress reporter
pub struct NoopProgressReporter;

impl ProgressReporter for NoopProgressReporter {
    fn on_start(&self, _source: &str, _total: usize) {}
    fn on_progress(&self, _source: &str, _current: usize, _total: usize, _path: &str) {}
    fn on_complete(&self, _source: &str, _indexed: usize, _errors: usize) {}
    fn on_error(&self, _source: &str, _path: &str, _error: &Error) {}
}

/// Aggregate indexing statistics
#[derive(Debug, Default, Clone)]
pub struct Stats {
    pub total_files: u64,
    pub indexed_files: u64,
    pub errors: u64,
    pub by_source: HashMap<String, u64>,
}

/// Orchestrates document indexing from the configured sources
pub struct Indexer {
    catalog: Arc<Catalog>,
    fulltext: Arc<FulltextIndex>,
    vectors: Option<Arc<VectorIndex>>,
    embedder: Option<Arc<dyn Embedder>>,
    sources: Vec<Arc<dyn Source>>,
    workers: usize,
    progress: Option<Arc<dyn ProgressReporter>>,
}

impl Indexer {
    /// Create an indexer over an explicit set of sources. `vectors` and
    /// `embedder` are optional; without both, semantic indexing is skipped.
    pub fn new(
        catalog: Arc<Catalog>,
        fulltext: Arc<FulltextIndex>,
        vectors: Option<Arc<VectorIndex>>,
        embedder: Option<Arc<dyn Embedder>>,
        sources: Vec<Arc<dyn Source>>,
        workers: usize,
    ) -> Self {
        Self {
            catalog,
            fulltext,
            vectors,
            embedder,
            sources,
            workers: workers.max(1),
            progress: None,
        }
    }

    /// Create an indexer with the sources enabled in the configuration.
    pub fn from_config(
        catalog: Arc<Catalog>,
        fulltext: Arc<FulltextIndex>,
        vectors: Option<Arc<VectorIndex>>,
        embedder: Option<Arc<dyn Embedder>>,
        config: &Config,
    ) -> Self {
        let mut sources: Vec<Arc<dyn Source>> = Vec::new();
        if config.sources.markdown.enabled {
            sources.push(Arc::new(MarkdownSource::new(
                config.sources.markdown.paths.clone(),
                config.sources.markdown.extensions.clone(),
                config.sources.markdown.ignore.clone(),
            )));
        }
        if config.sources.pdf.enabled {
            sources.push(Arc::new(PdfSource::new(
                config.sources.pdf.paths.clone(),
                config.sources.pdf.ignore.clone(),
            )));
        }
        if config.sources.email.enabled {
            sources.push(Arc::new(EmailSource::new(
                config.sources.email.paths.clone(),
            )));
        }
        if config.sources.browser.enabled {
            sources.push(Arc::new(BrowserSource::new(
                config.sources.browser.browsers.clone(),
            )));
        }
        if config.sources.clipboard.enabled {
            sources.push(Arc::new(ClipboardSource::new(
                config.sources.clipboard.skip_passwords,
            )));
        }

        Self::new(
            catalog,
            fulltext,
            vectors,
            embedder,
            sources,
            config.indexing.workers,
        )
    }

    /// Attach a progress reporter.
    pub fn set_progress_reporter(&mut self, reporter: Arc<dyn ProgressReporter>) {
        self.progress = Some(reporter);
    }

    /// Index all documents from all configured sources.
    pub async fn index_all(&self, cancel: &CancellationToken) -> Result<Stats> {
        let mut stats = Stats::default();

        for source in &self.sources {
            let source_stats = self.index_source(source.clone(), cancel).await?;
            stats.total_files += source_stats.total_files;
            stats.indexed_files += source_stats.indexed_files;
            stats.errors += source_stats.errors;
            stats.by_source.insert(
                source.name().to_string(),
                source_stats.indexed_files,
            );
        }

        Ok(stats)
    }

    async fn index_source(
        &self,
        source: Arc<dyn Source>,
        cancel: &CancellationToken,
    ) -> Result<Stats> {
        let mut stats = Stats::default();
        let source_name = source.name().to_string();

        // Drain the scan streams fully before dispatching so the total is
        // known up front.
        let (mut files_rx, mut errs_rx) = source.scan(cancel.clone());
        let mut files = Vec::new();
        let drain_files = async {
            let mut collected = Vec::new();
            while let Some(file) = files_rx.recv().await {
                collected.push(file);
            }
            collected
        };
        let drain_errors = async {
            let mut collected = Vec::new();
            while let Some(err) = errs_rx.recv().await {
                collected.push(err);
            }
            collected
        };
        let (collected_files, scan_errors) = tokio::join!(drain_files, drain_errors);
        files.extend(collected_files);

        for err in &scan_errors {
            if let Some(progress) = &self.progress {
                progress.on_error(&source_name, "", err);
            }
            stats.errors += 1;
        }

        stats.total_files = files.len() as u64;
        if let Some(progress) = &self.progress {
            progress.on_start(&source_name, files.len());
        }

        let processed = Arc::new(AtomicU64::new(0));
        let indexed = Arc::new(AtomicU64::new(0));
        let errors = Arc::new(AtomicU64::new(stats.errors));

        let (job_tx, job_rx) = mpsc::channel::<FileInfo>(self.workers * 2);
        let job_rx = Arc::new(Mutex::new(job_rx));

        let mut workers = JoinSet::new();
        for _ in 0..self.workers {
            let ctx = WorkerContext {
                catalog: self.catalog.clone(),
                fulltext: self.fulltext.clone(),
                vectors: self.vectors.clone(),
                embedder: self.embedder.clone(),
                source: source.clone(),
                progress: self.progress.clone(),
                processed: processed.clone(),
                indexed: indexed.clone(),
                errors: errors.clone(),
                total: files.len(),
                cancel: cancel.clone(),
            };
            let jobs = job_rx.clone();
            workers.spawn(async move {
                loop {
                    if ctx.cancel.is_cancelled() {
                        return;
                    }
                    let job = { jobs.lock().await.recv().await };
                    let Some(file) = job else { return };
                    ctx.process(file).await;
                }
            });
        }

        // Feed jobs, honoring cancellation.
        let mut cancelled = false;
        for file in files {
            tokio::select! {
                _ = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                sent = job_tx.send(file) => {
                    if sent.is_err() {
                        break;
                    }
                }
            }
        }
        drop(job_tx);
        while workers.join_next().await.is_some() {}

        stats.indexed_files = indexed.load(Ordering::Relaxed);
        stats.errors = errors.load(Ordering::Relaxed);

        if cancelled {
            tracing::info!("indexing of {source_name} cancelled");
            return Err(Error::Cancelled);
        }

        if let Some(progress) = &self.progress {
            progress.on_complete(
                &source_name,
                stats.indexed_files as usize,
                stats.errors as usize,
            );
        }

        Ok(stats)
    }

    /// Index a single file (or virtual record) by path.
    pub async fn index_file(&self, path: &str, cancel: &CancellationToken) -> Result<()> {
        let source = self
            .sources
            .iter()
            .find(|s| s.matches_path(path))
            .cloned()
            .ok_or_else(|| Error::not_found(format!("source for {path}")))?;

        // Stat the real file when possible; virtual sources need a scan.
        let file = match std::fs::metadata(path) {
            Ok(metadata) => FileInfo {
                path: path.to_string(),
                modified_at: metadata
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                    .map(|d| d.as_secs() as i64)
                    .unwrap_or_default(),
                size: metadata.len(),
            },
            Err(_) => {
                let (mut files_rx, _errs_rx) = source.scan(cancel.clone());
                let mut found = None;
                while let Some(candidate) = files_rx.recv().await {
                    if candidate.path == path {
                        found = Some(candidate);
                        break;
                    }
                }
                found.ok_or_else(|| Error::not_found(format!("file {path}")))?
            }
        };

        let doc = source.parse(&file).await?;
        self.catalog.put_document(&doc).await?;
        self.fulltext.index(&doc)?;
        if self.vectors.is_some() && self.embedder.is_some() {
            self.embed_document(&doc).await;
        }

        Ok(())
    }

    /// Remove a document and everything derived from it.
    pub async fn remove_file(&self, path: &str) -> Result<()> {
        let doc = self.catalog.get_document_by_path(path).await?;

        if let Some(vectors) = &self.vectors {
            let chunks = self.catalog.get_chunks_by_document(&doc.id).await?;
            for chunk in &chunks {
                if let Err(e) = vectors.delete(&chunk.id) {
                    tracing::warn!("deleting vector {}: {e}", chunk.id);
                }
            }
        }

        self.fulltext.delete(&doc.id)?;
        self.catalog.delete_document(&doc.id).await?;
        Ok(())
    }

    /// Chunk, embed, and store vectors for a document. Failures are local:
    /// they are reported and leave the document without embeddings.
    pub async fn embed_document(&self, doc: &Document) {
        let (Some(vectors), Some(embedder)) = (&self.vectors, &self.embedder) else {
            return;
        };
        embed_document_inner(
            &self.catalog,
            vectors,
            embedder.as_ref(),
            self.progress.as_deref(),
            doc,
        )
        .await;
    }

    /// Persist the vector index. Call after an indexing run completes.
    pub fn save_vectors(&self) -> Result<()> {
        if let Some(vectors) = &self.vectors {
            vectors.save()?;
        }
        Ok(())
    }
}

struct WorkerContext {
    catalog: Arc<Catalog>,
    fulltext: Arc<FulltextIndex>,
    vectors: Option<Arc<VectorIndex>>,
    embedder: Option<Arc<dyn Embedder>>,
    source: Arc<dyn Source>,
    progress: Option<Arc<dyn ProgressReporter>>,
    processed: Arc<AtomicU64>,
    indexed: Arc<AtomicU64>,
    errors: Arc<AtomicU64>,
    total: usize,
    cancel: CancellationToken,
}

impl WorkerContext {
    async fn process(&self, file: FileInfo) {
        let source_name = self.source.name().to_string();

        let current = self.processed.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(progress) = &self.progress {
            progress.on_progress(&source_name, current as usize, self.total, &file.path);
        }

        // Incremental skip: an up-to-date document needs no work.
        if let Ok(existing) = self.catalog.get_document_by_path(&file.path).await {
            if existing.modified_at.timestamp() >= file.modified_at {
                self.indexed.fetch_add(1, Ordering::Relaxed);
                return;
            }
        }

        let doc = match self.source.parse(&file).await {
            Ok(doc) => doc,
            Err(e) => {
                self.report_error(&source_name, &file.path, &e);
                return;
            }
        };

        if let Err(e) = self.catalog.put_document(&doc).await {
            self.report_error(&source_name, &file.path, &e);
            return;
        }
        if let Err(e) = self.fulltext.index(&doc) {
            self.report_error(&source_name, &file.path, &e);
            return;
        }

        if self.vectors.is_some() && self.embedder.is_some() {
            self.embed(&doc).await;
        }

        self.indexed.fetch_add(1, Ordering::Relaxed);
    }

    fn report_error(&self, source: &str, path: &str, error: &Error) {
        if let Some(progress) = &self.progress {
            progress.on_error(source, path, error);
        }
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Same flow as [`Indexer::embed_document`], run from a worker.
    async fn embed(&self, doc: &Document) {
        let (Some(vectors), Some(embedder)) = (&self.vectors, &self.embedder) else {
            return;
        };
        embed_document_inner(
            &self.catalog,
            vectors,
            embedder.as_ref(),
            self.progress.as_deref(),
            doc,
        )
        .await;
    }
}

/// Re-embed one document: drop stale vectors and chunks, chunk the content,
/// call the embedding backend once, then store chunks and vectors.
///
/// After success the number of vectors keyed `<doc.id>:*` equals the number
/// of stored chunks.
async fn embed_document_inner(
    catalog: &Catalog,
    vectors: &VectorIndex,
    embedder: &dyn Embedder,
    progress: Option<&dyn ProgressReporter>,
    doc: &Document,
) {
    // Chunk keys are authoritative for vector cleanup: read the stored
    // chunks, drop their vectors, then drop the rows.
    let existing = catalog
        .get_chunks_by_document(&doc.id)
        .await
        .unwrap_or_default();
    for chunk in &existing {
        if let Err(e) = vectors.delete(&chunk.id) {
            tracing::warn!("deleting stale vector {}: {e}", chunk.id);
        }
    }
    if let Err(e) = catalog.delete_chunks_by_document(&doc.id).await {
        tracing::warn!("deleting stale chunks for {}: {e}", doc.id);
    }

    let spans = chunker::split(&doc.content, chunker::Options::default());
    if spans.is_empty() {
        return;
    }

    let texts: Vec<String> = spans.iter().map(|s| s.content.clone()).collect();
    let keys: Vec<String> = (0..spans.len()).map(|i| Chunk::key(&doc.id, i)).collect();

    let embeddings = match embedder.embed_batch(&texts).await {
        Ok(embeddings) => embeddings,
        Err(e) => {
            if let Some(progress) = progress {
                progress.on_error(doc.source.as_str(), &doc.path, &e);
            }
            tracing::warn!("generating embeddings for {}: {e}", doc.path);
            return;
        }
    };

    for (i, span) in spans.iter().enumerate() {
        let chunk = Chunk {
            id: keys[i].clone(),
            document_id: doc.id.clone(),
            content: span.content.clone(),
            start_pos: span.start_pos,
            end_pos: span.end_pos,
        };
        if let Err(e) = catalog.insert_chunk(&chunk).await {
            tracing::warn!("storing chunk {}: {e}", chunk.id);
        }
    }

    if let Err(e) = vectors.add_batch(&keys, &embeddings) {
        tracing::warn!("storing vectors for {}: {e}", doc.id);
    }
}
