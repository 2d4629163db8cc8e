/// PDF document source
///
/// Extracts plain text with `pdf-extract` and indexes it as-is: the title
/// comes from the filename and the preview from the collapsed text.
/// Extraction runs on a blocking thread.
use crate::error::{Error, Result};
use crate::sources::scanner::ScanConfig;
use crate::sources::{content_hash, document_id, generate_preview, FileInfo, Scanner, Source};
use crate::types::{Document, SourceKind};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const PREVIEW_MAX_LEN: usize = 500;

/// Indexes PDF files from configured directories
pub struct PdfSource {
    scanner: Scanner,
}

impl PdfSource {
    pub fn new(paths: Vec<String>, ignore: Vec<String>) -> Self {
        Self {
            scanner: Scanner::new(ScanConfig {
                paths,
                extensions: vec![".pdf".to_string()],
                ignore,
            }),
        }
    }
}

#[async_trait]
impl Source for PdfSource {
    fn name(&self) -> SourceKind {
        SourceKind::Pdf
    }

    fn scan(
        &self,
        cancel: CancellationToken,
    ) -> (mpsc::Receiver<FileInfo>, mpsc::Receiver<Error>) {
        self.scanner.scan(cancel)
    }

    fn matches_path(&self, path: &str) -> bool {
        self.scanner.matches_path(path)
    }

    async fn parse(&self, file: &FileInfo) -> Result<Document> {
        let path = PathBuf::from(&file.path);
        let text = tokio::task::spawn_blocking(move || pdf_extract::extract_text(&path))
            .await
            .map_err(|e| Error::Other(format!("extraction task failed: {e}")))?
            .map_err(|e| Error::parse(&file.path, e))?;

        // The file's own modification time wins when it is still readable.
        let modified_at = std::fs::metadata(&file.path)
            .ok()
            .and_then(|m| m.modified().ok())
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| Utc.timestamp_opt(d.as_secs() as i64, 0).single())
            .flatten();

        Ok(build_pdf_document(file, &text, modified_at))
    }
}

/// Assemble a document from extracted PDF text.
fn build_pdf_document(
    file: &FileInfo,
    text: &str,
    modified_at: Option<DateTime<Utc>>,
) -> Document {
    let content = text.trim().to_string();

    let title = Path::new(&file.path)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| file.path.clone());

    Document {
        id: document_id(&file.path),
        source: SourceKind::Pdf,
        path: file.path.clone(),
        title,
        preview: generate_preview(&content, PREVIEW_MAX_LEN),
        content_hash: content_hash(&content),
        content,
        metadata: HashMap::new(),
        indexed_at: Utc::now(),
        modified_at: modified_at
            .or_else(|| Utc.timestamp_opt(file.modified_at, 0).single())
            .unwrap_or_else(Utc::now),
    }
}
