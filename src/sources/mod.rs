/// Document sources
///
/// A [`Source`] enumerates candidate records and parses one record into a
/// [`Document`]. Concrete sources are injected into the indexer: markdown
/// notes, PDFs, email archives, browser history, and the clipboard, plus
/// the generic filesystem [`Scanner`] the file-based ones share. Virtual
/// sources synthesize opaque but stable paths (e.g. `clipboard:<hash>`).
mod browser;
mod clipboard;
mod email;
mod markdown;
mod pdf;
mod scanner;

pub use browser::BrowserSource;
pub use clipboard::ClipboardSource;
pub use email::EmailSource;
pub use markdown::MarkdownSource;
pub use pdf::PdfSource;
pub use scanner::Scanner;

use crate::error::{Error, Result};
use crate::types::{Document, SourceKind};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// A file (or virtual record) to be indexed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub path: String,
    /// Unix timestamp of last modification
    pub modified_at: i64,
    pub size: u64,
}

/// A source of indexable documents
#[async_trait]
pub trait Source: Send + Sync {
    /// The source kind (e.g. markdown, pdf).
    fn name(&self) -> SourceKind;

    /// Walk the configured inputs and stream candidate records. Both
    /// streams are finite; cancellation closes them promptly.
    fn scan(
        &self,
        cancel: CancellationToken,
    ) -> (mpsc::Receiver<FileInfo>, mpsc::Receiver<Error>);

    /// Whether this source owns the given path. Used for targeted
    /// re-indexing, notably with virtual sources.
    fn matches_path(&self, path: &str) -> bool;

    /// Read one record and produce a populated document. The document id
    /// must be a deterministic function of the canonical path.
    async fn parse(&self, file: &FileInfo) -> Result<Document>;
}

/// Derive the stable document id for a canonical path.
pub fn document_id(path: &str) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(path.as_bytes());
    crate::catalog::hex_encode(&digest[..16])
}

/// Hash document content for change detection.
pub fn content_hash(content: &str) -> String {
    use sha2::{Digest, Sha256};
    crate::catalog::hex_encode(&Sha256::digest(content.as_bytes()))
}

/// Collapse whitespace and truncate content at a word boundary for a
/// plain-text preview.
pub(crate) fn generate_preview(content: &str, max_len: usize) -> String {
    let collapsed: String = content.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.len() <= max_len {
        return collapsed;
    }

    let mut cut = max_len;
    while cut > 0 && !collapsed.is_char_boundary(cut) {
        cut -= 1;
    }
    let mut truncated = &collapsed[..cut];
    if let Some(last_space) = truncated.rfind(' ') {
        if last_space > max_len / 2 {
            truncated = &truncated[..last_space];
        }
    }
    format!("{truncated}...")
}
