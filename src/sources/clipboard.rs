/// Clipboard history source
///
/// Treats the current clipboard text as a virtual record with a stable
/// synthetic path `clipboard:<hash>`, so re-indexing the same clip is a
/// no-op. Likely passwords can be skipped by heuristic.
use crate::error::{Error, Result};
use crate::sources::{content_hash, generate_preview, FileInfo, Source};
use crate::types::{Document, SourceKind};
use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const PREVIEW_MAX_LEN: usize = 500;
const TITLE_MAX_LEN: usize = 100;

/// Indexes the system clipboard
pub struct ClipboardSource {
    skip_passwords: bool,
}

impl ClipboardSource {
    pub fn new(skip_passwords: bool) -> Self {
        Self { skip_passwords }
    }

    fn read_clipboard() -> Result<String> {
        let mut clipboard = arboard::Clipboard::new()
            .map_err(|e| Error::Other(format!("opening clipboard: {e}")))?;
        let text = clipboard
            .get_text()
            .map_err(|e| Error::Other(format!("reading clipboard: {e}")))?;
        Ok(text.trim().to_string())
    }
}

#[async_trait]
impl Source for ClipboardSource {
    fn name(&self) -> SourceKind {
        SourceKind::Clipboard
    }

    fn scan(
        &self,
        cancel: CancellationToken,
    ) -> (mpsc::Receiver<FileInfo>, mpsc::Receiver<Error>) {
        let (file_tx, file_rx) = mpsc::channel(1);
        let (err_tx, err_rx) = mpsc::channel(1);
        let skip_passwords = self.skip_passwords;

        tokio::task::spawn_blocking(move || {
            if cancel.is_cancelled() {
                return;
            }
            let text = match Self::read_clipboard() {
                Ok(text) => text,
                Err(e) => {
                    let _ = err_tx.blocking_send(e);
                    return;
                }
            };
            if text.is_empty() {
                return;
            }
            if skip_passwords && looks_like_password(&text) {
                return;
            }

            let info = FileInfo {
                path: clip_path(&text),
                modified_at: Utc::now().timestamp(),
                size: text.len() as u64,
            };
            let _ = file_tx.blocking_send(info);
        });

        (file_rx, err_rx)
    }

    fn matches_path(&self, path: &str) -> bool {
        path.starts_with("clipboard:")
    }

    async fn parse(&self, file: &FileInfo) -> Result<Document> {
        let text = tokio::task::spawn_blocking(Self::read_clipboard)
            .await
            .map_err(|e| Error::Other(format!("clipboard task failed: {e}")))??;
        if text.is_empty() {
            return Err(Error::parse(&file.path, "clipboard is empty"));
        }

        let mut title = first_line(&text).to_string();
        if title.len() > TITLE_MAX_LEN {
            let mut cut = TITLE_MAX_LEN - 3;
            while cut > 0 && !title.is_char_boundary(cut) {
                cut -= 1;
            }
            title = format!("{}...", &title[..cut]);
        }

        let now = Utc::now();
        Ok(Document {
            id: clip_id(&text),
            source: SourceKind::Clipboard,
            path: clip_path(&text),
            title,
            preview: generate_preview(&text, PREVIEW_MAX_LEN),
            content_hash: content_hash(&text),
            content: text,
            metadata: HashMap::new(),
            indexed_at: now,
            modified_at: now,
        })
    }
}

/// Short content hash used as both the document id and the virtual path.
fn clip_id(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    crate::catalog::hex_encode(&digest[..8])
}

fn clip_path(text: &str) -> String {
    format!("clipboard:{}", clip_id(text))
}

fn first_line(text: &str) -> &str {
    match text.find('\n') {
        Some(idx) => text[..idx].trim(),
        None => text,
    }
}

/// Single-line, space-free strings mixing three or more character classes
/// are probably passwords.
fn looks_like_password(text: &str) -> bool {
    if text.contains('\n') || text.contains(' ') {
        return false;
    }
    if text.len() < 8 || text.len() > 128 {
        return false;
    }

    let mut has_upper = false;
    let mut has_lower = false;
    let mut has_digit = false;
    let mut has_special = false;
    for c in text.chars() {
        match c {
            'A'..='Z' => has_upper = true,
            'a'..='z' => has_lower = true,
            '0'..='9' => has_digit = true,
            _ => has_special = true,
        }
    }

    [has_upper, has_lower, has_digit, has_special]
        .iter()
        .filter(|&&b| b)
        .count()
        >= 3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_looks_like_password() {
        assert!(looks_like_password("Aa1!secret"));
        assert!(looks_like_password("Xk9$mPq2vL"));
        assert!(!looks_like_password("just some words"));
        assert!(!looks_like_password("short1A"));
        assert!(!looks_like_password("alllowercaseletters"));
        assert!(!looks_like_password("line\nAa1!break"));
    }

    #[test]
    fn test_first_line() {
        assert_eq!(first_line("single"), "single");
        assert_eq!(first_line("first\nsecond"), "first");
        assert_eq!(first_line("  padded  \nrest"), "padded");
    }

    #[test]
    fn test_clip_path_is_stable() {
        assert_eq!(clip_path("hello"), clip_path("hello"));
        assert_ne!(clip_path("hello"), clip_path("world"));
        assert!(clip_path("hello").starts_with("clipboard:"));
        // 8 bytes hex-encoded after the scheme.
        assert_eq!(clip_path("hello").len(), "clipboard:".len() + 16);
    }

    #[test]
    fn test_matches_path() {
        let source = ClipboardSource::new(true);
        assert!(source.matches_path("clipboard:abcdef0123456789"));
        assert!(!source.matches_path("/notes/a.md"));
    }
}
