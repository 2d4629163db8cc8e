/// Markdown and plain-text notes source
///
/// Extracts frontmatter, headings, inline `#tags`, and wiki/markdown links
/// into document metadata, and generates a plain-text preview.
use crate::error::{Error, Result};
use crate::sources::{document_id, FileInfo, Scanner, Source};
use crate::sources::scanner::ScanConfig;
use crate::types::{Document, SourceKind};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::OnceLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const PREVIEW_MAX_LEN: usize = 500;

fn frontmatter_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)^---\n(.+?)\n---\n?").expect("frontmatter regex"))
}

fn heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^(#{1,6})[ \t]+(.+)$").expect("heading regex"))
}

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:^|\s)#([a-zA-Z][a-zA-Z0-9_-]*)").expect("tag regex"))
}

fn wiki_link_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[\[([^\]]+)\]\]").expect("wiki link regex"))
}

fn md_link_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[([^\]]+)\]\(([^)]+)\)").expect("markdown link regex"))
}

/// Indexes markdown files from configured directories
pub struct MarkdownSource {
    scanner: Scanner,
}

impl MarkdownSource {
    pub fn new(paths: Vec<String>, extensions: Vec<String>, ignore: Vec<String>) -> Self {
        Self {
            scanner: Scanner::new(ScanConfig {
                paths,
                extensions,
                ignore,
            }),
        }
    }
}

#[async_trait]
impl Source for MarkdownSource {
    fn name(&self) -> SourceKind {
        SourceKind::Markdown
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
        let bytes = tokio::fs::read(&file.path)
            .await
            .map_err(|e| Error::parse(&file.path, e))?;
        let text = String::from_utf8_lossy(&bytes).to_string();

        let content_hash = crate::catalog::hex_encode(&Sha256::digest(&bytes));
        let parsed = parse_markdown(&text);

        let title = if parsed.title.is_empty() {
            std::path::Path::new(&file.path)
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| file.path.clone())
        } else {
            parsed.title
        };

        let mut metadata = HashMap::new();
        if !parsed.tags.is_empty() {
            metadata.insert("tags".to_string(), parsed.tags.join(","));
        }
        if !parsed.links.is_empty() {
            metadata.insert("links".to_string(), parsed.links.join(","));
        }
        if !parsed.headings.is_empty() {
            metadata.insert("headings".to_string(), parsed.headings.join(","));
        }
        for (key, value) in parsed.frontmatter {
            metadata.insert(format!("fm_{key}"), value);
        }

        let preview = create_preview(&parsed.body, PREVIEW_MAX_LEN);

        Ok(Document {
            id: document_id(&file.path),
            source: SourceKind::Markdown,
            path: file.path.clone(),
            title,
            content: parsed.body,
            preview,
            metadata,
            content_hash,
            indexed_at: Utc::now(),
            modified_at: Utc
                .timestamp_opt(file.modified_at, 0)
                .single()
                .unwrap_or_else(Utc::now),
        })
    }
}

/// Structured pieces of a markdown file
struct ParsedMarkdown {
    title: String,
    body: String,
    frontmatter: HashMap<String, String>,
    headings: Vec<String>,
    tags: Vec<String>,
    links: Vec<String>,
}

fn parse_markdown(content: &str) -> ParsedMarkdown {
    let mut result = ParsedMarkdown {
        title: String::new(),
        body: String::new(),
        frontmatter: HashMap::new(),
        headings: Vec::new(),
        tags: Vec::new(),
        links: Vec::new(),
    };

    let mut body = content;
    if let Some(m) = frontmatter_re().captures(content) {
        result.frontmatter = parse_frontmatter(m.get(1).map(|g| g.as_str()).unwrap_or(""));
        body = &content[m.get(0).map(|g| g.end()).unwrap_or(0)..];
        if let Some(title) = result.frontmatter.get("title") {
            result.title = title.clone();
        }
    }

    for captures in heading_re().captures_iter(body) {
        let level = captures.get(1).map(|g| g.as_str()).unwrap_or("");
        let heading = captures
            .get(2)
            .map(|g| g.as_str().trim().to_string())
            .unwrap_or_default();
        if result.title.is_empty() && level == "#" {
            result.title = heading.clone();
        }
        result.headings.push(heading);
    }

    let mut seen_tags = std::collections::HashSet::new();
    for captures in tag_re().captures_iter(body) {
        if let Some(tag) = captures.get(1) {
            let tag = tag.as_str().to_lowercase();
            if seen_tags.insert(tag.clone()) {
                result.tags.push(tag);
            }
        }
    }

    for captures in wiki_link_re().captures_iter(body) {
        if let Some(link) = captures.get(1) {
            result.links.push(link.as_str().to_string());
        }
    }
    for captures in md_link_re().captures_iter(body) {
        if let Some(url) = captures.get(2) {
            result.links.push(url.as_str().to_string());
        }
    }

    result.body = body.to_string();
    result
}

/// Parse simple `key: value` frontmatter lines. Nested YAML is not handled.
fn parse_frontmatter(content: &str) -> HashMap<String, String> {
    let mut result = HashMap::new();

    for line in content.lines() {
        let Some(idx) = line.find(':') else { continue };
        if idx == 0 {
            continue;
        }
        let key = line[..idx].trim();
        let mut value = line[idx + 1..].trim().trim_matches(|c| c == '"' || c == '\'');

        // Flatten simple inline arrays: [a, b, c]
        if value.starts_with('[') && value.ends_with(']') {
            value = value[1..value.len() - 1].trim();
        }

        if !key.is_empty() && !value.is_empty() {
            result.insert(key.to_string(), value.to_string());
        }
    }

    result
}

fn code_block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```.*?```").expect("code block regex"))
}

fn inline_code_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"`[^`]+`").expect("inline code regex"))
}

fn image_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"!\[[^\]]*\]\([^)]+\)").expect("image regex"))
}

fn emphasis_res() -> &'static [(Regex, &'static str)] {
    static RES: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    RES.get_or_init(|| {
        vec![
            (Regex::new(r"\*\*([^*]+)\*\*").expect("bold regex"), "$1"),
            (Regex::new(r"\*([^*]+)\*").expect("italic regex"), "$1"),
            (Regex::new(r"__([^_]+)__").expect("bold regex"), "$1"),
            (Regex::new(r"_([^_]+)_").expect("italic regex"), "$1"),
        ]
    })
}

fn whitespace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("whitespace regex"))
}

/// Strip markdown formatting and truncate to a word boundary.
fn create_preview(content: &str, max_len: usize) -> String {
    let mut preview = code_block_re().replace_all(content, "").to_string();
    preview = inline_code_re().replace_all(&preview, "").to_string();
    preview = image_re().replace_all(&preview, "").to_string();
    preview = md_link_re().replace_all(&preview, "$1").to_string();
    preview = wiki_link_re().replace_all(&preview, "$1").to_string();
    preview = heading_re().replace_all(&preview, "$2").to_string();
    for (re, replacement) in emphasis_res() {
        preview = re.replace_all(&preview, *replacement).to_string();
    }
    preview = whitespace_re().replace_all(&preview, " ").to_string();
    let mut preview = preview.trim().to_string();

    if preview.len() > max_len {
        let mut cut = max_len;
        while cut > 0 && !preview.is_char_boundary(cut) {
            cut -= 1;
        }
        let mut truncated = &preview[..cut];
        if let Some(last_space) = truncated.rfind(' ') {
            if last_space > max_len * 3 / 4 {
                truncated = &truncated[..last_space];
            }
        }
        preview = format!("{truncated}...");
    }

    preview
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source_for(dir: &std::path::Path) -> MarkdownSource {
        MarkdownSource::new(
            vec![dir.to_string_lossy().to_string()],
            vec![".md".to_string(), ".txt".to_string()],
            vec![".git".to_string()],
        )
    }

    async fn parse_file(dir: &tempfile::TempDir, name: &str, content: &str) -> Document {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        let source = source_for(dir.path());
        source
            .parse(&FileInfo {
                path: path.to_string_lossy().to_string(),
                modified_at: 1700000000,
                size: content.len() as u64,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_parse_title_from_h1() {
        let dir = tempfile::tempdir().unwrap();
        let doc = parse_file(&dir, "note.md", "# Go Programming\n\nGoroutines are cheap.").await;

        assert_eq!(doc.title, "Go Programming");
        assert_eq!(doc.source, SourceKind::Markdown);
        assert!(doc.content.contains("Goroutines"));
        assert_eq!(doc.modified_at.timestamp(), 1700000000);
    }

    #[tokio::test]
    async fn test_parse_title_from_frontmatter() {
        let dir = tempfile::tempdir().unwrap();
        let doc = parse_file(
            &dir,
            "note.md",
            "---\ntitle: My Custom Title\nauthor: someone\n---\n# Heading\n\nBody.",
        )
        .await;

        assert_eq!(doc.title, "My Custom Title");
        assert_eq!(doc.metadata.get("fm_author").unwrap(), "someone");
        // Frontmatter is stripped from the indexed body.
        assert!(!doc.content.contains("author:"));
    }

    #[tokio::test]
    async fn test_parse_title_falls_back_to_filename() {
        let dir = tempfile::tempdir().unwrap();
        let doc = parse_file(&dir, "meeting-notes.md", "Just some text without headings.").await;
        assert_eq!(doc.title, "meeting-notes");
    }

    #[tokio::test]
    async fn test_tags_extracted_lowercase_unique() {
        let dir = tempfile::tempdir().unwrap();
        let doc = parse_file(
            &dir,
            "note.md",
            "# Title\n\nWork on #Project and #project and #other-thing today.",
        )
        .await;

        assert_eq!(doc.metadata.get("tags").unwrap(), "project,other-thing");
    }

    #[tokio::test]
    async fn test_headings_collected() {
        let dir = tempfile::tempdir().unwrap();
        let doc = parse_file(
            &dir,
            "note.md",
            "# First\n\ntext\n\n## Second\n\nmore\n\n### Third",
        )
        .await;

        assert_eq!(doc.metadata.get("headings").unwrap(), "First,Second,Third");
    }

    #[tokio::test]
    async fn test_links_extracted() {
        let dir = tempfile::tempdir().unwrap();
        let doc = parse_file(
            &dir,
            "note.md",
            "# Links\n\nSee [[Other Note]] and [docs](https://example.com).",
        )
        .await;

        let links = doc.metadata.get("links").unwrap();
        assert!(links.contains("Other Note"));
        assert!(links.contains("https://example.com"));
    }

    #[tokio::test]
    async fn test_deterministic_id_and_content_hash() {
        let dir = tempfile::tempdir().unwrap();
        let first = parse_file(&dir, "note.md", "# Same").await;
        let second = parse_file(&dir, "note.md", "# Same").await;

        assert_eq!(first.id, second.id);
        assert_eq!(first.content_hash, second.content_hash);

        let other = parse_file(&dir, "other.md", "# Same").await;
        assert_ne!(first.id, other.id);
    }

    #[tokio::test]
    async fn test_parse_missing_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let source = source_for(dir.path());
        let err = source
            .parse(&FileInfo {
                path: dir.path().join("gone.md").to_string_lossy().to_string(),
                modified_at: 0,
                size: 0,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
    }

    #[test]
    fn test_preview_strips_formatting() {
        let preview = create_preview(
            "# Heading\n\nSome **bold** and *italic* text with `code` and a [link](https://x.example).\n\n```\nfenced code\n```",
            500,
        );
        assert!(!preview.contains('*'));
        assert!(!preview.contains('`'));
        assert!(!preview.contains("fenced"));
        assert!(preview.contains("bold"));
        assert!(preview.contains("link"));
    }

    #[test]
    fn test_preview_truncates_on_word_boundary() {
        let long = "word ".repeat(200);
        let preview = create_preview(&long, 500);
        assert!(preview.len() <= 504);
        assert!(preview.ends_with("..."));
        assert!(!preview.trim_end_matches("...").ends_with("wor"));
    }

    #[test]
    fn test_frontmatter_array_flattened() {
        let fm = parse_frontmatter("tags: [a, b, c]\nempty:\ntitle: \"Quoted\"");
        assert_eq!(fm.get("tags").unwrap(), "a, b, c");
        assert_eq!(fm.get("title").unwrap(), "Quoted");
        assert!(!fm.contains_key("empty"));
    }
}
