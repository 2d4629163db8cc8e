/// Core data types shared across the catalog, indexes, and query layers
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// The kind of source a document came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Markdown,
    Pdf,
    Email,
    Browser,
    Clipboard,
}

impl SourceKind {
    /// Stable string form used in the catalog and the full-text index
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Markdown => "markdown",
            SourceKind::Pdf => "pdf",
            SourceKind::Email => "email",
            SourceKind::Browser => "browser",
            SourceKind::Clipboard => "clipboard",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "markdown" => Ok(SourceKind::Markdown),
            "pdf" => Ok(SourceKind::Pdf),
            "email" => Ok(SourceKind::Email),
            "browser" => Ok(SourceKind::Browser),
            "clipboard" => Ok(SourceKind::Clipboard),
            other => Err(crate::error::Error::Validation(format!(
                "unknown source kind: {other}"
            ))),
        }
    }
}

/// An indexed document
///
/// `id` is a deterministic function of the canonical path; `(source, path)`
/// is unique. `content_hash` covers `content` only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub source: SourceKind,
    pub path: String,
    pub title: String,
    pub content: String,
    pub preview: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
    pub content_hash: String,
    pub indexed_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl Document {
    /// Serialize the metadata map to JSON for storage
    pub fn metadata_json(&self) -> String {
        if self.metadata.is_empty() {
            return "{}".to_string();
        }
        serde_json::to_string(&self.metadata).unwrap_or_else(|_| "{}".to_string())
    }

    /// Replace the metadata map from its stored JSON form
    pub fn set_metadata_from_json(&mut self, json: &str) -> serde_json::Result<()> {
        if json.is_empty() || json == "{}" {
            self.metadata = HashMap::new();
            return Ok(());
        }
        self.metadata = serde_json::from_str(json)?;
        Ok(())
    }
}

/// A chunk of a document's content, the unit of embedding
///
/// `id` has the form `"<document_id>:<chunk_index>"`. Positions are byte
/// offsets into the chunked content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub content: String,
    pub start_pos: usize,
    pub end_pos: usize,
}

impl Chunk {
    /// Build the vector-index key for a chunk of the given document
    pub fn key(document_id: &str, index: usize) -> String {
        format!("{document_id}:{index}")
    }
}

/// A named group of documents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub query: String,
    pub created_at: DateTime<Utc>,
}

/// A search result with scoring information
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub document: Document,
    /// Fused relevance score (RRF for hybrid, BM25 otherwise)
    pub score: f64,
    #[serde(skip_serializing_if = "is_zero")]
    pub bm25_score: f64,
    #[serde(skip_serializing_if = "is_zero")]
    pub vector_score: f64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub highlights: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_id: Option<String>,
}

fn is_zero(v: &f64) -> bool {
    *v == 0.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_document() -> Document {
        Document {
            id: "abc123".to_string(),
            source: SourceKind::Markdown,
            path: "/notes/test.md".to_string(),
            title: "Test".to_string(),
            content: "Hello world".to_string(),
            preview: "Hello world".to_string(),
            metadata: HashMap::new(),
            content_hash: "deadbeef".to_string(),
            indexed_at: Utc::now(),
            modified_at: Utc::now(),
        }
    }

    #[test]
    fn test_source_kind_round_trip() {
        for kind in [
            SourceKind::Markdown,
            SourceKind::Pdf,
            SourceKind::Email,
            SourceKind::Browser,
            SourceKind::Clipboard,
        ] {
            assert_eq!(kind.as_str().parse::<SourceKind>().unwrap(), kind);
        }
        assert!("usenet".parse::<SourceKind>().is_err());
    }

    #[test]
    fn test_metadata_json_empty() {
        let doc = sample_document();
        assert_eq!(doc.metadata_json(), "{}");
    }

    #[test]
    fn test_metadata_json_round_trip() {
        let mut doc = sample_document();
        doc.metadata.insert("tags".to_string(), "go,rust".to_string());
        let json = doc.metadata_json();

        let mut restored = sample_document();
        restored.set_metadata_from_json(&json).unwrap();
        assert_eq!(restored.metadata.get("tags").unwrap(), "go,rust");
    }

    #[test]
    fn test_set_metadata_from_empty_json() {
        let mut doc = sample_document();
        doc.metadata.insert("k".to_string(), "v".to_string());
        doc.set_metadata_from_json("{}").unwrap();
        assert!(doc.metadata.is_empty());
    }

    #[test]
    fn test_chunk_key_format() {
        assert_eq!(Chunk::key("doc1", 0), "doc1:0");
        assert_eq!(Chunk::key("doc1", 12), "doc1:12");
    }
}
