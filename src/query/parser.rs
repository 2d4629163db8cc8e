/// Natural-language query analysis
///
/// Extracts intent, source, and time filters from a user query with simple
/// deterministic heuristics. No I/O; matching happens on a lowercased copy
/// while the original text is preserved.
use crate::types::SourceKind;

/// What the user wants to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryIntent {
    Search,
    Summarize,
    Answer,
}

/// An analyzed query with extracted intent and filters
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedQuery {
    pub original: String,
    pub intent: QueryIntent,
    /// Residual terms for keyword/vector search
    pub search_terms: String,
    pub source_filter: Option<SourceKind>,
    /// Extracted time reference (e.g. "last week")
    pub time_filter: Option<String>,
}

/// Phrases that select a source, first match wins
const SOURCE_KEYWORDS: [(&str, SourceKind); 8] = [
    ("in my notes", SourceKind::Markdown),
    ("in my emails", SourceKind::Email),
    ("in emails", SourceKind::Email),
    ("from browser", SourceKind::Browser),
    ("in browser", SourceKind::Browser),
    ("from clipboard", SourceKind::Clipboard),
    ("in pdfs", SourceKind::Pdf),
    ("in pdf", SourceKind::Pdf),
];

/// Recognized time references, first match wins
const TIME_KEYWORDS: [&str; 7] = [
    "last week",
    "last month",
    "yesterday",
    "today",
    "this week",
    "this month",
    "last year",
];

/// Analyze a query string. Pure and deterministic.
pub fn parse_query(query: &str) -> ParsedQuery {
    let original = query.trim().to_string();
    let lower = original.to_lowercase();

    let mut intent = QueryIntent::Search;
    let mut search_terms = lower.clone();

    if lower.starts_with("summarize ") || lower.starts_with("summary of ") {
        intent = QueryIntent::Summarize;
        let stripped = lower.strip_prefix("summarize ").unwrap_or(&lower);
        let stripped = stripped.strip_prefix("summary of ").unwrap_or(stripped);
        search_terms = stripped.to_string();
    } else if ["what ", "how ", "why ", "when ", "who ", "tell me "]
        .iter()
        .any(|prefix| lower.starts_with(prefix))
    {
        intent = QueryIntent::Answer;
    }

    let mut source_filter = None;
    for (phrase, kind) in SOURCE_KEYWORDS {
        if search_terms.contains(phrase) {
            source_filter = Some(kind);
            search_terms = search_terms.replacen(phrase, "", 1);
            break;
        }
    }

    let mut time_filter = None;
    for keyword in TIME_KEYWORDS {
        if search_terms.contains(keyword) {
            time_filter = Some(keyword.to_string());
            search_terms = search_terms.replacen(keyword, "", 1);
            break;
        }
    }

    ParsedQuery {
        original,
        intent,
        search_terms: search_terms.trim().to_string(),
        source_filter,
        time_filter,
    }
}
