/// Centralized error types for mindcli using thiserror
///
/// Provides domain-specific error kinds so callers can distinguish local,
/// recoverable failures (a single document failing to parse) from fatal ones.
use thiserror::Error;

/// Main error type for the retrieval engine
#[derive(Error, Debug)]
pub enum Error {
    #[error("{0} not found")]
    NotFound(String),

    #[error("collection already exists: {0}")]
    CollectionExists(String),

    #[error("invalid configuration: {0}")]
    Validation(String),

    #[error("parsing {path}: {message}")]
    Parse { path: String, message: String },

    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("operation cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("search index error: {0}")]
    SearchIndex(#[from] tantivy::TantivyError),

    #[error("vector index error: {0}")]
    VectorIndex(String),

    #[error("{0}")]
    Other(String),
}

/// Errors from the HTTP embedding and LLM backends
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("request failed (is the server running at {base_url}?): {message}")]
    Network { base_url: String, message: String },

    #[error("server error: {0}")]
    Api(String),

    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed response: {0}")]
    InvalidResponse(String),

    #[error("expected {expected} embeddings, got {actual}")]
    CountMismatch { expected: usize, actual: usize },

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("response stream ended before completion")]
    TruncatedStream,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a NotFound error for the given entity description
    pub fn not_found(what: impl Into<String>) -> Self {
        Error::NotFound(what.into())
    }

    /// Create a Parse error for a specific path
    pub fn parse(path: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Error::Parse {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Check whether this error means "the thing does not exist"
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// Check whether this error was caused by cooperative cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        let base_url = err
            .url()
            .map(|u| u.as_str().to_string())
            .unwrap_or_default();
        Error::Backend(BackendError::Network {
            base_url,
            message: err.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::not_found("document abc123");
        assert_eq!(err.to_string(), "document abc123 not found");
        assert!(err.is_not_found());
    }

    #[test]
    fn test_collection_exists_display() {
        let err = Error::CollectionExists("work".to_string());
        assert_eq!(err.to_string(), "collection already exists: work");
    }

    #[test]
    fn test_backend_count_mismatch() {
        let err = Error::from(BackendError::CountMismatch {
            expected: 3,
            actual: 1,
        });
        assert_eq!(
            err.to_string(),
            "backend error: expected 3 embeddings, got 1"
        );
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_parse_error() {
        let err = Error::parse("/notes/a.md", "bad frontmatter");
        assert_eq!(err.to_string(), "parsing /notes/a.md: bad frontmatter");
    }

    #[test]
    fn test_cancelled() {
        assert!(Error::Cancelled.is_cancelled());
        assert!(!Error::Cancelled.is_not_found());
    }
}
