/// Configuration for mindcli
///
/// Loaded from a TOML file in the platform config directory, falling back to
/// defaults for anything missing. All values can also be set
/// programmatically; the configuration is validated once at load time and
/// then passed around by value.
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Data source configuration
    #[serde(default)]
    pub sources: SourcesConfig,

    /// Embedding and LLM backend configuration
    #[serde(default)]
    pub embeddings: EmbeddingsConfig,

    /// Search configuration
    #[serde(default)]
    pub search: SearchConfig,

    /// Indexing pipeline configuration
    #[serde(default)]
    pub indexing: IndexingConfig,

    /// Storage location configuration
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Which data sources to index
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SourcesConfig {
    #[serde(default)]
    pub markdown: MarkdownSourceConfig,
    #[serde(default)]
    pub pdf: PdfSourceConfig,
    #[serde(default)]
    pub email: EmailSourceConfig,
    #[serde(default)]
    pub browser: BrowserSourceConfig,
    #[serde(default)]
    pub clipboard: ClipboardSourceConfig,
}

/// Markdown/notes source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkdownSourceConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Directories (or single files) to scan; `~/` is expanded
    #[serde(default = "default_markdown_paths")]
    pub paths: Vec<String>,

    #[serde(default = "default_markdown_extensions")]
    pub extensions: Vec<String>,

    /// Directory or file names to skip while scanning
    #[serde(default = "default_ignore")]
    pub ignore: Vec<String>,
}

/// PDF source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PdfSourceConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_pdf_paths")]
    pub paths: Vec<String>,

    #[serde(default = "default_ignore")]
    pub ignore: Vec<String>,
}

/// Email source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailSourceConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub paths: Vec<String>,
}

/// Browser history source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserSourceConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_browsers")]
    pub browsers: Vec<String>,
}

/// Clipboard source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClipboardSourceConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_true")]
    pub skip_passwords: bool,
}

/// Embedding provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingsConfig {
    /// Embedding provider; only "ollama" is supported
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Embedding model name
    #[serde(default = "default_embed_model")]
    pub model: String,

    /// Text-generation model used for answers
    #[serde(default = "default_llm_model")]
    pub llm_model: String,

    /// Base URL of the Ollama server
    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,
}

/// Search behavior configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Balance between keyword and semantic ranking:
    /// 0 = pure BM25, 1 = pure vector
    #[serde(default = "default_hybrid_weight")]
    pub hybrid_weight: f64,

    /// Default number of results to return
    #[serde(default = "default_results_limit")]
    pub results_limit: usize,
}

/// Indexing pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingConfig {
    /// Number of indexing workers
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Keep watching for file changes after indexing
    #[serde(default)]
    pub watch: bool,
}

/// Where persistent state lives
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Data directory holding the catalog, indexes, and caches
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

fn default_true() -> bool {
    true
}

fn default_markdown_paths() -> Vec<String> {
    vec!["~/notes".to_string()]
}

fn default_markdown_extensions() -> Vec<String> {
    vec![".md".to_string(), ".txt".to_string()]
}

fn default_ignore() -> Vec<String> {
    vec![
        "node_modules".to_string(),
        ".git".to_string(),
        ".obsidian".to_string(),
    ]
}

fn default_pdf_paths() -> Vec<String> {
    vec!["~/Documents".to_string()]
}

fn default_browsers() -> Vec<String> {
    vec![
        "chrome".to_string(),
        "firefox".to_string(),
        "safari".to_string(),
    ]
}

fn default_provider() -> String {
    "ollama".to_string()
}

fn default_embed_model() -> String {
    "nomic-embed-text".to_string()
}

fn default_llm_model() -> String {
    "llama3.2".to_string()
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_hybrid_weight() -> f64 {
    0.5
}

fn default_results_limit() -> usize {
    50
}

fn default_workers() -> usize {
    4
}

fn default_storage_path() -> PathBuf {
    data_dir().join("mindcli")
}

impl Default for MarkdownSourceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            paths: default_markdown_paths(),
            extensions: default_markdown_extensions(),
            ignore: default_ignore(),
        }
    }
}

impl Default for PdfSourceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            paths: default_pdf_paths(),
            ignore: default_ignore(),
        }
    }
}

impl Default for EmailSourceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            paths: Vec::new(),
        }
    }
}

impl Default for BrowserSourceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            browsers: default_browsers(),
        }
    }
}

impl Default for ClipboardSourceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            skip_passwords: true,
        }
    }
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_embed_model(),
            llm_model: default_llm_model(),
            ollama_url: default_ollama_url(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            hybrid_weight: default_hybrid_weight(),
            results_limit: default_results_limit(),
        }
    }
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            watch: false,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Validation(format!("invalid TOML in {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the default location, or use defaults if no
    /// config file exists
    pub fn load_or_default() -> Result<Self> {
        let config_path = Self::default_config_path();
        if config_path.exists() {
            tracing::info!("loading config from {}", config_path.display());
            Self::from_file(&config_path)
        } else {
            tracing::debug!("no config file found, using defaults");
            Ok(Self::default())
        }
    }

    /// Save configuration to a file, creating parent directories as needed
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Other(format!("serializing config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Save to the default location
    pub fn save_default(&self) -> Result<()> {
        self.save(&Self::default_config_path())
    }

    /// Path to the config file in the platform config directory
    pub fn default_config_path() -> PathBuf {
        config_dir().join("mindcli").join("config.toml")
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.search.hybrid_weight) {
            return Err(Error::Validation(format!(
                "search.hybrid_weight must be between 0 and 1, got {}",
                self.search.hybrid_weight
            )));
        }
        if self.search.results_limit < 1 {
            return Err(Error::Validation(
                "search.results_limit must be at least 1".to_string(),
            ));
        }
        if self.indexing.workers < 1 {
            return Err(Error::Validation(
                "indexing.workers must be at least 1".to_string(),
            ));
        }
        if self.embeddings.provider != "ollama" {
            return Err(Error::Validation(format!(
                "embeddings.provider must be 'ollama', got '{}'",
                self.embeddings.provider
            )));
        }
        Ok(())
    }

    /// The data directory, created on first use
    pub fn data_dir(&self) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.storage.path)?;
        Ok(self.storage.path.clone())
    }

    /// Path to the catalog database
    pub fn database_path(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join("mindcli.db"))
    }

    /// Path to the full-text index directory
    pub fn search_index_path(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join("search.tantivy"))
    }

    /// Path to the vector index artifact
    pub fn vector_index_path(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join("vectors.graph"))
    }

    /// Path to the embedding cache database
    pub fn embedding_cache_path(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join("embeddings.db"))
    }
}

/// Platform data directory (XDG on Linux, Application Support on macOS)
fn data_dir() -> PathBuf {
    if cfg!(target_os = "macos") {
        std::env::var("HOME")
            .map(|home| PathBuf::from(home).join("Library/Application Support"))
            .unwrap_or_else(|_| PathBuf::from("."))
    } else {
        std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .or_else(|_| std::env::var("HOME").map(|home| PathBuf::from(home).join(".local/share")))
            .unwrap_or_else(|_| PathBuf::from("."))
    }
}

/// Platform config directory (XDG on Linux, Application Support on macOS)
fn config_dir() -> PathBuf {
    if cfg!(target_os = "macos") {
        std::env::var("HOME")
            .map(|home| PathBuf::from(home).join("Library/Application Support"))
            .unwrap_or_else(|_| PathBuf::from("."))
    } else {
        std::env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|_| std::env::var("HOME").map(|home| PathBuf::from(home).join(".config")))
            .unwrap_or_else(|_| PathBuf::from("."))
    }
}

/// Expand a leading `~/` to the user's home directory
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.search.hybrid_weight, 0.5);
        assert_eq!(config.indexing.workers, 4);
        assert!(config.sources.markdown.enabled);
    }

    #[test]
    fn test_hybrid_weight_out_of_range() {
        let mut config = Config::default();
        config.search.hybrid_weight = 1.5;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        config.search.hybrid_weight = -0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_workers_must_be_positive() {
        let mut config = Config::default();
        config.indexing.workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let mut config = Config::default();
        config.embeddings.provider = "openai".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [search]
            hybrid_weight = 0.7
            "#,
        )
        .unwrap();
        assert_eq!(config.search.hybrid_weight, 0.7);
        assert_eq!(config.search.results_limit, 50);
        assert_eq!(config.embeddings.provider, "ollama");
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.search.hybrid_weight = 0.25;
        config.storage.path = dir.path().join("data");
        config.save(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.search.hybrid_weight, 0.25);
        assert_eq!(loaded.storage.path, dir.path().join("data"));
    }

    #[test]
    fn test_expand_path() {
        std::env::set_var("HOME", "/home/tester");
        assert_eq!(expand_path("~/notes"), PathBuf::from("/home/tester/notes"));
        assert_eq!(expand_path("/abs/path"), PathBuf::from("/abs/path"));
    }

    #[test]
    fn test_storage_paths() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.storage.path = dir.path().join("data");

        assert!(config
            .database_path()
            .unwrap()
            .ends_with("data/mindcli.db"));
        assert!(config
            .vector_index_path()
            .unwrap()
            .ends_with("data/vectors.graph"));
        assert!(dir.path().join("data").is_dir());
    }
}
