use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mindcli::embedding::{CachedEmbedder, Embedder, OllamaEmbedder};
use mindcli::error::Error;
use mindcli::export::{export_results, ExportFormat};
use mindcli::indexer::ProgressReporter;
use mindcli::{
    parse_query, Catalog, Config, FileWatcher, FulltextIndex, HybridSearcher, Indexer, LlmClient,
    SearchResult, VectorIndex,
};
use std::io::Write;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// mindcli: personal knowledge search over notes and documents
#[derive(Parser)]
#[command(name = "mindcli")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Local-first hybrid search over your personal knowledge base", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index all configured sources
    Index {
        /// Comma-separated paths to index (overrides the configured paths)
        #[arg(long)]
        paths: Option<String>,
        /// Keep watching for file changes after indexing
        #[arg(long)]
        watch: bool,
    },
    /// Watch configured paths and re-index on changes
    Watch,
    /// Search and print results
    Search {
        /// Query text
        query: Vec<String>,
        /// Maximum number of results
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Export search results
    Export {
        /// Query text
        query: Vec<String>,
        /// Output format: json, csv, or markdown
        #[arg(long, default_value = "json")]
        format: String,
        /// Output file (stdout when omitted)
        #[arg(long)]
        output: Option<std::path::PathBuf>,
        /// Maximum number of results
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Ask a question and stream a grounded answer
    Ask {
        /// Question text
        question: Vec<String>,
    },
    /// Manage document tags
    Tag {
        #[command(subcommand)]
        command: TagCommands,
    },
    /// Manage collections
    Collection {
        #[command(subcommand)]
        command: CollectionCommands,
    },
    /// Write the default config file
    Config,
    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum TagCommands {
    /// Add a tag to a document (by path)
    Add { path: String, tag: String },
    /// Remove a manual tag from a document (by path)
    Rm { path: String, tag: String },
    /// List tags of a document, or all tags
    List { path: Option<String> },
}

#[derive(Subcommand)]
enum CollectionCommands {
    /// Create a collection
    Create {
        name: String,
        #[arg(long, default_value = "")]
        description: String,
    },
    /// List collections
    List,
    /// Delete a collection by name
    Delete { name: String },
    /// Rename a collection
    Rename { name: String, new_name: String },
    /// Add a document (by path) to a collection
    Add { name: String, path: String },
    /// Remove a document (by path) from a collection
    Rm { name: String, path: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Index { paths, watch } => run_index(paths, watch).await,
        Commands::Watch => run_watch().await,
        Commands::Search { query, limit } => run_search(query.join(" "), limit).await,
        Commands::Export {
            query,
            format,
            output,
            limit,
        } => run_export(query.join(" "), &format, output, limit).await,
        Commands::Ask { question } => run_ask(question.join(" ")).await,
        Commands::Tag { command } => run_tag(command).await,
        Commands::Collection { command } => run_collection(command).await,
        Commands::Config => run_config_init(),
        Commands::Version => {
            println!("mindcli {}", env!("CARGO_PKG_VERSION"));
            println!("config: {}", Config::default_config_path().display());
            Ok(())
        }
    }
}

fn load_config() -> Result<Config> {
    let config = Config::load_or_default().context("loading config")?;
    config.validate().context("invalid configuration")?;
    Ok(config)
}

/// Cancel the returned token on Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\ninterrupted, shutting down...");
            token.cancel();
        }
    });
    cancel
}

async fn open_catalog_and_index(config: &Config) -> Result<(Arc<Catalog>, Arc<FulltextIndex>)> {
    let catalog = Arc::new(
        Catalog::open(&config.database_path()?)
            .await
            .context("opening catalog")?,
    );
    let fulltext = Arc::new(
        FulltextIndex::open(&config.search_index_path()?).context("opening search index")?,
    );
    Ok((catalog, fulltext))
}

/// Open the vector store and embedding gateway. Both are optional: any
/// failure prints a warning and the caller proceeds keyword-only.
async fn open_vector_stack(
    config: &Config,
    probe_backend: bool,
) -> (Option<Arc<VectorIndex>>, Option<Arc<dyn Embedder>>) {
    let vectors = match config
        .vector_index_path()
        .and_then(|path| VectorIndex::open(&path))
    {
        Ok(vectors) => Some(Arc::new(vectors)),
        Err(e) => {
            eprintln!("warning: vector store unavailable: {e}");
            None
        }
    };

    let embedder: Option<Arc<dyn Embedder>> = match build_embedder(config).await {
        Ok(embedder) => {
            if probe_backend {
                // One cheap call to find out whether Ollama is reachable.
                if let Err(e) = embedder.embed("ping").await {
                    eprintln!("warning: embedding backend unavailable, skipping embeddings: {e}");
                    None
                } else {
                    Some(embedder)
                }
            } else {
                Some(embedder)
            }
        }
        Err(e) => {
            eprintln!("warning: embedding gateway unavailable: {e}");
            None
        }
    };

    (vectors, embedder)
}

async fn build_embedder(config: &Config) -> mindcli::Result<Arc<dyn Embedder>> {
    let ollama = Arc::new(OllamaEmbedder::new(
        &config.embeddings.ollama_url,
        &config.embeddings.model,
    )?);
    match CachedEmbedder::open(ollama.clone(), &config.embedding_cache_path()?).await {
        Ok(cached) => Ok(Arc::new(cached)),
        Err(e) => {
            eprintln!("warning: embedding cache unavailable: {e}");
            Ok(ollama)
        }
    }
}

/// Prints per-source progress to the terminal
struct ConsoleProgressReporter;

impl ProgressReporter for ConsoleProgressReporter {
    fn on_start(&self, source: &str, total: usize) {
        println!("{source}: indexing {total} files");
    }

    fn on_progress(&self, source: &str, current: usize, total: usize, _path: &str) {
        if current == total || current % 50 == 0 {
            println!("{source}: {current}/{total}");
        }
    }

    fn on_complete(&self, source: &str, indexed: usize, errors: usize) {
        println!("{source}: done ({indexed} indexed, {errors} errors)");
    }

    fn on_error(&self, source: &str, path: &str, error: &Error) {
        eprintln!("{source}: {path}: {error}");
    }
}

async fn run_index(paths_override: Option<String>, watch: bool) -> Result<()> {
    let mut config = load_config()?;
    if let Some(paths) = paths_override {
        config.sources.markdown.paths = paths.split(',').map(|p| p.trim().to_string()).collect();
    }

    let (catalog, fulltext) = open_catalog_and_index(&config).await?;
    let (vectors, embedder) = open_vector_stack(&config, true).await;

    let mut indexer = Indexer::from_config(
        catalog.clone(),
        fulltext.clone(),
        vectors.clone(),
        embedder,
        &config,
    );
    indexer.set_progress_reporter(Arc::new(ConsoleProgressReporter));
    let indexer = Arc::new(indexer);

    let cancel = cancel_on_ctrl_c();
    let stats = indexer.index_all(&cancel).await.context("indexing")?;

    if let Err(e) = indexer.save_vectors() {
        eprintln!("warning: saving vectors: {e}");
    }

    println!("\nIndexing complete:");
    println!("  Total files:   {}", stats.total_files);
    println!("  Indexed:       {}", stats.indexed_files);
    println!("  Errors:        {}", stats.errors);
    if let Some(vectors) = &vectors {
        println!("  Vectors:       {}", vectors.len());
    }

    if watch {
        start_watching(indexer, &config, &cancel).await?;
    }

    catalog.close().await;
    Ok(())
}

async fn run_watch() -> Result<()> {
    let config = load_config()?;
    let (catalog, fulltext) = open_catalog_and_index(&config).await?;
    let (vectors, embedder) = open_vector_stack(&config, true).await;

    let indexer = Arc::new(Indexer::from_config(
        catalog.clone(),
        fulltext,
        vectors,
        embedder,
        &config,
    ));

    let cancel = cancel_on_ctrl_c();
    start_watching(indexer, &config, &cancel).await?;
    catalog.close().await;
    Ok(())
}

async fn start_watching(
    indexer: Arc<Indexer>,
    config: &Config,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut paths = Vec::new();
    if config.sources.markdown.enabled {
        paths.extend(config.sources.markdown.paths.clone());
    }
    if config.sources.pdf.enabled {
        paths.extend(config.sources.pdf.paths.clone());
    }
    if paths.is_empty() {
        anyhow::bail!("no paths to watch");
    }

    println!("watching {} directories for changes (Ctrl-C to stop)...", paths.len());
    for path in &paths {
        println!("  {path}");
    }

    let watcher = FileWatcher::new(indexer.clone(), paths);
    watcher.start(cancel).await.context("watching")?;
    if let Err(e) = indexer.save_vectors() {
        eprintln!("warning: saving vectors: {e}");
    }
    Ok(())
}

/// Run a hybrid search for a raw query string.
async fn search(config: &Config, raw_query: &str, limit: usize) -> Result<Vec<SearchResult>> {
    let (catalog, fulltext) = open_catalog_and_index(config).await?;
    let (vectors, embedder) = open_vector_stack(config, false).await;

    let parsed = parse_query(raw_query);
    let mut query = parsed.search_terms.clone();
    if let Some(source) = parsed.source_filter {
        query.push_str(&format!(" source:{source}"));
    }

    let searcher = HybridSearcher::new(
        fulltext,
        vectors,
        embedder,
        catalog,
        config.search.hybrid_weight,
    );
    let results = searcher
        .search(&cancel_on_ctrl_c(), query.trim(), limit)
        .await
        .context("searching")?;
    Ok(results)
}

async fn run_search(query: String, limit: Option<usize>) -> Result<()> {
    let config = load_config()?;
    let limit = limit.unwrap_or(config.search.results_limit);
    let results = search(&config, &query, limit).await?;

    if results.is_empty() {
        println!("no results");
        return Ok(());
    }

    for (i, result) in results.iter().enumerate() {
        println!(
            "{:2}. [{}] {} ({:.4})",
            i + 1,
            result.document.source,
            result.document.title,
            result.score
        );
        println!("    {}", result.document.path);
        if !result.document.preview.is_empty() {
            let preview: String = result.document.preview.chars().take(120).collect();
            println!("    {preview}");
        }
    }
    Ok(())
}

async fn run_export(
    query: String,
    format: &str,
    output: Option<std::path::PathBuf>,
    limit: Option<usize>,
) -> Result<()> {
    let config = load_config()?;
    let format: ExportFormat = format.parse()?;
    let limit = limit.unwrap_or(config.search.results_limit);
    let results = search(&config, &query, limit).await?;

    match output {
        Some(path) => {
            let mut file = std::fs::File::create(&path)
                .with_context(|| format!("creating {}", path.display()))?;
            export_results(&mut file, &results, format)?;
            println!("exported {} results to {}", results.len(), path.display());
        }
        None => {
            let stdout = std::io::stdout();
            let mut handle = stdout.lock();
            export_results(&mut handle, &results, format)?;
        }
    }
    Ok(())
}

async fn run_ask(question: String) -> Result<()> {
    let config = load_config()?;
    let results = search(&config, &question, config.search.results_limit).await?;

    // Ground the answer in the top documents, capped to keep prompts small.
    let contexts: Vec<String> = results
        .iter()
        .take(5)
        .map(|r| {
            let content: String = r.document.content.chars().take(1000).collect();
            content
        })
        .collect();

    let llm = LlmClient::new(&config.embeddings.ollama_url, &config.embeddings.llm_model)?;
    let cancel = cancel_on_ctrl_c();

    let mut stdout = std::io::stdout();
    llm.generate_answer_stream(&cancel, &question, &contexts, |token, _done| {
        print!("{token}");
        let _ = stdout.flush();
    })
    .await
    .context("generating answer")?;
    println!();

    if !results.is_empty() {
        println!("\nBased on {} sources", contexts.len());
    }
    Ok(())
}

/// Resolve a document by path, falling back to treating the argument as an id.
async fn resolve_document(catalog: &Catalog, path_or_id: &str) -> Result<mindcli::Document> {
    match catalog.get_document_by_path(path_or_id).await {
        Ok(doc) => Ok(doc),
        Err(e) if e.is_not_found() => Ok(catalog.get_document(path_or_id).await?),
        Err(e) => Err(e.into()),
    }
}

async fn run_tag(command: TagCommands) -> Result<()> {
    let config = load_config()?;
    let catalog = Catalog::open(&config.database_path()?).await?;

    match command {
        TagCommands::Add { path, tag } => {
            let doc = resolve_document(&catalog, &path).await?;
            catalog.add_tag(&doc.id, &tag, true).await?;
            println!("tagged {} with '{tag}'", doc.title);
        }
        TagCommands::Rm { path, tag } => {
            let doc = resolve_document(&catalog, &path).await?;
            catalog.remove_manual_tag(&doc.id, &tag).await?;
            println!("removed '{tag}' from {}", doc.title);
        }
        TagCommands::List { path } => match path {
            Some(path) => {
                let doc = resolve_document(&catalog, &path).await?;
                for tag in catalog.get_tags(&doc.id).await? {
                    println!("{tag}");
                }
            }
            None => {
                for tag in catalog.list_all_tags().await? {
                    println!("{tag}");
                }
            }
        },
    }

    catalog.close().await;
    Ok(())
}

async fn run_collection(command: CollectionCommands) -> Result<()> {
    let config = load_config()?;
    let catalog = Catalog::open(&config.database_path()?).await?;

    match command {
        CollectionCommands::Create { name, description } => {
            let collection = catalog.create_collection(&name, &description, "").await?;
            println!("created collection '{}'", collection.name);
        }
        CollectionCommands::List => {
            for collection in catalog.list_collections().await? {
                let count = catalog.count_collection_documents(&collection.id).await?;
                println!("{} ({count} documents)", collection.name);
            }
        }
        CollectionCommands::Delete { name } => {
            catalog.delete_collection_by_name(&name).await?;
            println!("deleted collection '{name}'");
        }
        CollectionCommands::Rename { name, new_name } => {
            let collection = catalog.get_collection_by_name(&name).await?;
            catalog.rename_collection(&collection.id, &new_name).await?;
            println!("renamed '{name}' to '{new_name}'");
        }
        CollectionCommands::Add { name, path } => {
            let collection = catalog.get_collection_by_name(&name).await?;
            let doc = resolve_document(&catalog, &path).await?;
            catalog.add_to_collection(&collection.id, &doc.id).await?;
            println!("added {} to '{name}'", doc.title);
        }
        CollectionCommands::Rm { name, path } => {
            let collection = catalog.get_collection_by_name(&name).await?;
            let doc = resolve_document(&catalog, &path).await?;
            catalog
                .remove_from_collection(&collection.id, &doc.id)
                .await?;
            println!("removed {} from '{name}'", doc.title);
        }
    }

    catalog.close().await;
    Ok(())
}

fn run_config_init() -> Result<()> {
    let path = Config::default_config_path();
    if path.exists() {
        println!("config already exists at {}", path.display());
        return Ok(());
    }
    Config::default().save(&path).context("writing config")?;
    println!("wrote default config to {}", path.display());
    Ok(())
}
