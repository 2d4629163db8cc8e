//! End-to-end tests over the real markdown source, catalog, and full-text
//! index. The vector stack is exercised separately (its FFI layer is not
//! reliable under test runners), so these runs are keyword-only.
use mindcli::sources::MarkdownSource;
use mindcli::{Catalog, FulltextIndex, HybridSearcher, Indexer};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

struct Fixture {
    _tmp: tempfile::TempDir,
    notes_dir: std::path::PathBuf,
    catalog: Arc<Catalog>,
    fulltext: Arc<FulltextIndex>,
    indexer: Indexer,
}

async fn fixture() -> Fixture {
    let tmp = tempfile::tempdir().unwrap();
    let notes_dir = tmp.path().join("notes");
    std::fs::create_dir(&notes_dir).unwrap();

    let catalog = Arc::new(Catalog::open(&tmp.path().join("mindcli.db")).await.unwrap());
    let fulltext = Arc::new(FulltextIndex::open(&tmp.path().join("search.tantivy")).unwrap());

    let source = Arc::new(MarkdownSource::new(
        vec![notes_dir.to_string_lossy().to_string()],
        vec![".md".to_string(), ".txt".to_string()],
        vec![".git".to_string(), "node_modules".to_string()],
    ));
    let indexer = Indexer::new(
        catalog.clone(),
        fulltext.clone(),
        None,
        None,
        vec![source],
        4,
    );

    Fixture {
        _tmp: tmp,
        notes_dir,
        catalog,
        fulltext,
        indexer,
    }
}

fn write_note(fixture: &Fixture, name: &str, content: &str) -> std::path::PathBuf {
    let path = fixture.notes_dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}

#[tokio::test]
async fn test_markdown_indexing_end_to_end() {
    let fixture = fixture().await;
    write_note(&fixture, "go.md", "# Go Programming\n\nGoroutines...");
    write_note(&fixture, "python.md", "# Python Basics\n\nPython...");
    write_note(&fixture, "go-advanced.md", "# Advanced Go\n\nChannels...");

    let stats = fixture
        .indexer
        .index_all(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(stats.total_files, 3);
    assert_eq!(stats.indexed_files, 3);
    assert_eq!(stats.errors, 0);
    assert_eq!(fixture.catalog.count_documents(None).await.unwrap(), 3);

    let results = fixture.fulltext.search("Go", 10).unwrap();
    assert_eq!(results.len(), 2);
    let mut titles = Vec::new();
    for result in &results {
        let doc = fixture.catalog.get_document(&result.id).await.unwrap();
        titles.push(doc.title);
    }
    assert!(titles.contains(&"Go Programming".to_string()));
    assert!(titles.contains(&"Advanced Go".to_string()));
}

#[tokio::test]
async fn test_incremental_skip_and_reindex() {
    let fixture = fixture().await;
    let path = write_note(&fixture, "note.md", "# Note\n\nOriginal body.");

    let stats = fixture
        .indexer
        .index_all(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(stats.indexed_files, 1);

    let doc = fixture
        .catalog
        .get_document_by_path(&path.to_string_lossy())
        .await
        .unwrap();
    let first_indexed_at = doc.indexed_at;

    // Unchanged re-run: counted as indexed, but not re-parsed.
    let stats = fixture
        .indexer
        .index_all(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(stats.indexed_files, 1);
    assert_eq!(stats.errors, 0);
    let doc = fixture
        .catalog
        .get_document_by_path(&path.to_string_lossy())
        .await
        .unwrap();
    assert_eq!(doc.indexed_at, first_indexed_at);
    assert!(doc.content.contains("Original body"));

    // Touch the file past the stored modification time.
    tokio::time::sleep(Duration::from_millis(1100)).await;
    std::fs::write(&path, "# Note\n\nRewritten body.").unwrap();

    let stats = fixture
        .indexer
        .index_all(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(stats.indexed_files, 1);
    let doc = fixture
        .catalog
        .get_document_by_path(&path.to_string_lossy())
        .await
        .unwrap();
    assert!(doc.content.contains("Rewritten body"));
    assert!(doc.indexed_at > first_indexed_at);
}

#[tokio::test]
async fn test_hybrid_search_keyword_path() {
    let fixture = fixture().await;
    write_note(
        &fixture,
        "concurrency.md",
        "# Concurrency Patterns\n\nWorker pools and channels. #engineering",
    );
    write_note(&fixture, "cooking.md", "# Pasta\n\nBoil water, add salt.");

    fixture
        .indexer
        .index_all(&CancellationToken::new())
        .await
        .unwrap();

    let searcher = HybridSearcher::new(
        fixture.fulltext.clone(),
        None,
        None,
        fixture.catalog.clone(),
        0.5,
    );
    let results = searcher
        .search(&CancellationToken::new(), "worker pools", 10)
        .await
        .unwrap();

    assert!(!results.is_empty());
    assert_eq!(results[0].document.title, "Concurrency Patterns");
    for pair in results.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }

    // The inline tag is searchable through the tags field.
    let results = searcher
        .search(&CancellationToken::new(), "tag:engineering", 10)
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
}

#[tokio::test]
async fn test_remove_file_cascades() {
    let fixture = fixture().await;
    let path = write_note(&fixture, "gone.md", "# Gone\n\nSoon removed.");

    fixture
        .indexer
        .index_all(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(fixture.catalog.count_documents(None).await.unwrap(), 1);

    fixture
        .indexer
        .remove_file(&path.to_string_lossy())
        .await
        .unwrap();

    assert_eq!(fixture.catalog.count_documents(None).await.unwrap(), 0);
    assert_eq!(fixture.fulltext.count().unwrap(), 0);
    assert!(fixture.fulltext.search("Gone", 10).unwrap().is_empty());
}

#[tokio::test]
async fn test_index_file_targets_one_document() {
    let fixture = fixture().await;
    let path = write_note(&fixture, "target.md", "# Target\n\nSingle file body.");

    fixture
        .indexer
        .index_file(&path.to_string_lossy(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(fixture.catalog.count_documents(None).await.unwrap(), 1);
    let doc = fixture
        .catalog
        .get_document_by_path(&path.to_string_lossy())
        .await
        .unwrap();
    assert_eq!(doc.title, "Target");
    assert_eq!(fixture.fulltext.search("Single", 10).unwrap().len(), 1);
}

#[tokio::test]
async fn test_tags_and_collections_over_indexed_documents() {
    let fixture = fixture().await;
    let path = write_note(&fixture, "tagged.md", "# Tagged\n\nWith #auto tags inside.");

    fixture
        .indexer
        .index_all(&CancellationToken::new())
        .await
        .unwrap();
    let doc = fixture
        .catalog
        .get_document_by_path(&path.to_string_lossy())
        .await
        .unwrap();

    fixture
        .catalog
        .add_tag(&doc.id, "manual-tag", true)
        .await
        .unwrap();
    let tags = fixture.catalog.get_tags(&doc.id).await.unwrap();
    assert!(tags.contains(&"manual-tag".to_string()));

    let collection = fixture
        .catalog
        .create_collection("reading", "stuff to read", "")
        .await
        .unwrap();
    fixture
        .catalog
        .add_to_collection(&collection.id, &doc.id)
        .await
        .unwrap();
    assert_eq!(
        fixture
            .catalog
            .count_collection_documents(&collection.id)
            .await
            .unwrap(),
        1
    );

    // Deleting the document clears membership and tags with it.
    fixture.catalog.delete_document(&doc.id).await.unwrap();
    assert_eq!(
        fixture
            .catalog
            .count_collection_documents(&collection.id)
            .await
            .unwrap(),
        0
    );
}
