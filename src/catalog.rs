/// Persistent catalog of documents, chunks, tags, and collections
///
/// Backed by SQLite with WAL journaling and a 5 second busy timeout. The
/// pool is capped at a single connection: SQLite supports one writer, and
/// the indexer serializes writes through its workers.
use crate::error::{Error, Result};
use crate::types::{Chunk, Collection, Document, SourceKind};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

const DOCUMENT_COLUMNS: &str =
    "id, source, path, title, content, preview, metadata, content_hash, indexed_at, modified_at";

/// Handle to the catalog database
pub struct Catalog {
    pool: SqlitePool,
}

impl Catalog {
    /// Open (or create) the catalog at the given path and run migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5))
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let catalog = Self { pool };
        catalog.migrate().await?;
        Ok(catalog)
    }

    /// Open an in-memory catalog, for tests.
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        let catalog = Self { pool };
        catalog.migrate().await?;
        Ok(catalog)
    }

    /// Close the underlying pool. Further calls will fail.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn migrate(&self) -> Result<()> {
        let migrations = [
            "CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                source TEXT NOT NULL,
                path TEXT NOT NULL,
                title TEXT NOT NULL DEFAULT '',
                content TEXT NOT NULL DEFAULT '',
                preview TEXT NOT NULL DEFAULT '',
                metadata TEXT NOT NULL DEFAULT '{}',
                content_hash TEXT NOT NULL,
                indexed_at DATETIME NOT NULL,
                modified_at DATETIME NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_documents_source ON documents(source)",
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_documents_path ON documents(source, path)",
            "CREATE INDEX IF NOT EXISTS idx_documents_content_hash ON documents(content_hash)",
            "CREATE TABLE IF NOT EXISTS chunks (
                id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL,
                content TEXT NOT NULL,
                start_pos INTEGER NOT NULL,
                end_pos INTEGER NOT NULL,
                FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE
            )",
            "CREATE INDEX IF NOT EXISTS idx_chunks_document_id ON chunks(document_id)",
            "CREATE TABLE IF NOT EXISTS document_tags (
                document_id TEXT NOT NULL,
                tag TEXT NOT NULL,
                manual BOOLEAN NOT NULL DEFAULT 1,
                PRIMARY KEY (document_id, tag),
                FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE
            )",
            "CREATE INDEX IF NOT EXISTS idx_document_tags_tag ON document_tags(tag)",
            "CREATE TABLE IF NOT EXISTS collections (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                description TEXT NOT NULL DEFAULT '',
                query TEXT NOT NULL DEFAULT '',
                created_at DATETIME NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS collection_documents (
                collection_id TEXT NOT NULL,
                document_id TEXT NOT NULL,
                added_at DATETIME NOT NULL,
                PRIMARY KEY (collection_id, document_id),
                FOREIGN KEY (collection_id) REFERENCES collections(id) ON DELETE CASCADE,
                FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE
            )",
            "CREATE INDEX IF NOT EXISTS idx_collection_documents_doc ON collection_documents(document_id)",
            "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY)",
            "INSERT OR IGNORE INTO schema_version (version) VALUES (1)",
        ];

        for m in migrations {
            sqlx::query(m).execute(&self.pool).await?;
        }
        Ok(())
    }

    // ===== Documents =====

    /// Insert or replace a document by id.
    pub async fn put_document(&self, doc: &Document) -> Result<()> {
        sqlx::query(
            "INSERT INTO documents (id, source, path, title, content, preview, metadata, content_hash, indexed_at, modified_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                source = excluded.source,
                path = excluded.path,
                title = excluded.title,
                content = excluded.content,
                preview = excluded.preview,
                metadata = excluded.metadata,
                content_hash = excluded.content_hash,
                indexed_at = excluded.indexed_at,
                modified_at = excluded.modified_at",
        )
        .bind(&doc.id)
        .bind(doc.source.as_str())
        .bind(&doc.path)
        .bind(&doc.title)
        .bind(&doc.content)
        .bind(&doc.preview)
        .bind(doc.metadata_json())
        .bind(&doc.content_hash)
        .bind(doc.indexed_at)
        .bind(doc.modified_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Retrieve a document by id.
    pub async fn get_document(&self, id: &str) -> Result<Document> {
        let row = sqlx::query(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => document_from_row(&row),
            None => Err(Error::not_found(format!("document {id}"))),
        }
    }

    /// Retrieve a document by its path.
    pub async fn get_document_by_path(&self, path: &str) -> Result<Document> {
        let row = sqlx::query(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE path = ?"
        ))
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => document_from_row(&row),
            None => Err(Error::not_found(format!("document at {path}"))),
        }
    }

    /// Delete a document by id, cascading to chunks, tags, and memberships.
    pub async fn delete_document(&self, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found(format!("document {id}")));
        }
        Ok(())
    }

    /// Delete a document by its path.
    pub async fn delete_document_by_path(&self, path: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM documents WHERE path = ?")
            .bind(path)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found(format!("document at {path}")));
        }
        Ok(())
    }

    /// List documents, newest modification first, optionally filtered by source.
    pub async fn list_documents(&self, source: Option<SourceKind>) -> Result<Vec<Document>> {
        let rows = match source {
            None => {
                sqlx::query(&format!(
                    "SELECT {DOCUMENT_COLUMNS} FROM documents ORDER BY modified_at DESC"
                ))
                .fetch_all(&self.pool)
                .await?
            }
            Some(source) => {
                sqlx::query(&format!(
                    "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE source = ? ORDER BY modified_at DESC"
                ))
                .bind(source.as_str())
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.iter().map(document_from_row).collect()
    }

    /// Count documents, optionally filtered by source.
    pub async fn count_documents(&self, source: Option<SourceKind>) -> Result<usize> {
        let count: i64 = match source {
            None => {
                sqlx::query_scalar("SELECT COUNT(*) FROM documents")
                    .fetch_one(&self.pool)
                    .await?
            }
            Some(source) => {
                sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE source = ?")
                    .bind(source.as_str())
                    .fetch_one(&self.pool)
                    .await?
            }
        };
        Ok(count as usize)
    }

    /// Simple substring search over title and content, used for bootstrap
    /// and fallback when the full-text index is unavailable.
    pub async fn keyword_search(&self, query: &str, limit: usize) -> Result<Vec<Document>> {
        let pattern = format!("%{query}%");
        let rows = sqlx::query(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents
             WHERE title LIKE ? OR content LIKE ?
             ORDER BY modified_at DESC LIMIT ?"
        ))
        .bind(&pattern)
        .bind(&pattern)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(document_from_row).collect()
    }

    // ===== Chunks =====

    /// Insert a chunk. Chunk ids are unique; re-inserting replaces.
    pub async fn insert_chunk(&self, chunk: &Chunk) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO chunks (id, document_id, content, start_pos, end_pos)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&chunk.id)
        .bind(&chunk.document_id)
        .bind(&chunk.content)
        .bind(chunk.start_pos as i64)
        .bind(chunk.end_pos as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// All chunks of a document, ordered by start position.
    pub async fn get_chunks_by_document(&self, document_id: &str) -> Result<Vec<Chunk>> {
        let rows = sqlx::query(
            "SELECT id, document_id, content, start_pos, end_pos
             FROM chunks WHERE document_id = ? ORDER BY start_pos",
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(Chunk {
                    id: row.try_get("id")?,
                    document_id: row.try_get("document_id")?,
                    content: row.try_get("content")?,
                    start_pos: row.try_get::<i64, _>("start_pos")? as usize,
                    end_pos: row.try_get::<i64, _>("end_pos")? as usize,
                })
            })
            .collect()
    }

    /// Remove all chunks of a document.
    pub async fn delete_chunks_by_document(&self, document_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ===== Tags =====

    /// Attach a tag to a document. Idempotent; `manual` marks user-asserted
    /// tags, which are the only ones removable later.
    pub async fn add_tag(&self, document_id: &str, tag: &str, manual: bool) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO document_tags (document_id, tag, manual) VALUES (?, ?, ?)")
            .bind(document_id)
            .bind(tag)
            .bind(manual)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Remove a manual tag. NotFound if the tag is absent or auto-extracted.
    pub async fn remove_manual_tag(&self, document_id: &str, tag: &str) -> Result<()> {
        let result = sqlx::query(
            "DELETE FROM document_tags WHERE document_id = ? AND tag = ? AND manual = 1",
        )
        .bind(document_id)
        .bind(tag)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found(format!("tag {tag}")));
        }
        Ok(())
    }

    /// All tags of a document, sorted.
    pub async fn get_tags(&self, document_id: &str) -> Result<Vec<String>> {
        let tags =
            sqlx::query_scalar("SELECT tag FROM document_tags WHERE document_id = ? ORDER BY tag")
                .bind(document_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(tags)
    }

    /// All distinct tags across all documents, sorted.
    pub async fn list_all_tags(&self) -> Result<Vec<String>> {
        let tags = sqlx::query_scalar("SELECT DISTINCT tag FROM document_tags ORDER BY tag")
            .fetch_all(&self.pool)
            .await?;
        Ok(tags)
    }

    /// All documents carrying a tag, newest modification first.
    pub async fn find_by_tag(&self, tag: &str) -> Result<Vec<Document>> {
        let rows = sqlx::query(
            "SELECT d.id, d.source, d.path, d.title, d.content, d.preview, d.metadata,
                    d.content_hash, d.indexed_at, d.modified_at
             FROM documents d
             INNER JOIN document_tags dt ON d.id = dt.document_id
             WHERE dt.tag = ?
             ORDER BY d.modified_at DESC",
        )
        .bind(tag)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(document_from_row).collect()
    }

    // ===== Collections =====

    /// Create a collection. The name must be unique.
    pub async fn create_collection(
        &self,
        name: &str,
        description: &str,
        query: &str,
    ) -> Result<Collection> {
        let collection = Collection {
            id: generate_id(name),
            name: name.to_string(),
            description: description.to_string(),
            query: query.to_string(),
            created_at: Utc::now(),
        };

        sqlx::query(
            "INSERT INTO collections (id, name, description, query, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&collection.id)
        .bind(&collection.name)
        .bind(&collection.description)
        .bind(&collection.query)
        .bind(collection.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| unique_violation(e, name))?;

        Ok(collection)
    }

    /// Retrieve a collection by id.
    pub async fn get_collection(&self, id: &str) -> Result<Collection> {
        let row = sqlx::query(
            "SELECT id, name, description, query, created_at FROM collections WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => collection_from_row(&row),
            None => Err(Error::not_found(format!("collection {id}"))),
        }
    }

    /// Retrieve a collection by name.
    pub async fn get_collection_by_name(&self, name: &str) -> Result<Collection> {
        let row = sqlx::query(
            "SELECT id, name, description, query, created_at FROM collections WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => collection_from_row(&row),
            None => Err(Error::not_found(format!("collection {name}"))),
        }
    }

    /// All collections, sorted by name.
    pub async fn list_collections(&self) -> Result<Vec<Collection>> {
        let rows = sqlx::query(
            "SELECT id, name, description, query, created_at FROM collections ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(collection_from_row).collect()
    }

    /// Rename a collection. CollectionExists if the new name is taken.
    pub async fn rename_collection(&self, id: &str, new_name: &str) -> Result<()> {
        let result = sqlx::query("UPDATE collections SET name = ? WHERE id = ?")
            .bind(new_name)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| unique_violation(e, new_name))?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found(format!("collection {id}")));
        }
        Ok(())
    }

    /// Delete a collection by id, cascading to memberships.
    pub async fn delete_collection(&self, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM collections WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found(format!("collection {id}")));
        }
        Ok(())
    }

    /// Delete a collection by name, cascading to memberships.
    pub async fn delete_collection_by_name(&self, name: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM collections WHERE name = ?")
            .bind(name)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found(format!("collection {name}")));
        }
        Ok(())
    }

    /// Add a document to a collection. Idempotent.
    pub async fn add_to_collection(&self, collection_id: &str, document_id: &str) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO collection_documents (collection_id, document_id, added_at)
             VALUES (?, ?, ?)",
        )
        .bind(collection_id)
        .bind(document_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Remove a document from a collection. NotFound if not a member.
    pub async fn remove_from_collection(
        &self,
        collection_id: &str,
        document_id: &str,
    ) -> Result<()> {
        let result = sqlx::query(
            "DELETE FROM collection_documents WHERE collection_id = ? AND document_id = ?",
        )
        .bind(collection_id)
        .bind(document_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found(format!(
                "document {document_id} in collection {collection_id}"
            )));
        }
        Ok(())
    }

    /// Documents in a collection, most recently added first.
    pub async fn get_collection_documents(&self, collection_id: &str) -> Result<Vec<Document>> {
        let rows = sqlx::query(
            "SELECT d.id, d.source, d.path, d.title, d.content, d.preview, d.metadata,
                    d.content_hash, d.indexed_at, d.modified_at
             FROM documents d
             INNER JOIN collection_documents cd ON d.id = cd.document_id
             WHERE cd.collection_id = ?
             ORDER BY cd.added_at DESC",
        )
        .bind(collection_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(document_from_row).collect()
    }

    /// Number of documents in a collection.
    pub async fn count_collection_documents(&self, collection_id: &str) -> Result<usize> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM collection_documents WHERE collection_id = ?",
        )
        .bind(collection_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count as usize)
    }

    /// Collections a document belongs to, sorted by name.
    pub async fn get_document_collections(&self, document_id: &str) -> Result<Vec<Collection>> {
        let rows = sqlx::query(
            "SELECT c.id, c.name, c.description, c.query, c.created_at
             FROM collections c
             INNER JOIN collection_documents cd ON c.id = cd.collection_id
             WHERE cd.document_id = ?
             ORDER BY c.name",
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(collection_from_row).collect()
    }
}

fn document_from_row(row: &SqliteRow) -> Result<Document> {
    let source: String = row.try_get("source")?;
    let metadata_json: String = row.try_get("metadata")?;

    let mut doc = Document {
        id: row.try_get("id")?,
        source: source.parse()?,
        path: row.try_get("path")?,
        title: row.try_get("title")?,
        content: row.try_get("content")?,
        preview: row.try_get("preview")?,
        metadata: Default::default(),
        content_hash: row.try_get("content_hash")?,
        indexed_at: row.try_get::<DateTime<Utc>, _>("indexed_at")?,
        modified_at: row.try_get::<DateTime<Utc>, _>("modified_at")?,
    };
    doc.set_metadata_from_json(&metadata_json)
        .map_err(|e| Error::Other(format!("parsing document metadata: {e}")))?;
    Ok(doc)
}

fn collection_from_row(row: &SqliteRow) -> Result<Collection> {
    Ok(Collection {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        query: row.try_get("query")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
    })
}

/// Map a unique-constraint violation to CollectionExists.
fn unique_violation(err: sqlx::Error, name: &str) -> Error {
    if let sqlx::Error::Database(ref db) = err {
        if db.is_unique_violation() {
            return Error::CollectionExists(name.to_string());
        }
    }
    err.into()
}

/// Generate a collection id from the name and creation instant.
fn generate_id(name: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update(Utc::now().timestamp_nanos_opt().unwrap_or_default().to_le_bytes());
    let digest = hasher.finalize();
    hex_encode(&digest[..16])
}

pub(crate) fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
