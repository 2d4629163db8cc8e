/// BM25 full-text search over documents using Tantivy
///
/// Indexes the catalog's document records under the fields
/// `{id, title, content, source, path, tags, headings}`. `id`, `source`,
/// and `path` are raw keyword fields; the rest go through the default
/// analyzer. Queries support bare terms, `source:<value>` (applied as a
/// required filter), and `tag:<value>`.
use crate::error::{Error, Result};
use crate::types::Document;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, Occur, Query, QueryParser, TermQuery};
use tantivy::schema::{Field, IndexRecordOption, Schema, Value, STORED, STRING, TEXT};
use tantivy::snippet::SnippetGenerator;
use tantivy::{doc, Index, IndexWriter, ReloadPolicy, TantivyDocument, Term};

const WRITER_HEAP_BYTES: usize = 50_000_000;

/// A full-text search hit
#[derive(Debug, Clone)]
pub struct FtsResult {
    pub id: String,
    pub score: f64,
    /// Highlighted fragments keyed by field name; may be empty
    pub highlights: HashMap<String, Vec<String>>,
}

/// Tantivy-backed full-text index
pub struct FulltextIndex {
    index: Index,
    id_field: Field,
    title_field: Field,
    content_field: Field,
    source_field: Field,
    path_field: Field,
    tags_field: Field,
    headings_field: Field,
    /// One IndexWriter at a time
    writer_lock: Mutex<()>,
}

impl FulltextIndex {
    /// Create or open the index at the given directory.
    pub fn open(index_path: &Path) -> Result<Self> {
        std::fs::create_dir_all(index_path)?;

        let mut schema_builder = Schema::builder();
        let id_field = schema_builder.add_text_field("id", STRING | STORED);
        let title_field = schema_builder.add_text_field("title", TEXT | STORED);
        let content_field = schema_builder.add_text_field("content", TEXT | STORED);
        let source_field = schema_builder.add_text_field("source", STRING);
        let path_field = schema_builder.add_text_field("path", STRING | STORED);
        let tags_field = schema_builder.add_text_field("tags", TEXT);
        let headings_field = schema_builder.add_text_field("headings", TEXT);
        let schema = schema_builder.build();

        let index = if index_path.join("meta.json").exists() {
            Index::open_in_dir(index_path)?
        } else {
            Index::create_in_dir(index_path, schema)?
        };

        Ok(Self {
            index,
            id_field,
            title_field,
            content_field,
            source_field,
            path_field,
            tags_field,
            headings_field,
            writer_lock: Mutex::new(()),
        })
    }

    /// Add or update a document. Upserts by document id.
    pub fn index(&self, document: &Document) -> Result<()> {
        let _guard = self
            .writer_lock
            .lock()
            .map_err(|e| Error::Other(format!("writer lock poisoned: {e}")))?;

        let mut writer: IndexWriter<TantivyDocument> = self.index.writer(WRITER_HEAP_BYTES)?;
        writer.delete_term(Term::from_field_text(self.id_field, &document.id));
        writer.add_document(doc!(
            self.id_field => document.id.clone(),
            self.title_field => document.title.clone(),
            self.content_field => document.content.clone(),
            self.source_field => document.source.as_str(),
            self.path_field => document.path.clone(),
            self.tags_field => document.metadata.get("tags").cloned().unwrap_or_default(),
            self.headings_field => document.metadata.get("headings").cloned().unwrap_or_default(),
        ))?;
        writer.commit()?;
        Ok(())
    }

    /// Remove a document from the index.
    pub fn delete(&self, id: &str) -> Result<()> {
        let _guard = self
            .writer_lock
            .lock()
            .map_err(|e| Error::Other(format!("writer lock poisoned: {e}")))?;

        let mut writer: IndexWriter<TantivyDocument> = self.index.writer(WRITER_HEAP_BYTES)?;
        writer.delete_term(Term::from_field_text(self.id_field, id));
        writer.commit()?;
        Ok(())
    }

    /// Search the index, returning up to `limit` results ordered by
    /// descending BM25 score.
    pub fn search(&self, query_str: &str, limit: usize) -> Result<Vec<FtsResult>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let reader = self
            .index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;
        let searcher = reader.searcher();

        let query = self.build_query(query_str)?;
        let top_docs = searcher.search(&query, &TopDocs::with_limit(limit))?;

        // Snippet generators are optional; highlight failures degrade to
        // empty fragments rather than failing the search.
        let title_snippets = SnippetGenerator::create(&searcher, &*query, self.title_field).ok();
        let content_snippets =
            SnippetGenerator::create(&searcher, &*query, self.content_field).ok();

        let mut results = Vec::with_capacity(top_docs.len());
        for (score, doc_address) in top_docs {
            let retrieved: TantivyDocument = searcher.doc(doc_address)?;
            let Some(id) = retrieved
                .get_first(self.id_field)
                .and_then(|v| v.as_str())
                .map(str::to_string)
            else {
                continue;
            };

            let mut highlights: HashMap<String, Vec<String>> = HashMap::new();
            if let Some(generator) = &title_snippets {
                let snippet = generator.snippet_from_doc(&retrieved);
                if !snippet.fragment().is_empty() {
                    highlights
                        .entry("title".to_string())
                        .or_default()
                        .push(snippet.to_html());
                }
            }
            if let Some(generator) = &content_snippets {
                let snippet = generator.snippet_from_doc(&retrieved);
                if !snippet.fragment().is_empty() {
                    highlights
                        .entry("content".to_string())
                        .or_default()
                        .push(snippet.to_html());
                }
            }

            results.push(FtsResult {
                id,
                score: score as f64,
                highlights,
            });
        }

        Ok(results)
    }

    /// Total number of indexed documents.
    pub fn count(&self) -> Result<u64> {
        let reader = self
            .index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;
        Ok(reader.searcher().num_docs())
    }

    /// Build a Tantivy query from the query string, honoring the
    /// `source:` and `tag:` operators.
    fn build_query(&self, query_str: &str) -> Result<Box<dyn Query>> {
        let query_str = query_str.trim();

        let mut source_filter: Option<String> = None;
        let mut search_terms: Vec<String> = Vec::new();

        for part in query_str.split_whitespace() {
            if let Some(value) = part.strip_prefix("source:") {
                source_filter = Some(value.to_string());
            } else if let Some(tag) = part.strip_prefix("tag:") {
                search_terms.push(format!("tags:{tag}"));
            } else {
                search_terms.push(part.to_string());
            }
        }

        let main_query: Box<dyn Query> = if search_terms.is_empty() {
            Box::new(tantivy::query::AllQuery)
        } else {
            let parser = QueryParser::for_index(
                &self.index,
                vec![
                    self.title_field,
                    self.content_field,
                    self.tags_field,
                    self.headings_field,
                ],
            );
            parser
                .parse_query(&search_terms.join(" "))
                .map_err(|e| Error::Other(format!("parsing query: {e}")))?
        };

        match source_filter {
            None => Ok(main_query),
            Some(source) => {
                let source_query: Box<dyn Query> = Box::new(TermQuery::new(
                    Term::from_field_text(self.source_field, &source),
                    IndexRecordOption::Basic,
                ));
                Ok(Box::new(BooleanQuery::new(vec![
                    (Occur::Must, main_query),
                    (Occur::Must, source_query),
                ])))
            }
        }
    }
}
