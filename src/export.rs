/// Export search results as JSON, CSV, or Markdown
use crate::error::{Error, Result};
use crate::types::SearchResult;
use serde::Serialize;
use std::collections::HashMap;
use std::io::Write;
use std::str::FromStr;

/// Supported export formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
    Markdown,
}

impl FromStr for ExportFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            "markdown" | "md" => Ok(ExportFormat::Markdown),
            other => Err(Error::Validation(format!(
                "unknown export format: {other} (expected json, csv, or markdown)"
            ))),
        }
    }
}

#[derive(Serialize)]
struct ExportDoc<'a> {
    title: &'a str,
    path: &'a str,
    source: &'a str,
    preview: &'a str,
    score: f64,
    #[serde(skip_serializing_if = "str::is_empty")]
    tags: &'a str,
    modified_at: String,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    metadata: &'a HashMap<String, String>,
}

impl<'a> ExportDoc<'a> {
    fn from_result(result: &'a SearchResult) -> Self {
        Self {
            title: &result.document.title,
            path: &result.document.path,
            source: result.document.source.as_str(),
            preview: &result.document.preview,
            score: result.score,
            tags: result
                .document
                .metadata
                .get("tags")
                .map(String::as_str)
                .unwrap_or(""),
            modified_at: result.document.modified_at.to_rfc3339(),
            metadata: &result.document.metadata,
        }
    }
}

/// Write results to `writer` in the requested format.
pub fn export_results(
    writer: &mut dyn Write,
    results: &[SearchResult],
    format: ExportFormat,
) -> Result<()> {
    match format {
        ExportFormat::Json => export_json(writer, results),
        ExportFormat::Csv => export_csv(writer, results),
        ExportFormat::Markdown => export_markdown(writer, results),
    }
}

fn export_json(writer: &mut dyn Write, results: &[SearchResult]) -> Result<()> {
    let docs: Vec<ExportDoc> = results.iter().map(ExportDoc::from_result).collect();
    serde_json::to_writer_pretty(&mut *writer, &docs)
        .map_err(|e| Error::Other(format!("encoding JSON: {e}")))?;
    writeln!(writer)?;
    Ok(())
}

fn export_csv(writer: &mut dyn Write, results: &[SearchResult]) -> Result<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    csv_writer
        .write_record(["title", "path", "source", "score", "tags", "modified_at"])
        .map_err(|e| Error::Other(format!("writing CSV: {e}")))?;

    for result in results {
        csv_writer
            .write_record([
                result.document.title.as_str(),
                result.document.path.as_str(),
                result.document.source.as_str(),
                &format!("{:.4}", result.score),
                result
                    .document
                    .metadata
                    .get("tags")
                    .map(String::as_str)
                    .unwrap_or(""),
                &result.document.modified_at.to_rfc3339(),
            ])
            .map_err(|e| Error::Other(format!("writing CSV: {e}")))?;
    }
    csv_writer
        .flush()
        .map_err(|e| Error::Other(format!("writing CSV: {e}")))?;
    Ok(())
}

fn export_markdown(writer: &mut dyn Write, results: &[SearchResult]) -> Result<()> {
    for (i, result) in results.iter().enumerate() {
        writeln!(writer, "## {}. {}\n", i + 1, result.document.title)?;
        writeln!(writer, "- **Source:** {}", result.document.source)?;
        writeln!(writer, "- **Path:** {}", result.document.path)?;
        writeln!(writer, "- **Score:** {:.4}", result.score)?;
        if let Some(tags) = result.document.metadata.get("tags") {
            if !tags.is_empty() {
                writeln!(writer, "- **Tags:** {tags}")?;
            }
        }
        writeln!(writer, "\n{}\n\n---\n", result.document.preview)?;
    }
    Ok(())
}
