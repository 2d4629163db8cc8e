/// Browser history source
///
/// Locates the history databases of installed browsers and turns each one
/// into a single document of "title\nurl" entries. The live database is
/// copied to a temporary file first, since browsers keep theirs locked.
use crate::error::{Error, Result};
use crate::sources::{content_hash, document_id, generate_preview, FileInfo, Source};
use crate::types::{Document, SourceKind};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::Row;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::UNIX_EPOCH;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const PREVIEW_MAX_LEN: usize = 500;
const HISTORY_LIMIT: i64 = 5000;

/// Indexes history from the configured browsers
pub struct BrowserSource {
    browsers: Vec<String>,
}

/// One row of browser history
struct HistoryEntry {
    url: String,
    title: String,
}

impl BrowserSource {
    pub fn new(browsers: Vec<String>) -> Self {
        let browsers = if browsers.is_empty() {
            vec![
                "chrome".to_string(),
                "firefox".to_string(),
                "safari".to_string(),
            ]
        } else {
            browsers
        };
        Self { browsers }
    }

    fn candidate_paths(&self) -> Vec<PathBuf> {
        self.browsers
            .iter()
            .filter_map(|b| browser_db_path(b))
            .collect()
    }
}

#[async_trait]
impl Source for BrowserSource {
    fn name(&self) -> SourceKind {
        SourceKind::Browser
    }

    fn scan(
        &self,
        cancel: CancellationToken,
    ) -> (mpsc::Receiver<FileInfo>, mpsc::Receiver<Error>) {
        let (file_tx, file_rx) = mpsc::channel(10);
        let (_err_tx, err_rx) = mpsc::channel(1);
        let candidates = self.candidate_paths();

        tokio::spawn(async move {
            for path in candidates {
                if cancel.is_cancelled() {
                    return;
                }
                // A browser that is not installed simply has no database.
                let Ok(metadata) = std::fs::metadata(&path) else {
                    continue;
                };
                let modified_at = metadata
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                    .map(|d| d.as_secs() as i64)
                    .unwrap_or_default();
                let info = FileInfo {
                    path: path.to_string_lossy().to_string(),
                    modified_at,
                    size: metadata.len(),
                };
                if file_tx.send(info).await.is_err() {
                    return;
                }
            }
        });

        (file_rx, err_rx)
    }

    fn matches_path(&self, path: &str) -> bool {
        let path = Path::new(path);
        self.candidate_paths().iter().any(|p| p == path)
    }

    async fn parse(&self, file: &FileInfo) -> Result<Document> {
        let browser = identify_browser(&file.path)
            .ok_or_else(|| Error::parse(&file.path, "unknown browser database"))?;

        // Work on a copy so the browser's own lock does not interfere.
        let copy = copy_to_temp(&file.path)?;
        let entries = read_history(copy.path(), browser).await?;

        Ok(build_browser_document(file, browser, &entries))
    }
}

/// Query a history database copy for recent entries.
async fn read_history(db_path: &Path, browser: &str) -> Result<Vec<HistoryEntry>> {
    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .read_only(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    let query = match browser {
        "chrome" => {
            "SELECT url, title FROM urls
             WHERE title != ''
             ORDER BY last_visit_time DESC
             LIMIT ?"
        }
        "firefox" => {
            "SELECT url, title FROM moz_places
             WHERE title IS NOT NULL AND title != ''
             ORDER BY last_visit_date DESC
             LIMIT ?"
        }
        "safari" => {
            "SELECT hi.url AS url, hv.title AS title
             FROM history_items hi
             LEFT JOIN history_visits hv ON hi.id = hv.history_item
             WHERE hv.title IS NOT NULL AND hv.title != ''
             GROUP BY hi.url
             ORDER BY hv.visit_time DESC
             LIMIT ?"
        }
        other => {
            return Err(Error::Validation(format!("unknown browser: {other}")));
        }
    };

    let rows = sqlx::query(query)
        .bind(HISTORY_LIMIT)
        .fetch_all(&pool)
        .await?;
    pool.close().await;

    let mut entries = Vec::with_capacity(rows.len());
    for row in &rows {
        let url: String = row.try_get("url")?;
        let title: String = row.try_get("title")?;
        entries.push(HistoryEntry { url, title });
    }
    Ok(entries)
}

fn build_browser_document(file: &FileInfo, browser: &str, entries: &[HistoryEntry]) -> Document {
    let mut content = String::new();
    for entry in entries {
        content.push_str(&entry.title);
        content.push('\n');
        content.push_str(&entry.url);
        content.push_str("\n\n");
    }

    let mut chars = browser.chars();
    let browser_name = match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    };
    let title = format!("{browser_name} Browser History ({} entries)", entries.len());

    let mut metadata = HashMap::new();
    metadata.insert("browser".to_string(), browser.to_string());
    metadata.insert("entry_count".to_string(), entries.len().to_string());

    Document {
        id: document_id(&file.path),
        source: SourceKind::Browser,
        path: file.path.clone(),
        title,
        preview: generate_preview(&content, PREVIEW_MAX_LEN),
        content_hash: content_hash(&content),
        content,
        metadata,
        indexed_at: Utc::now(),
        modified_at: Utc
            .timestamp_opt(file.modified_at, 0)
            .single()
            .unwrap_or_else(Utc::now),
    }
}

/// History database location per browser and platform.
fn browser_db_path(browser: &str) -> Option<PathBuf> {
    let home = PathBuf::from(std::env::var("HOME").ok()?);

    match browser {
        "chrome" => {
            if cfg!(target_os = "macos") {
                Some(home.join("Library/Application Support/Google/Chrome/Default/History"))
            } else {
                Some(home.join(".config/google-chrome/Default/History"))
            }
        }
        "firefox" => {
            let profiles = if cfg!(target_os = "macos") {
                home.join("Library/Application Support/Firefox/Profiles")
            } else {
                home.join(".mozilla/firefox")
            };
            find_firefox_profile(&profiles)
        }
        "safari" => {
            if cfg!(target_os = "macos") {
                Some(home.join("Library/Safari/History.db"))
            } else {
                None
            }
        }
        _ => None,
    }
}

/// The default Firefox profile's places.sqlite, if present.
fn find_firefox_profile(profiles_dir: &Path) -> Option<PathBuf> {
    let entries = std::fs::read_dir(profiles_dir).ok()?;
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) && name.contains("default") {
            let places = entry.path().join("places.sqlite");
            if places.exists() {
                return Some(places);
            }
        }
    }
    None
}

fn identify_browser(path: &str) -> Option<&'static str> {
    let lower = path.to_lowercase();
    if lower.contains("chrome") {
        Some("chrome")
    } else if lower.contains("firefox") || lower.contains("places.sqlite") {
        Some("firefox")
    } else if lower.contains("safari") {
        Some("safari")
    } else {
        None
    }
}

fn copy_to_temp(src: &str) -> Result<tempfile::NamedTempFile> {
    let tmp = tempfile::Builder::new()
        .prefix("mindcli-browser-")
        .suffix(".db")
        .tempfile()?;
    std::fs::copy(src, tmp.path())?;
    Ok(tmp)
}
