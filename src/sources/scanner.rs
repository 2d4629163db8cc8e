/// Generic filesystem scanner shared by file-based sources
///
/// Walks configured paths, filtering by extension and ignore lists, and
/// streams [`FileInfo`] records. The walk runs on a blocking thread;
/// cancellation stops it between entries.
use crate::config::expand_path;
use crate::error::Error;
use crate::sources::FileInfo;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

/// Scanner configuration
#[derive(Debug, Clone, Default)]
pub struct ScanConfig {
    pub paths: Vec<String>,
    /// Extensions to accept (with or without a leading dot); empty accepts all
    pub extensions: Vec<String>,
    /// Directory or file names to skip
    pub ignore: Vec<String>,
}

/// Walks directories and yields matching files
#[derive(Debug, Clone)]
pub struct Scanner {
    paths: Vec<String>,
    extensions: Vec<String>,
    ignore: Vec<String>,
}

impl Scanner {
    pub fn new(config: ScanConfig) -> Self {
        let extensions = config
            .extensions
            .iter()
            .map(|ext| {
                let ext = ext.to_lowercase();
                if ext.starts_with('.') {
                    ext
                } else {
                    format!(".{ext}")
                }
            })
            .collect();

        Self {
            paths: config.paths,
            extensions,
            ignore: config.ignore,
        }
    }

    /// Walk all configured paths, streaming matches and per-path errors.
    pub fn scan(
        &self,
        cancel: CancellationToken,
    ) -> (mpsc::Receiver<FileInfo>, mpsc::Receiver<Error>) {
        let (file_tx, file_rx) = mpsc::channel(100);
        let (err_tx, err_rx) = mpsc::channel(10);
        let scanner = self.clone();

        tokio::task::spawn_blocking(move || {
            for base in &scanner.paths {
                if cancel.is_cancelled() {
                    return;
                }
                let path = expand_path(base);

                let metadata = match std::fs::metadata(&path) {
                    Ok(m) => m,
                    Err(e) => {
                        if e.kind() != std::io::ErrorKind::NotFound {
                            let _ = err_tx.blocking_send(e.into());
                        }
                        continue;
                    }
                };

                if metadata.is_file() {
                    if scanner.matches_extension(&path) {
                        if let Some(info) = file_info(&path, &metadata) {
                            if file_tx.blocking_send(info).is_err() {
                                return;
                            }
                        }
                    }
                    continue;
                }

                let walker = WalkDir::new(&path).into_iter().filter_entry(|entry| {
                    !(entry.file_type().is_dir() && scanner.should_ignore(entry.file_name()))
                });

                for entry in walker {
                    if cancel.is_cancelled() {
                        return;
                    }
                    let entry = match entry {
                        Ok(entry) => entry,
                        Err(_) => continue, // skip inaccessible entries
                    };
                    if !entry.file_type().is_file() {
                        continue;
                    }
                    let entry_path = entry.path();
                    if !scanner.matches_extension(entry_path)
                        || scanner.should_ignore(entry.file_name())
                    {
                        continue;
                    }
                    let Ok(metadata) = entry.metadata() else {
                        continue; // skip files we cannot stat
                    };
                    if let Some(info) = file_info(entry_path, &metadata) {
                        if file_tx.blocking_send(info).is_err() {
                            return;
                        }
                    }
                }
            }
        });

        (file_rx, err_rx)
    }

    /// Whether a path is included by this scanner's configuration.
    pub fn matches_path(&self, path: &str) -> bool {
        let path = normalize(path);
        if path.as_os_str().is_empty() {
            return false;
        }

        if !self.matches_extension(&path) {
            return false;
        }
        if let Some(name) = path.file_name() {
            if self.should_ignore(name) {
                return false;
            }
        }

        self.paths.iter().any(|base| {
            let base = normalize(&expand_path(base).to_string_lossy());
            !base.as_os_str().is_empty() && path.starts_with(&base)
        })
    }

    fn matches_extension(&self, path: &Path) -> bool {
        if self.extensions.is_empty() {
            return true;
        }
        let ext = path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
            .unwrap_or_default();
        self.extensions.contains(&ext)
    }

    fn should_ignore(&self, name: &std::ffi::OsStr) -> bool {
        let name = name.to_string_lossy();
        self.ignore.iter().any(|pattern| pattern == name.as_ref())
    }
}

fn file_info(path: &Path, metadata: &std::fs::Metadata) -> Option<FileInfo> {
    let modified_at = metadata
        .modified()
        .ok()?
        .duration_since(UNIX_EPOCH)
        .ok()?
        .as_secs() as i64;
    Some(FileInfo {
        path: path.to_string_lossy().to_string(),
        modified_at,
        size: metadata.len(),
    })
}

fn normalize(path: &str) -> PathBuf {
    let path = Path::new(path);
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn drain(
        mut files: mpsc::Receiver<FileInfo>,
        mut errs: mpsc::Receiver<Error>,
    ) -> (Vec<FileInfo>, Vec<Error>) {
        let mut out_files = Vec::new();
        let mut out_errs = Vec::new();
        while let Some(f) = files.recv().await {
            out_files.push(f);
        }
        while let Some(e) = errs.recv().await {
            out_errs.push(e);
        }
        (out_files, out_errs)
    }

    fn scanner_for(dir: &Path) -> Scanner {
        Scanner::new(ScanConfig {
            paths: vec![dir.to_string_lossy().to_string()],
            extensions: vec![".md".to_string(), "txt".to_string()],
            ignore: vec![".git".to_string(), "node_modules".to_string()],
        })
    }

    #[tokio::test]
    async fn test_scan_finds_matching_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.md"), "# A").unwrap();
        std::fs::write(dir.path().join("b.txt"), "text").unwrap();
        std::fs::write(dir.path().join("c.pdf"), "pdf").unwrap();

        let scanner = scanner_for(dir.path());
        let (files, errs) = scanner.scan(CancellationToken::new());
        let (files, errs) = drain(files, errs).await;

        assert_eq!(files.len(), 2);
        assert!(errs.is_empty());
        for f in &files {
            assert!(f.modified_at > 0);
        }
    }

    #[tokio::test]
    async fn test_scan_skips_ignored_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join(".git").join("config.md"), "x").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub").join("note.md"), "# Note").unwrap();

        let scanner = scanner_for(dir.path());
        let (files, errs) = scanner.scan(CancellationToken::new());
        let (files, _) = drain(files, errs).await;

        assert_eq!(files.len(), 1);
        assert!(files[0].path.ends_with("note.md"));
    }

    #[tokio::test]
    async fn test_scan_missing_path_is_silent() {
        let scanner = Scanner::new(ScanConfig {
            paths: vec!["/definitely/not/a/path".to_string()],
            extensions: vec![".md".to_string()],
            ignore: vec![],
        });
        let (files, errs) = scanner.scan(CancellationToken::new());
        let (files, errs) = drain(files, errs).await;
        assert!(files.is_empty());
        assert!(errs.is_empty());
    }

    #[tokio::test]
    async fn test_scan_single_file_path() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("solo.md");
        std::fs::write(&file, "# Solo").unwrap();

        let scanner = Scanner::new(ScanConfig {
            paths: vec![file.to_string_lossy().to_string()],
            extensions: vec![".md".to_string()],
            ignore: vec![],
        });
        let (files, errs) = scanner.scan(CancellationToken::new());
        let (files, _) = drain(files, errs).await;
        assert_eq!(files.len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_scan_closes_streams() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..50 {
            std::fs::write(dir.path().join(format!("f{i}.md")), "x").unwrap();
        }

        let cancel = CancellationToken::new();
        cancel.cancel();
        let scanner = scanner_for(dir.path());
        let (files, errs) = scanner.scan(cancel);
        let (files, _) = drain(files, errs).await;
        // The walk stops promptly; nothing (or at most a buffered handful)
        // is delivered.
        assert!(files.len() < 50);
    }

    #[test]
    fn test_matches_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.md"), "x").unwrap();
        let scanner = scanner_for(dir.path());

        let inside = dir.path().join("a.md");
        assert!(scanner.matches_path(&inside.to_string_lossy()));

        let wrong_ext = dir.path().join("a.rs");
        assert!(!scanner.matches_path(&wrong_ext.to_string_lossy()));

        assert!(!scanner.matches_path("/elsewhere/a.md"));
        assert!(!scanner.matches_path(""));
    }

    #[test]
    fn test_extension_normalization() {
        let scanner = Scanner::new(ScanConfig {
            paths: vec![],
            extensions: vec!["MD".to_string(), ".Txt".to_string()],
            ignore: vec![],
        });
        assert!(scanner.matches_extension(Path::new("/x/a.md")));
        assert!(scanner.matches_extension(Path::new("/x/a.TXT")));
        assert!(!scanner.matches_extension(Path::new("/x/a.rs")));
    }
}
