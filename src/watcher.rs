/// Filesystem watching with debounced re-indexing
///
/// Subscribes recursively to the configured directories and groups bursts of
/// events per path: a tick loop dispatches paths that have been quiet for
/// the debounce window, re-indexing files that still exist and removing the
/// ones that do not. Subscription errors are logged and never fatal.
use crate::config::expand_path;
use crate::error::{Error, Result};
use crate::indexer::Indexer;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Default debounce window
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// Directories never worth watching
const IGNORED_DIRS: [&str; 3] = [".git", "node_modules", ".obsidian"];

/// Monitors directories and triggers targeted re-indexing
pub struct FileWatcher {
    indexer: Arc<Indexer>,
    paths: Vec<String>,
    debounce: Duration,
}

impl FileWatcher {
    /// Create a watcher over the given directories (a leading `~/` is
    /// expanded).
    pub fn new(indexer: Arc<Indexer>, paths: Vec<String>) -> Self {
        Self {
            indexer,
            paths,
            debounce: DEFAULT_DEBOUNCE,
        }
    }

    /// Override the debounce window.
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Watch until cancelled. Blocks on the event and debounce loops.
    pub async fn start(&self, cancel: &CancellationToken) -> Result<()> {
        let (event_tx, mut event_rx) = mpsc::channel::<notify::Result<Event>>(256);

        // The callback runs on notify's own thread, so a blocking send is
        // safe here.
        let mut watcher = RecommendedWatcher::new(
            move |result| {
                let _ = event_tx.blocking_send(result);
            },
            notify::Config::default(),
        )
        .map_err(|e| Error::Other(format!("creating filesystem watcher: {e}")))?;

        for configured in &self.paths {
            let path = expand_path(configured);
            if let Err(e) = watcher.watch(&path, RecursiveMode::Recursive) {
                tracing::warn!("watching {}: {e}", path.display());
            } else {
                tracing::info!("watching {}", path.display());
            }
        }

        let mut pending: HashMap<PathBuf, Instant> = HashMap::new();
        let mut ticker = tokio::time::interval(self.debounce);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    // Dropping the watcher closes the subscription.
                    return Ok(());
                }
                event = event_rx.recv() => {
                    match event {
                        None => return Ok(()),
                        Some(Err(e)) => tracing::warn!("watcher error: {e}"),
                        Some(Ok(event)) => handle_event(event, &mut pending),
                    }
                }
                _ = ticker.tick() => {
                    self.process_pending(&mut pending, cancel).await;
                }
            }
        }
    }

    /// Dispatch paths whose last event is at least one debounce window old.
    async fn process_pending(
        &self,
        pending: &mut HashMap<PathBuf, Instant>,
        cancel: &CancellationToken,
    ) {
        let now = Instant::now();
        let ready: Vec<PathBuf> = pending
            .iter()
            .filter(|(_, last)| now.duration_since(**last) >= self.debounce)
            .map(|(path, _)| path.clone())
            .collect();

        for path in ready {
            pending.remove(&path);
            let path_str = path.to_string_lossy().to_string();

            if !path.exists() {
                if let Err(e) = self.indexer.remove_file(&path_str).await {
                    if !e.is_not_found() {
                        tracing::warn!("removing {path_str} from index: {e}");
                    }
                }
                continue;
            }

            if let Err(e) = self.indexer.index_file(&path_str, cancel).await {
                tracing::warn!("re-indexing {path_str}: {e}");
            }
        }
    }
}

/// Record interesting events in the pending map.
fn handle_event(event: Event, pending: &mut HashMap<PathBuf, Instant>) {
    let interesting = matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    );
    if !interesting {
        return;
    }

    for path in event.paths {
        if is_ignored(&path) {
            continue;
        }
        // New directories are already covered by the recursive
        // subscription; only files are scheduled.
        if !matches!(event.kind, EventKind::Remove(_)) && path.is_dir() {
            continue;
        }
        pending.insert(path, Instant::now());
    }
}

/// Whether any path component is an ignored directory.
fn is_ignored(path: &Path) -> bool {
    path.components()
        .any(|c| IGNORED_DIRS.iter().any(|dir| c.as_os_str() == *dir))
}
