//! File watching and debounced reindexing.
//!
//! OS events arrive on notify's watcher thread, get coalesced per path by
//! the debouncer, and are handed to the indexer's loop over an mpsc channel.
//! Indexer code never runs on the FS thread. On startup a reconciliation
//! pass diffs the stored snapshots against the working tree by re-walking
//! it; unchanged files short-circuit on their content hash.

use crate::error::{Error, Result};
use crate::indexer::{IndexOptions, Indexer};
use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, DebouncedEventKind};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// A coalesced unit of watcher work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchTask {
    /// Path changed or appeared; reindex it.
    Reindex(PathBuf),
    /// Path disappeared; remove it from the index.
    Remove(PathBuf),
}

#[derive(Debug, Default)]
pub struct WatcherStats {
    pub events: AtomicU64,
    pub tasks: AtomicU64,
    pub failures: AtomicU64,
}

/// Running watcher; dropping or calling [`stop`](Self::stop) ends it.
pub struct WatcherHandle {
    cancel: CancellationToken,
    // Held to keep the OS watcher alive.
    _debouncer: notify_debouncer_mini::Debouncer<notify::RecommendedWatcher>,
    task: tokio::task::JoinHandle<()>,
    pub stats: Arc<WatcherStats>,
}

impl WatcherHandle {
    pub fn stop(self) {
        self.cancel.cancel();
        self.task.abort();
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

/// Start watching `root`, delivering debounced tasks to the indexer.
pub async fn watch(
    project: String,
    root: PathBuf,
    debounce_ms: u64,
    indexer: Arc<Indexer>,
) -> Result<WatcherHandle> {
    let stats = Arc::new(WatcherStats::default());
    let cancel = CancellationToken::new();
    let (tx, rx) = mpsc::unbounded_channel::<WatchTask>();

    // The debouncer callback runs on the FS thread; it only classifies and
    // forwards.
    let event_stats = Arc::clone(&stats);
    let mut debouncer = new_debouncer(
        Duration::from_millis(debounce_ms.max(1)),
        move |result: DebounceEventResult| match result {
            Ok(events) => {
                for event in events {
                    if event.kind != DebouncedEventKind::Any {
                        continue;
                    }
                    event_stats.events.fetch_add(1, Ordering::Relaxed);
                    let task = if event.path.exists() {
                        WatchTask::Reindex(event.path)
                    } else {
                        WatchTask::Remove(event.path)
                    };
                    let _ = tx.send(task);
                }
            }
            Err(e) => tracing::warn!("watcher error: {e}"),
        },
    )
    .map_err(|e| Error::storage(format!("failed to start watcher: {e}")))?;

    debouncer
        .watcher()
        .watch(&root, RecursiveMode::Recursive)
        .map_err(|e| Error::storage(format!("failed to watch {}: {e}", root.display())))?;

    // Reconciliation: one full pass against the stored snapshot table covers
    // anything that changed while the watcher was down.
    {
        let indexer = Arc::clone(&indexer);
        let project = project.clone();
        let root = root.clone();
        tokio::spawn(async move {
            let options = IndexOptions {
                recursive: true,
                ..Default::default()
            };
            if let Err(e) = indexer.index(&project, &root, options).await {
                tracing::warn!("watcher reconciliation pass failed: {e}");
            }
        });
    }

    let task = tokio::spawn(drive(
        project,
        root,
        indexer,
        rx,
        cancel.clone(),
        Arc::clone(&stats),
    ));

    Ok(WatcherHandle {
        cancel,
        _debouncer: debouncer,
        task,
        stats,
    })
}

/// Consume watch tasks on the indexer's loop.
async fn drive(
    project: String,
    root: PathBuf,
    indexer: Arc<Indexer>,
    mut rx: mpsc::UnboundedReceiver<WatchTask>,
    cancel: CancellationToken,
    stats: Arc<WatcherStats>,
) {
    loop {
        let task = tokio::select! {
            _ = cancel.cancelled() => break,
            task = rx.recv() => match task {
                Some(task) => task,
                None => break,
            },
        };
        stats.tasks.fetch_add(1, Ordering::Relaxed);

        let outcome = match &task {
            WatchTask::Reindex(path) => {
                if !indexer_handles(&indexer, path) {
                    continue;
                }
                indexer
                    .index_file(&project, &root, path, None)
                    .await
                    .map(|_| ())
            }
            WatchTask::Remove(path) => match relative_to(&root, path) {
                Some(rel) => indexer
                    .remove_file_from_index(&project, &rel)
                    .await
                    .map(|_| ()),
                None => Ok(()),
            },
        };

        if let Err(e) = outcome {
            stats.failures.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(?task, "watcher task failed: {e}");
        }
    }
    tracing::debug!(project = %project, "watcher loop stopped");
}

fn indexer_handles(indexer: &Indexer, path: &std::path::Path) -> bool {
    indexer.registry().handles(path)
}

fn relative_to(root: &std::path::Path, path: &std::path::Path) -> Option<String> {
    let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
    path.strip_prefix(&root)
        .ok()
        .map(|p| p.to_string_lossy().replace('\\', "/"))
}
