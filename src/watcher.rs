//! Filesystem watcher integration.
//!
//! Wraps `notify-debouncer-full`: raw events are debounced into batches of
//! `(path, kind)` and delivered over a channel. The daemon consumes batches
//! and enqueues incremental index runs; concurrent batches coalesce under
//! the global indexing mutex. Paths under `.viberag/` are filtered out so
//! index writes never re-trigger the watcher.

use notify::{RecursiveMode, Watcher as _};
use notify_debouncer_full::{new_debouncer, DebounceEventResult};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::warn;

use crate::config::VIBERAG_DIR;
use crate::error::{Error, Result};

/// Change classification delivered to the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
}

/// One debounced batch of filesystem changes.
#[derive(Debug, Clone)]
pub struct ChangeBatch {
    pub changes: Vec<(PathBuf, ChangeKind)>,
}

/// Shared counters surfaced through `watchStatus`.
#[derive(Debug, Default)]
pub struct WatchState {
    pub watching: AtomicBool,
    pub files_watched: AtomicU64,
    /// Unix millis of the last completed watcher-triggered index run.
    pub last_index_update: AtomicU64,
    pub pending: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchStatus {
    pub watching: bool,
    pub files_watched: u64,
    pub last_index_update: Option<u64>,
    pub index_up_to_date: bool,
    pub pending: u64,
}

impl WatchState {
    pub fn snapshot(&self) -> WatchStatus {
        let last = self.last_index_update.load(Ordering::Relaxed);
        let pending = self.pending.load(Ordering::Relaxed);
        WatchStatus {
            watching: self.watching.load(Ordering::Relaxed),
            files_watched: self.files_watched.load(Ordering::Relaxed),
            last_index_update: (last > 0).then_some(last),
            index_up_to_date: pending == 0,
            pending,
        }
    }
}

/// A running watcher. Dropping it stops event delivery.
pub struct Watcher {
    // Kept alive for its Drop impl; the debouncer thread owns the OS watch.
    _debouncer: notify_debouncer_full::Debouncer<
        notify::RecommendedWatcher,
        notify_debouncer_full::FileIdMap,
    >,
}

/// Start watching `repo_root` recursively with the given debounce window.
/// Batches arrive on the returned receiver.
pub fn watch(
    repo_root: &Path,
    debounce: Duration,
    state: Arc<WatchState>,
) -> Result<(Watcher, mpsc::UnboundedReceiver<ChangeBatch>)> {
    let (tx, rx) = mpsc::unbounded_channel();
    let root = repo_root.to_path_buf();

    let mut debouncer = new_debouncer(
        debounce,
        None,
        move |result: DebounceEventResult| match result {
            Ok(events) => {
                let mut changes = Vec::new();
                for event in events {
                    let kind = match classify(&event.event.kind) {
                        Some(kind) => kind,
                        None => continue,
                    };
                    for path in &event.event.paths {
                        if is_internal(&root, path) {
                            continue;
                        }
                        changes.push((path.clone(), kind));
                    }
                }
                if !changes.is_empty() {
                    let _ = tx.send(ChangeBatch { changes });
                }
            }
            Err(errors) => {
                for e in errors {
                    warn!(error = %e, "watcher error");
                }
            }
        },
    )
    .map_err(|e| Error::Internal(anyhow::anyhow!("failed to start watcher: {}", e)))?;

    debouncer
        .watcher()
        .watch(repo_root, RecursiveMode::Recursive)
        .map_err(|e| Error::Internal(anyhow::anyhow!("failed to watch {}: {}", repo_root.display(), e)))?;

    state.watching.store(true, Ordering::Relaxed);

    Ok((Watcher { _debouncer: debouncer }, rx))
}

fn classify(kind: &notify::EventKind) -> Option<ChangeKind> {
    use notify::EventKind;
    match kind {
        EventKind::Create(_) => Some(ChangeKind::Added),
        EventKind::Modify(_) => Some(ChangeKind::Modified),
        EventKind::Remove(_) => Some(ChangeKind::Deleted),
        _ => None,
    }
}

/// True for paths under the repository's own state directory.
fn is_internal(root: &Path, path: &Path) -> bool {
    path.strip_prefix(root)
        .map(|rel| rel.components().next().is_some_and(|c| c.as_os_str() == VIBERAG_DIR))
        .unwrap_or(false)
}
