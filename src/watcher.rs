//! Filesystem watcher feeding change notifications to the orchestrator.

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FileChange {
    pub path: PathBuf,
}

/// Keeps the underlying watcher alive. Dropping it stops notifications.
pub(crate) struct FileWatcher {
    _watcher: RecommendedWatcher,
}

fn is_relevant(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
    )
}

/// Watch `paths` and forward every change touching one of them.
///
/// Parent directories are watched rather than the files themselves so editors
/// that save by renaming a temp file into place are still observed.
pub(crate) fn watch(
    paths: &[PathBuf],
    tx: UnboundedSender<FileChange>,
) -> Result<FileWatcher, notify::Error> {
    let watched: HashSet<PathBuf> = paths.iter().cloned().collect();

    let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
        match res {
            Ok(event) if is_relevant(&event.kind) => {
                for path in event.paths {
                    if watched.contains(&path) {
                        let _ = tx.send(FileChange { path });
                    }
                }
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "file watcher error"),
        }
    })?;

    let dirs: BTreeSet<&Path> = paths.iter().filter_map(|p| p.parent()).collect();
    for dir in &dirs {
        watcher.watch(dir, RecursiveMode::NonRecursive)?;
    }
    debug!(files = paths.len(), dirs = dirs.len(), "watching");

    Ok(FileWatcher { _watcher: watcher })
}
