use std::path::{Path, PathBuf};

use notify::{
    Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher,
    event::{ModifyKind, RemoveKind},
};
use tokio::sync::mpsc;
use tracing::{info, warn};

const CHANNEL_CAPACITY: usize = 100;

/// Keeps the filesystem watcher alive. Dropping it stops the events.
pub struct SourceWatcher {
    _watcher: RecommendedWatcher,
}

/// Watch `source` recursively and forward one path per detected write.
///
/// Paths under `ignore` (typically the build directory) are dropped.
pub fn watch(source: &Path, ignore: Option<&Path>) -> notify::Result<(SourceWatcher, mpsc::Receiver<PathBuf>)> {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let ignore = ignore.map(absolute);

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) if is_write(&event.kind) => {
            for path in event.paths {
                if ignore.as_ref().is_some_and(|dir| absolute(&path).starts_with(dir)) {
                    continue;
                }
                info!(path = %path.display(), "detected change");
                if tx.blocking_send(path).is_err() {
                    return;
                }
            }
        }
        Ok(_) => {}
        Err(e) => warn!(err = %e, "watch error"),
    })?;

    watcher.watch(source, RecursiveMode::Recursive)?;
    info!(path = %source.display(), "watching for changes");

    Ok((SourceWatcher { _watcher: watcher }, rx))
}

/// Events that change file contents or the tree shape.
pub fn is_write(kind: &EventKind) -> bool {
    match kind {
        EventKind::Create(_) => true,
        EventKind::Modify(ModifyKind::Metadata(_)) => false,
        EventKind::Modify(_) => true,
        EventKind::Remove(RemoveKind::File | RemoveKind::Folder | RemoveKind::Any) => true,
        _ => false,
    }
}

fn absolute(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
