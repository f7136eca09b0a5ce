//! Recursive filesystem watcher feeding the embedder.
//!
//! `notify` delivers events on a std channel, so the watcher lives on its
//! own thread and forwards classified paths to a tokio task. The thread
//! exits once the forwarding task is gone.

use aide_core::{AppError, AppResult};
use notify::event::ModifyKind;
use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::mpsc as std_mpsc;
use std::sync::mpsc::RecvTimeoutError;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// What happened to a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathChange {
    /// Created, modified or renamed into place
    Changed,
    /// Removed or renamed away
    Removed,
}

/// Keeps the watcher alive; dropping it stops delivery.
#[derive(Debug)]
pub struct WatchHandle {
    task: JoinHandle<()>,
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Watch `root` recursively, calling `on_change` for every relevant path.
///
/// Returns once the OS watch is registered, or with the registration error.
pub async fn watch<F>(root: PathBuf, on_change: F) -> AppResult<WatchHandle>
where
    F: Fn(PathBuf, PathChange) + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<(PathBuf, PathChange)>();
    let (ready_tx, ready_rx) = oneshot::channel::<Result<(), String>>();

    let thread_root = root.clone();
    std::thread::Builder::new()
        .name("aide-watcher".to_string())
        .spawn(move || watch_thread(thread_root, tx, ready_tx))
        .map_err(|e| AppError::Index(format!("Failed to start watcher thread: {}", e)))?;

    match ready_rx.await {
        Ok(Ok(())) => {}
        Ok(Err(message)) => {
            return Err(AppError::Index(format!(
                "Failed to watch {:?}: {}",
                root, message
            )))
        }
        Err(_) => {
            return Err(AppError::Index(
                "Watcher thread exited before registering".to_string(),
            ))
        }
    }

    tracing::debug!("Watching {:?}", root);

    let task = tokio::spawn(async move {
        while let Some((path, change)) = rx.recv().await {
            on_change(path, change);
        }
    });

    Ok(WatchHandle { task })
}

fn watch_thread(
    root: PathBuf,
    tx: mpsc::UnboundedSender<(PathBuf, PathChange)>,
    ready: oneshot::Sender<Result<(), String>>,
) {
    let (watch_tx, watch_rx) = std_mpsc::channel::<notify::Result<Event>>();

    let mut watcher = match RecommendedWatcher::new(watch_tx, NotifyConfig::default()) {
        Ok(watcher) => watcher,
        Err(e) => {
            let _ = ready.send(Err(e.to_string()));
            return;
        }
    };
    if let Err(e) = watcher.watch(&root, RecursiveMode::Recursive) {
        let _ = ready.send(Err(e.to_string()));
        return;
    }
    let _ = ready.send(Ok(()));

    loop {
        match watch_rx.recv_timeout(Duration::from_millis(250)) {
            Ok(Ok(event)) => {
                for path in &event.paths {
                    if let Some(change) = classify(&event.kind, path) {
                        if tx.send((path.clone(), change)).is_err() {
                            return;
                        }
                    }
                }
            }
            Ok(Err(e)) => tracing::warn!("Watcher error: {}", e),
            Err(RecvTimeoutError::Timeout) => {
                if tx.is_closed() {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    tracing::debug!("Watcher thread for {:?} stopped", root);
}

/// Map a notify event kind onto a change for one of its paths.
pub(crate) fn classify(kind: &EventKind, path: &Path) -> Option<PathChange> {
    match kind {
        EventKind::Create(_) => Some(PathChange::Changed),
        EventKind::Remove(_) => Some(PathChange::Removed),
        // Renames report both ends; whichever still exists is the new name.
        EventKind::Modify(ModifyKind::Name(_)) => Some(if path.exists() {
            PathChange::Changed
        } else {
            PathChange::Removed
        }),
        EventKind::Modify(ModifyKind::Metadata(_)) => None,
        EventKind::Modify(_) => Some(PathChange::Changed),
        _ => None,
    }
}
