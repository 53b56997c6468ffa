//! Export file watcher.
//!
//! Watches the export file's parent directory (so deletion and re-creation by
//! a restarting checker are seen) and turns bursts of write events into one
//! "settled" signal once the file has been quiet for the debounce window.

use std::ffi::OsString;
use std::mem;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};

use crate::debounce::Debouncer;

/// Observable state of the export file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchState {
    /// A write was seen and the quiet window has not elapsed yet.
    pub pending: bool,
    /// Number of times the file has settled after a burst of writes.
    pub settled: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("export path has no file name: {}", .0.display())]
    NoFileName(PathBuf),
    #[error("failed to watch export directory: {0}")]
    Notify(#[from] notify::Error),
}

pub struct ExportWatcher {
    _watcher: RecommendedWatcher,
    state: watch::Receiver<WatchState>,
    task: JoinHandle<()>,
}

impl ExportWatcher {
    /// Start watching `path`. Must be called inside a tokio runtime.
    pub fn start(path: &Path, window: Duration) -> Result<Self, WatchError> {
        let file_name: OsString = path
            .file_name()
            .ok_or_else(|| WatchError::NoFileName(path.to_path_buf()))?
            .to_os_string();
        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let mut watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| match res {
                Ok(event) => {
                    let touches_export = event
                        .paths
                        .iter()
                        .any(|p| p.file_name() == Some(file_name.as_os_str()));
                    if touches_export && is_write(&event.kind) {
                        let _ = tx.send(());
                    }
                }
                Err(e) => tracing::warn!(error = %e, "Export watcher error"),
            },
            notify::Config::default(),
        )?;
        watcher.watch(&parent, RecursiveMode::NonRecursive)?;
        tracing::debug!(path = %path.display(), "Watching export file");

        let (state, task) = spawn_debounce(rx, window);
        Ok(Self {
            _watcher: watcher,
            state,
            task,
        })
    }

    #[must_use]
    pub fn state(&self) -> watch::Receiver<WatchState> {
        self.state.clone()
    }
}

impl Drop for ExportWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn is_write(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) | EventKind::Any
    )
}

/// Debounce raw write events into [`WatchState`] updates.
///
/// The task ends when the event sender is dropped.
pub fn spawn_debounce(
    mut events: mpsc::UnboundedReceiver<()>,
    window: Duration,
) -> (watch::Receiver<WatchState>, JoinHandle<()>) {
    let (state_tx, state_rx) = watch::channel(WatchState::default());
    let task = tokio::spawn(async move {
        let mut debouncer = Debouncer::new();
        loop {
            let deadline = debouncer.deadline();
            // Disabled branches are still constructed, so give it something valid.
            let wake_at = deadline.unwrap_or_else(|| Instant::now() + window);
            tokio::select! {
                event = events.recv() => match event {
                    Some(()) => {
                        debouncer.trigger(Instant::now(), window);
                        state_tx.send_if_modified(|state| !mem::replace(&mut state.pending, true));
                    }
                    None => break,
                },
                () = sleep_until(wake_at), if deadline.is_some() => {
                    if debouncer.fire(Instant::now()) {
                        state_tx.send_modify(|state| {
                            state.pending = false;
                            state.settled += 1;
                        });
                    }
                }
            }
        }
    });
    (state_rx, task)
}
