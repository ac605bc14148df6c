//! Debounced change notifications for one source file.
//!
//! The watcher observes the file's parent directory (so it survives the file
//! being replaced, deleted or not existing yet) and collapses bursts of
//! filesystem events into a single [`SourceChanged`] signal once the burst has
//! been quiet for the debounce window.
//!
//! Signals are delivered on a channel with room for one pending signal. A
//! signal raised while one is already pending is merged into it, so a slow
//! consumer sees at most one queued re-run.

use camino::{Utf8Path, Utf8PathBuf};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// How often a missing or removed directory is re-checked
const REARM_INTERVAL: Duration = Duration::from_secs(1);

/// The watched file changed and should be re-read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceChanged;

#[derive(Error, Debug)]
pub enum WatchError {
    /// The platform refused to create a watch handle at all
    #[error("Failed to create filesystem watcher: {0}")]
    Backend(#[source] notify::Error),
}

/// A running watcher for one file. Dropping it also stops the watch.
pub struct FileWatcher {
    path: Utf8PathBuf,
    cancel_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl FileWatcher {
    /// Start watching `path`.
    ///
    /// The file does not need to exist. If it exists once the watch is
    /// armed, one initial signal is emitted.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        path: &Utf8Path,
        debounce: Duration,
    ) -> Result<(Self, mpsc::Receiver<SourceChanged>), WatchError> {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = raw_tx.send(res);
        })
        .map_err(WatchError::Backend)?;

        let (out_tx, out_rx) = mpsc::channel(1);
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let task = tokio::spawn(watch_loop(
            path.to_path_buf(),
            watcher,
            raw_rx,
            out_tx,
            cancel_rx,
            debounce,
        ));

        tracing::debug!("Started watcher for {}", path);

        Ok((
            Self {
                path: path.to_path_buf(),
                cancel_tx,
                task,
            },
            out_rx,
        ))
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Stop the watcher and wait for its task to exit.
    pub async fn stop(self) {
        let _ = self.cancel_tx.send(true);
        if let Err(e) = self.task.await {
            tracing::error!("Watcher task for {} failed: {}", self.path, e);
        }
        tracing::debug!("Stopped watcher for {}", self.path);
    }
}

fn touches_file(event: &Event, file_name: &str) -> bool {
    event.paths.iter().any(|p| {
        p.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.eq_ignore_ascii_case(file_name))
    })
}

async fn watch_loop(
    path: Utf8PathBuf,
    mut watcher: RecommendedWatcher,
    mut raw_rx: mpsc::UnboundedReceiver<notify::Result<Event>>,
    out: mpsc::Sender<SourceChanged>,
    mut cancel_rx: watch::Receiver<bool>,
    debounce: Duration,
) {
    let dir = match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent.to_path_buf(),
        _ => Utf8PathBuf::from("."),
    };
    let file_name = path.file_name().unwrap_or_default().to_string();

    let mut armed = false;
    let mut deadline: Option<Instant> = None;
    let mut rearm = tokio::time::interval(REARM_INTERVAL);
    rearm.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel_rx.changed() => break,
            _ = out.closed() => break,

            _ = rearm.tick() => {
                let dir_exists = dir.is_dir();
                if armed && !dir_exists {
                    let _ = watcher.unwatch(dir.as_std_path());
                    armed = false;
                    tracing::warn!("Directory {} was removed, waiting for it to reappear", dir);
                }
                if !armed && dir_exists {
                    match watcher.watch(dir.as_std_path(), RecursiveMode::NonRecursive) {
                        Ok(()) => {
                            armed = true;
                            tracing::debug!("Watching {} for {}", dir, file_name);
                            if path.is_file() {
                                deadline = Some(Instant::now() + debounce);
                            }
                        }
                        Err(e) => tracing::warn!("Failed to watch {}: {}", dir, e),
                    }
                }
            }

            Some(res) = raw_rx.recv() => match res {
                Ok(event) if touches_file(&event, &file_name) => {
                    if matches!(event.kind, EventKind::Remove(_)) && !path.exists() {
                        tracing::info!("{} was deleted, waiting for it to be recreated", path);
                    } else if !matches!(event.kind, EventKind::Access(_)) {
                        deadline = Some(Instant::now() + debounce);
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("Filesystem event error for {}: {}", path, e),
            },

            _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                deadline = None;
                match out.try_send(SourceChanged) {
                    Ok(()) => tracing::debug!("{} changed", path),
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::debug!("{} changed, merged into pending signal", path);
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => break,
                }
            }
        }
    }
}
