//! One watching session: a file watcher plus the worker that translates.

use crate::models::GameEntry;
use crate::services::translator;
use crate::services::watcher::{FileWatcher, WatchError};
use crate::state::StateManager;
use camino::Utf8PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// A game entry in the Watching state.
///
/// Translation passes for one session run strictly one at a time on the
/// worker task. Signals that arrive during a pass are merged by the watcher's
/// one-slot channel, so at most one extra pass follows.
pub struct Session {
    key: String,
    entry: GameEntry,
    watcher: FileWatcher,
    worker: JoinHandle<()>,
    cancel_tx: watch::Sender<bool>,
}

impl Session {
    /// Start watching the entry's source file.
    ///
    /// # Errors
    ///
    /// Fails only if no filesystem watcher could be created at all.
    pub fn start(
        key: &str,
        entry: &GameEntry,
        state: Arc<StateManager>,
        debounce: Duration,
    ) -> Result<Self, WatchError> {
        let (watcher, mut signals) = FileWatcher::start(&entry.source_path, debounce)?;
        let (cancel_tx, mut cancel_rx) = watch::channel(false);

        let pass = Pass {
            key: key.to_string(),
            name: entry.name.clone(),
            source: entry.source_path.clone(),
            destination: entry.destination_dir.clone(),
            state,
        };

        let worker = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = cancel_rx.changed() => break,
                    signal = signals.recv() => match signal {
                        Some(_) => pass.run().await,
                        None => break,
                    },
                }
            }
            tracing::debug!("[{}] Translation worker finished", pass.name);
        });

        Ok(Self {
            key: key.to_string(),
            entry: entry.clone(),
            watcher,
            worker,
            cancel_tx,
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// The entry this session was started for
    pub fn entry(&self) -> &GameEntry {
        &self.entry
    }

    /// Stop watching. A pass already running is allowed to finish.
    pub async fn stop(self) {
        let _ = self.cancel_tx.send(true);
        self.watcher.stop().await;
        if let Err(e) = self.worker.await {
            tracing::error!("[{}] Translation worker failed: {}", self.entry.name, e);
        }
    }
}

/// Everything a translation pass needs, owned by the worker task
struct Pass {
    key: String,
    name: String,
    source: Utf8PathBuf,
    destination: Utf8PathBuf,
    state: Arc<StateManager>,
}

impl Pass {
    async fn run(&self) {
        let source = self.source.clone();
        let destination = self.destination.clone();
        let joined =
            tokio::task::spawn_blocking(move || translator::translate(&source, &destination)).await;

        match joined {
            Ok(Ok(result)) => {
                tracing::debug!("[{}] Translation pass {}", self.name, result);
                self.state.record_translation(&self.key, Ok(result));
            }
            Ok(Err(e)) => {
                tracing::warn!("[{}] Translation failed: {}", self.name, e);
                self.state.record_translation(&self.key, Err(e.to_string()));
            }
            Err(e) => {
                tracing::error!("[{}] Translation task panicked: {}", self.name, e);
                self.state.record_translation(&self.key, Err(e.to_string()));
            }
        }
    }
}
