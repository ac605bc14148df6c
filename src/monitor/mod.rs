//! Process monitor: decides which game entries are being watched.
//!
//! Every poll enumerates running processes and compares them with the
//! configured games. An entry with a matching process moves Idle → Watching
//! and gets a [`Session`]; an entry whose process is gone (or whose
//! configuration was removed or edited) moves back to Idle and its session is
//! stopped.
//!
//! Stopping a session waits for an in-flight translation pass, so it runs on a
//! background task. A session for the same entry is never restarted before
//! the previous one has fully stopped; until then the entry is skipped and
//! retried on the next poll, so one slow pass never holds up the others.

mod session;

pub use session::Session;

use crate::models::{BridgeSettings, GameEntry, SessionState};
use crate::services::process::{ProcessInfo, ProcessSource, find_match};
use crate::services::watcher::WatchError;
use crate::state::StateManager;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error(transparent)]
    Watch(#[from] WatchError),
}

/// What one poll changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollReport {
    pub started: Vec<String>,
    pub stopped: Vec<String>,
}

impl PollReport {
    pub fn is_empty(&self) -> bool {
        self.started.is_empty() && self.stopped.is_empty()
    }
}

/// Shortest period accepted by [`ProcessMonitor::with_timing`]
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

pub struct ProcessMonitor<S: ProcessSource + 'static> {
    state: Arc<StateManager>,
    /// Enumeration blocks, so it runs on the blocking pool
    source: Arc<Mutex<S>>,
    poll_interval: Duration,
    debounce: Duration,

    /// Game list as of `games_revision`
    games: IndexMap<String, GameEntry>,
    games_revision: Option<u64>,

    sessions: HashMap<String, Session>,
    /// Sessions being stopped in the background, keyed by entry
    stopping: HashMap<String, JoinHandle<()>>,
}

impl<S: ProcessSource + 'static> ProcessMonitor<S> {
    pub fn new(state: Arc<StateManager>, source: S, settings: &BridgeSettings) -> Self {
        Self::with_timing(state, source, settings.poll_interval(), settings.debounce())
    }

    pub fn with_timing(
        state: Arc<StateManager>,
        source: S,
        poll_interval: Duration,
        debounce: Duration,
    ) -> Self {
        Self {
            state,
            source: Arc::new(Mutex::new(source)),
            poll_interval: poll_interval.max(MIN_POLL_INTERVAL),
            debounce,
            games: IndexMap::new(),
            games_revision: None,
            sessions: HashMap::new(),
            stopping: HashMap::new(),
        }
    }

    /// Keys of entries with an active session, sorted
    pub fn active_sessions(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.sessions.keys().cloned().collect();
        keys.sort();
        keys
    }

    fn reload_games(&mut self) {
        let (revision, games) = self.state.games_snapshot();
        if self.games_revision != Some(revision) {
            tracing::debug!("Game list changed (revision {}, {} entries)", revision, games.len());
            self.games = games;
            self.games_revision = Some(revision);
        }
    }

    /// Enumerate processes off the async workers. `None` if enumeration panicked.
    async fn snapshot(source: Arc<Mutex<S>>) -> Option<Vec<ProcessInfo>> {
        let joined = tokio::task::spawn_blocking(move || {
            source
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .snapshot()
        })
        .await;

        match joined {
            Ok(processes) => Some(processes),
            Err(e) => {
                tracing::error!("Process enumeration failed, skipping this poll: {}", e);
                None
            }
        }
    }

    /// Run one poll: enumerate processes and start or stop sessions.
    ///
    /// # Errors
    ///
    /// Only when a filesystem watcher cannot be created at all. Everything
    /// else is logged and retried on the next poll.
    pub async fn poll_once(&mut self) -> Result<PollReport, MonitorError> {
        self.reload_games();
        self.stopping.retain(|_, handle| !handle.is_finished());

        let mut report = PollReport::default();
        let Some(processes) = Self::snapshot(Arc::clone(&self.source)).await else {
            return Ok(report);
        };

        let mut to_stop = Vec::new();
        for (key, session) in &self.sessions {
            let keep = match self.games.get(key) {
                Some(entry) => entry == session.entry() && find_match(entry, &processes).is_some(),
                None => false,
            };
            if !keep {
                to_stop.push(key.clone());
            }
        }
        for key in to_stop {
            self.stop_session(&key);
            report.stopped.push(key);
        }

        let to_start: Vec<(String, GameEntry, String)> = self
            .games
            .iter()
            .filter(|(key, _)| !self.sessions.contains_key(*key))
            .filter_map(|(key, entry)| {
                find_match(entry, &processes).map(|process| {
                    let exe = process
                        .exe
                        .as_ref()
                        .map(|p| p.to_string())
                        .unwrap_or_else(|| process.name.clone());
                    (key.clone(), entry.clone(), exe)
                })
            })
            .collect();

        for (key, entry, exe) in to_start {
            if let Some(handle) = self.stopping.remove(&key) {
                if !handle.is_finished() {
                    tracing::debug!("[{}] Previous session still stopping, retrying next poll", entry.name);
                    self.stopping.insert(key, handle);
                    continue;
                }
                if let Err(e) = handle.await {
                    tracing::error!("[{}] Stopping previous session failed: {}", entry.name, e);
                }
            }

            let session = Session::start(&key, &entry, Arc::clone(&self.state), self.debounce)?;
            tracing::info!("[{}] Game detected ({}), watching {}", entry.name, exe, entry.source_path);
            self.sessions.insert(key.clone(), session);
            self.state.set_session_state(&key, SessionState::Watching);
            report.started.push(key);
        }

        Ok(report)
    }

    fn stop_session(&mut self, key: &str) {
        let Some(session) = self.sessions.remove(key) else {
            return;
        };

        tracing::info!("[{}] Game no longer running, stopped watching", session.entry().name);
        self.state.set_session_state(key, SessionState::Idle);

        let handle = tokio::spawn(session.stop());
        self.stopping.insert(key.to_string(), handle);
    }

    /// Stop every session and wait until all of them have finished.
    pub async fn shutdown(&mut self) {
        let keys: Vec<String> = self.sessions.keys().cloned().collect();
        for key in keys {
            self.stop_session(&key);
        }
        for (key, handle) in self.stopping.drain() {
            if let Err(e) = handle.await {
                tracing::error!("Stopping session {} failed: {}", key, e);
            }
        }
    }

    /// Poll until `cancel` flips (or its sender is dropped), then shut down.
    pub async fn run(mut self, mut cancel: watch::Receiver<bool>) -> Result<(), MonitorError> {
        self.state.set_monitoring(true);
        tracing::info!("Process monitor started (poll every {:?})", self.poll_interval);

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let result = loop {
            tokio::select! {
                _ = cancel.changed() => break Ok(()),
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once().await {
                        tracing::error!("Process monitor stopped: {}", e);
                        break Err(e);
                    }
                }
            }
        };

        self.shutdown().await;
        self.state.set_monitoring(false);
        tracing::info!("Process monitor stopped");
        result
    }
}
