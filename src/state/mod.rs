// State management module
//
// This module provides the StateManager which wraps AppState with thread-safe access
// using Arc<RwLock<T>> and emits change events for whoever displays bridge status.

use crate::models::{AppState, BridgeConfig, GameEntry, SessionState};
use crate::services::patcher::PatchState;
use crate::services::translator::TranslationResult;
use chrono::Local;
use indexmap::IndexMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::broadcast;

/// Change events emitted when state is modified
///
/// These events are emitted to notify interested parties (a status display,
/// the headless runner's log) about state changes without requiring them to
/// poll the state.
#[derive(Clone, Debug, PartialEq)]
pub enum StateChange {
    /// The set of configured games changed
    GamesChanged { count: usize },

    /// The process monitor started polling
    MonitoringStarted,

    /// The process monitor stopped and all sessions are closed
    MonitoringStopped,

    /// A matching process was found and the entry is now watched
    SessionStarted { game: String },

    /// The game exited (or its entry went away) and the entry is idle again
    SessionEnded { game: String },

    /// A translation pass finished
    TranslationRecorded {
        game: String,
        result: TranslationResult,
    },

    /// A translation pass failed; the destination file was left untouched
    TranslationFailed { game: String, error: String },

    /// A library was inspected, patched or restored
    LibraryStateChanged { game: String, state: PatchState },
}

/// Thread-safe state manager with event emission
///
/// This is the central state management component that:
/// - Provides thread-safe access to [`AppState`] via `Arc<RwLock<T>>`
/// - Detects state changes and emits [`StateChange`] events
/// - Supports subscribing to state changes via tokio broadcast channels
///
/// # Usage
///
/// Always use `StateManager` instead of accessing [`AppState`] directly:
/// - [`read()`](Self::read) for reading state without cloning
/// - [`update()`](Self::update) for mutations with automatic event emission
/// - [`subscribe()`](Self::subscribe) for listening to state changes
///
/// # Related Types
///
/// - [`crate::models::AppState`]: The underlying state structure
/// - [`StateChange`]: Event types emitted on state mutations
/// - [`crate::config::ConfigManager`]: Loads the game list into state
/// - [`crate::monitor::ProcessMonitor`]: Drives session transitions
pub struct StateManager {
    /// The application state protected by RwLock for thread-safe access
    state: Arc<RwLock<AppState>>,

    /// Broadcast channel for emitting state change events
    state_tx: broadcast::Sender<StateChange>,
}

impl StateManager {
    /// Create a new StateManager with default state
    ///
    /// # Returns
    /// A new StateManager with a broadcast channel buffer of 100 events
    pub fn new() -> Self {
        let (state_tx, _) = broadcast::channel(100);
        Self {
            state: Arc::new(RwLock::new(AppState::default())),
            state_tx,
        }
    }

    // A panic while holding the lock leaves plain data behind; keep serving it.
    fn read_lock(&self) -> RwLockReadGuard<'_, AppState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_lock(&self) -> RwLockWriteGuard<'_, AppState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get a read-only snapshot of the current state
    pub fn snapshot(&self) -> AppState {
        self.read_lock().clone()
    }

    /// Execute a function with read access to the state
    ///
    /// # Example
    /// ```ignore
    /// let watching = state_manager.read(|state| state.watching());
    /// ```
    pub fn read<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&AppState) -> R,
    {
        let state = self.read_lock();
        f(&state)
    }

    /// Update the state and emit change events
    ///
    /// This is the primary way to modify state. It:
    /// 1. Captures the old state
    /// 2. Applies the update function
    /// 3. Detects what changed
    /// 4. Emits appropriate events
    ///
    /// # Arguments
    /// * `update_fn` - A function that mutates the state
    ///
    /// # Returns
    /// A vector of StateChange events that were emitted
    pub fn update<F>(&self, update_fn: F) -> Vec<StateChange>
    where
        F: FnOnce(&mut AppState),
    {
        let mut state = self.write_lock();
        let old_state = state.clone();

        update_fn(&mut state);

        let changes = Self::detect_changes(&old_state, &state);

        for change in &changes {
            // Ignore send errors - it's OK if no one is listening
            let _ = self.state_tx.send(change.clone());
        }

        changes
    }

    /// Subscribe to state change events
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.state_tx.subscribe()
    }

    /// Detect what changed between two states and generate events
    fn detect_changes(old: &AppState, new: &AppState) -> Vec<StateChange> {
        let mut changes = Vec::new();

        if old.games_revision != new.games_revision {
            changes.push(StateChange::GamesChanged {
                count: new.games.len(),
            });
        }

        if old.is_monitoring != new.is_monitoring {
            changes.push(if new.is_monitoring {
                StateChange::MonitoringStarted
            } else {
                StateChange::MonitoringStopped
            });
        }

        for (key, status) in &new.sessions {
            let previous = old.sessions.get(key).cloned().unwrap_or_default();

            if previous.state != status.state {
                changes.push(match status.state {
                    SessionState::Watching => StateChange::SessionStarted { game: key.clone() },
                    SessionState::Idle => StateChange::SessionEnded { game: key.clone() },
                });
            }

            if previous.passes != status.passes {
                match (&status.last_error, status.last_result) {
                    (Some(error), _) => changes.push(StateChange::TranslationFailed {
                        game: key.clone(),
                        error: error.clone(),
                    }),
                    (None, Some(result)) => changes.push(StateChange::TranslationRecorded {
                        game: key.clone(),
                        result,
                    }),
                    (None, None) => {}
                }
            }

            if previous.library != status.library {
                changes.push(StateChange::LibraryStateChanged {
                    game: key.clone(),
                    state: status.library,
                });
            }
        }

        changes
    }

    // Convenience methods for common state updates

    /// Replace the game list with the one from a loaded configuration
    pub fn load_games(&self, config: &BridgeConfig) -> Vec<StateChange> {
        let games = config.games.clone();
        tracing::info!("Loaded {} configured game(s)", games.len());
        self.update(|state| state.set_games(games))
    }

    /// Replace the game list
    pub fn set_games(&self, games: IndexMap<String, GameEntry>) -> Vec<StateChange> {
        self.update(|state| state.set_games(games))
    }

    /// Add or replace one game entry
    pub fn upsert_game(&self, key: &str, entry: GameEntry) -> Vec<StateChange> {
        self.update(|state| state.upsert_game(key.to_string(), entry))
    }

    /// Remove one game entry
    pub fn remove_game(&self, key: &str) -> Vec<StateChange> {
        self.update(|state| {
            state.remove_game(key);
        })
    }

    /// Current game list together with its revision
    pub fn games_snapshot(&self) -> (u64, IndexMap<String, GameEntry>) {
        self.read(|state| (state.games_revision, state.games.clone()))
    }

    /// Mark whether the process monitor is running
    pub fn set_monitoring(&self, monitoring: bool) -> Vec<StateChange> {
        self.update(|state| state.is_monitoring = monitoring)
    }

    /// Move an entry between Idle and Watching. Unknown keys are ignored.
    pub fn set_session_state(&self, key: &str, session_state: SessionState) -> Vec<StateChange> {
        self.update(|state| {
            if let Some(status) = state.sessions.get_mut(key) {
                status.state = session_state;
            }
        })
    }

    /// Record the outcome of a translation pass
    ///
    /// # Arguments
    /// * `key` - Game entry key
    /// * `outcome` - The pass result, or the error message if it failed
    pub fn record_translation(
        &self,
        key: &str,
        outcome: Result<TranslationResult, String>,
    ) -> Vec<StateChange> {
        self.update(|state| {
            if let Some(status) = state.sessions.get_mut(key) {
                match outcome {
                    Ok(result) => {
                        status.last_result = Some(result);
                        status.last_error = None;
                    }
                    Err(error) => status.last_error = Some(error),
                }
                status.last_translation_at = Some(Local::now());
                status.passes += 1;
            }
        })
    }

    /// Record the library state of an entry
    pub fn set_library_state(&self, key: &str, library: PatchState) -> Vec<StateChange> {
        self.update(|state| {
            if let Some(status) = state.sessions.get_mut(key) {
                status.library = library;
            }
        })
    }
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}

// Make StateManager cloneable for sharing across tasks
impl Clone for StateManager {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            state_tx: self.state_tx.clone(),
        }
    }
}
