use crate::models::GameEntry;
use crate::services::patcher::PatchState;
use crate::services::translator::TranslationResult;
use chrono::{DateTime, Local};
use indexmap::IndexMap;

/// Monitoring state of one game entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Watching,
}

/// Status of one game entry as exposed to the UI collaborator.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionStatus {
    pub state: SessionState,

    /// Result of the most recent translation pass
    pub last_result: Option<TranslationResult>,

    /// Error of the most recent translation pass, if it failed
    pub last_error: Option<String>,

    /// When the most recent pass finished (successfully or not)
    pub last_translation_at: Option<DateTime<Local>>,

    /// Number of passes finished since startup
    pub passes: u64,

    /// Library state from the most recent inspection or patch
    pub library: PatchState,
}

/// Single source of truth for runtime state.
///
/// # Thread Safety
///
/// `AppState` is wrapped in `Arc<RwLock<AppState>>` by [`crate::state::StateManager`].
/// Never access `AppState` directly - always use the manager's methods:
/// - [`read()`](crate::state::StateManager::read) for read-only access
/// - [`update()`](crate::state::StateManager::update) for mutations with automatic change events
#[derive(Clone, Debug, Default)]
pub struct AppState {
    /// Configured games in configuration order
    pub games: IndexMap<String, GameEntry>,

    /// Bumped on every change to `games`; the monitor reloads when it moves
    pub games_revision: u64,

    /// Per-entry status, one per key in `games`
    pub sessions: IndexMap<String, SessionStatus>,

    pub is_monitoring: bool,
}

impl AppState {
    /// Keys of all entries currently being watched.
    pub fn watching(&self) -> Vec<String> {
        self.sessions
            .iter()
            .filter(|(_, status)| status.state == SessionState::Watching)
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Session status for one entry.
    pub fn session(&self, key: &str) -> Option<&SessionStatus> {
        self.sessions.get(key)
    }

    /// Replace the game list, keeping status for keys that survive.
    pub fn set_games(&mut self, games: IndexMap<String, GameEntry>) {
        self.sessions.retain(|key, _| games.contains_key(key));
        for key in games.keys() {
            self.sessions.entry(key.clone()).or_default();
        }
        self.games = games;
        self.games_revision += 1;
    }

    /// Insert or replace one game entry.
    pub fn upsert_game(&mut self, key: String, entry: GameEntry) {
        self.sessions.entry(key.clone()).or_default();
        self.games.insert(key, entry);
        self.games_revision += 1;
    }

    /// Remove one game entry. Returns whether it existed.
    pub fn remove_game(&mut self, key: &str) -> bool {
        let existed = self.games.shift_remove(key).is_some();
        self.sessions.shift_remove(key);
        if existed {
            self.games_revision += 1;
        }
        existed
    }
}
