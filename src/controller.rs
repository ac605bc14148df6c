// Bridge Controller - the operations a front end drives
//
// This module contains the BridgeController which coordinates between:
// - ConfigManager (the persisted game list)
// - StateManager (runtime status and change events)
// - ProcessMonitor (runs on the tokio runtime until stopped)
// - the library patcher (synchronous, run on demand)

use crate::config::ConfigManager;
use crate::models::{BridgeConfig, GameEntry, SessionStatus};
use crate::monitor::{MonitorError, ProcessMonitor};
use crate::services::discovery;
use crate::services::patcher::{self, LibraryError, PatchOutcome, PatchState, PatchTarget};
use crate::services::process::{ProcessSource, SystemProcesses};
use crate::state::StateManager;
use anyhow::{Context, Result, anyhow};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Front-end facing controller for one bridge instance
///
/// Owns the configuration, starts and stops the process monitor, and runs
/// library operations for configured games.
///
/// # Example
/// ```ignore
/// let config_manager = ConfigManager::new("GalaxyGoldberg Data")?;
/// let mut controller = BridgeController::from_config(config_manager)?;
/// controller.start_monitoring();
/// tokio::signal::ctrl_c().await?;
/// controller.stop_monitoring().await?;
/// ```
pub struct BridgeController {
    state_manager: Arc<StateManager>,
    config_manager: ConfigManager,
    config: BridgeConfig,

    /// Send `true` to stop the running monitor
    cancel_tx: Option<watch::Sender<bool>>,
    monitor_task: Option<JoinHandle<Result<(), MonitorError>>>,
}

impl BridgeController {
    /// Create a controller for an already loaded configuration
    ///
    /// # Arguments
    /// * `state_manager` - Shared state; receives the configured games
    /// * `config_manager` - Used to persist game list edits
    /// * `config` - The loaded configuration
    pub fn new(
        state_manager: Arc<StateManager>,
        config_manager: ConfigManager,
        config: BridgeConfig,
    ) -> Self {
        state_manager.load_games(&config);
        Self {
            state_manager,
            config_manager,
            config,
            cancel_tx: None,
            monitor_task: None,
        }
    }

    /// Load the configuration and create a controller with fresh state
    pub fn from_config(config_manager: ConfigManager) -> Result<Self> {
        let config = config_manager.load_config()?;
        Ok(Self::new(Arc::new(StateManager::new()), config_manager, config))
    }

    pub fn state(&self) -> &Arc<StateManager> {
        &self.state_manager
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitor_task.is_some()
    }

    /// Start the process monitor on the system process table
    ///
    /// Must be called from within a tokio runtime. Does nothing if the
    /// monitor is already running.
    pub fn start_monitoring(&mut self) {
        self.start_monitoring_with(SystemProcesses::new());
    }

    /// Start the process monitor with a specific process source
    pub fn start_monitoring_with<S: ProcessSource + 'static>(&mut self, source: S) {
        if self.monitor_task.is_some() {
            tracing::debug!("Process monitor already running");
            return;
        }

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let monitor = ProcessMonitor::new(Arc::clone(&self.state_manager), source, &self.config.settings);
        self.monitor_task = Some(tokio::spawn(monitor.run(cancel_rx)));
        self.cancel_tx = Some(cancel_tx);
    }

    /// Stop the process monitor and wait until every session has stopped
    pub async fn stop_monitoring(&mut self) -> Result<()> {
        if let Some(cancel_tx) = self.cancel_tx.take() {
            let _ = cancel_tx.send(true);
        }
        match self.monitor_task.take() {
            Some(task) => Self::finish(task.await),
            None => Ok(()),
        }
    }

    /// Wait for the monitor to end on its own, which only happens on a fatal error
    ///
    /// Cancel-safe: if the returned future is dropped, the monitor keeps running.
    pub async fn monitor_exited(&mut self) -> Result<()> {
        let Some(task) = self.monitor_task.as_mut() else {
            return std::future::pending().await;
        };
        let joined = task.await;
        self.monitor_task = None;
        self.cancel_tx = None;
        Self::finish(joined)
    }

    fn finish(joined: Result<Result<(), MonitorError>, tokio::task::JoinError>) -> Result<()> {
        joined
            .context("Process monitor task failed")?
            .context("Process monitor stopped with an error")
    }

    /// Current status of one game entry
    pub fn session_status(&self, key: &str) -> Option<SessionStatus> {
        self.state_manager.read(|state| state.session(key).cloned())
    }

    /// Current status of every game entry, in configuration order
    pub fn statuses(&self) -> IndexMap<String, SessionStatus> {
        self.state_manager.read(|state| state.sessions.clone())
    }

    fn libraries_of(&self, key: &str) -> Result<Vec<Utf8PathBuf>> {
        let entry = self
            .config
            .games
            .get(key)
            .ok_or_else(|| anyhow!("Unknown game: {}", key))?;
        if entry.libraries().is_empty() {
            return Err(anyhow!("No Galaxy library configured for {}", entry.name));
        }
        Ok(entry.libraries().to_vec())
    }

    fn record_library_error(&self, key: &str, error: &LibraryError) {
        let state = match error {
            LibraryError::Unsupported { .. } => PatchState::Unsupported,
            _ => PatchState::Unknown,
        };
        self.state_manager.set_library_state(key, state);
    }

    /// Inspect every library of a game entry without modifying them
    ///
    /// The entry's library state is the least patched of its libraries.
    pub fn inspect_library(&self, key: &str) -> Result<Vec<PatchTarget>> {
        let mut targets = Vec::new();
        for path in self.libraries_of(key)? {
            match patcher::inspect(&path) {
                Ok(target) => targets.push(target),
                Err(e) => {
                    self.record_library_error(key, &e);
                    return Err(e.into());
                }
            }
        }
        self.state_manager.set_library_state(key, combined_state(&targets));
        Ok(targets)
    }

    /// Patch every library of a game entry, in configured order
    ///
    /// Stops at the first library that cannot be patched; libraries before it
    /// stay patched and keep their backups.
    pub fn patch_library(&self, key: &str) -> Result<Vec<PatchOutcome>> {
        let mut outcomes = Vec::new();
        for path in self.libraries_of(key)? {
            match patcher::patch(&path) {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    self.record_library_error(key, &e);
                    return Err(e.into());
                }
            }
        }
        self.state_manager.set_library_state(key, PatchState::Patched);
        Ok(outcomes)
    }

    /// Restore every library of a game entry that has a backup
    ///
    /// # Returns
    /// The libraries that were restored
    pub fn restore_library(&self, key: &str) -> Result<Vec<Utf8PathBuf>> {
        let libraries = self.libraries_of(key)?;
        let mut restored = Vec::new();
        for path in &libraries {
            if !patcher::backup_path(path).exists() {
                continue;
            }
            patcher::restore(path)?;
            restored.push(path.clone());
        }

        if restored.is_empty() {
            return Err(LibraryError::NoBackup {
                backup: patcher::backup_path(&libraries[0]),
            }
            .into());
        }

        self.inspect_library(key)?;
        Ok(restored)
    }

    /// Build an entry from an install directory and add it under `key`
    ///
    /// Reads the GOG manifest in `game_dir` and locates the emulator's
    /// achievements file and the injected libraries.
    pub fn register_game(&mut self, key: &str, game_dir: &Utf8Path, steam_id: u64) -> Result<GameEntry> {
        let entry = discovery::build_game_entry(game_dir, steam_id, &self.config.settings)
            .with_context(|| format!("Failed to register {}", game_dir))?;
        self.add_game(key, entry.clone())?;
        Ok(entry)
    }

    /// Add or replace a game entry and persist the configuration
    ///
    /// A running monitor picks the change up on its next poll.
    pub fn add_game(&mut self, key: &str, entry: GameEntry) -> Result<()> {
        self.config.games.insert(key.to_string(), entry.clone());
        self.config_manager.save_config(&self.config)?;
        self.state_manager.upsert_game(key, entry);
        tracing::info!("Added game {}", key);
        Ok(())
    }

    /// Remove a game entry and persist the configuration
    ///
    /// # Returns
    /// Whether the entry existed
    pub fn remove_game(&mut self, key: &str) -> Result<bool> {
        if self.config.games.shift_remove(key).is_none() {
            return Ok(false);
        }
        self.config_manager.save_config(&self.config)?;
        self.state_manager.remove_game(key);
        tracing::info!("Removed game {}", key);
        Ok(true)
    }

    /// Re-read the configuration file and replace the game list
    pub fn reload_config(&mut self) -> Result<()> {
        self.config = self.config_manager.load_config()?;
        self.state_manager.load_games(&self.config);
        Ok(())
    }
}

/// Least patched state among an entry's libraries
fn combined_state(targets: &[PatchTarget]) -> PatchState {
    let has = |state: PatchState| targets.iter().any(|t| t.state == state);
    if has(PatchState::Unsupported) {
        PatchState::Unsupported
    } else if has(PatchState::Unpatched) {
        PatchState::Unpatched
    } else if !targets.is_empty() && targets.iter().all(|t| t.state == PatchState::Patched) {
        PatchState::Patched
    } else {
        PatchState::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(state: PatchState) -> PatchTarget {
        PatchTarget {
            path: Utf8PathBuf::from("Galaxy64.dll"),
            state,
            version: None,
            gate_offset: None,
        }
    }

    #[test]
    fn test_combined_state_is_least_patched() {
        use PatchState::*;
        assert_eq!(combined_state(&[target(Patched), target(Patched)]), Patched);
        assert_eq!(combined_state(&[target(Patched), target(Unpatched)]), Unpatched);
        assert_eq!(combined_state(&[target(Unpatched), target(Unsupported)]), Unsupported);
        assert_eq!(combined_state(&[]), Unknown);
    }
}
