// galaxy-goldberg - GOG Galaxy emulator to Goldberg SteamEmu achievement bridge
//
// This is the library crate containing the core business logic and data structures.
// The binary crate (main.rs) runs the bridge headless until interrupted.

pub mod config;
pub mod controller;
pub mod logging;
pub mod models;
pub mod monitor;
pub mod services;
pub mod state;

// Re-export commonly used types for convenience
pub use crate::config::ConfigManager;
pub use controller::BridgeController;
pub use models::{AppState, BridgeConfig, BridgeSettings, GameEntry, SessionState, SessionStatus};
pub use monitor::{MonitorError, ProcessMonitor};
pub use state::{StateChange, StateManager};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");

/// Default data directory holding `Bridge Config.yaml`
pub const DATA_DIR: &str = "GalaxyGoldberg Data";
