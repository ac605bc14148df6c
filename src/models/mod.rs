//! Data models for the bridge.
//!
//! This module contains the plain data structures shared by every component:
//! - [`GameEntry`]: One configured game, with its source, destination and library paths
//! - [`BridgeConfig`]: Settings and the ordered game list loaded from `Bridge Config.yaml`
//! - [`SourceRecord`] / [`DestinationRecord`]: The two achievement formats
//! - [`AppState`]: Runtime state (game entries plus per-entry session status)
//!
//! # Architecture Note
//!
//! The models are designed to be:
//! - **Serializable**: Config and achievement structs derive `Serialize`/`Deserialize`
//! - **Cloneable**: AppState is wrapped in `Arc<RwLock<>>` by [`StateManager`](crate::state::StateManager)
//! - **Passive**: No I/O happens here; services and the monitor own all side effects

pub mod achievement;
pub mod app_state;
pub mod config;
pub mod game;

pub use achievement::{DestinationRecord, DestinationStore, SourceRecord};
pub use app_state::{AppState, SessionState, SessionStatus};
pub use self::config::{BridgeConfig, BridgeSettings};
pub use game::GameEntry;
