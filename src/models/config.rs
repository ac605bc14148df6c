use crate::models::GameEntry;
use camino::Utf8PathBuf;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Complete configuration from `Bridge Config.yaml`
///
/// Holds monitoring settings and the ordered list of configured games,
/// keyed by a stable user-facing key (usually the game name).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub settings: BridgeSettings,

    #[serde(default)]
    pub games: IndexMap<String, GameEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeSettings {
    /// How often the Process Monitor enumerates processes
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Quiet window that collapses a burst of file events into one change
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    #[serde(default)]
    pub debug_mode: bool,

    /// Root of the Galaxy emulator's per-user save tree
    #[serde(default = "default_galaxy_emu_root")]
    pub galaxy_emu_root: Utf8PathBuf,

    /// Root of the Goldberg emulator's per-app save tree
    #[serde(default = "default_goldberg_saves_root")]
    pub goldberg_saves_root: Utf8PathBuf,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            debounce_ms: default_debounce_ms(),
            log_dir: default_log_dir(),
            debug_mode: false,
            galaxy_emu_root: default_galaxy_emu_root(),
            goldberg_saves_root: default_goldberg_saves_root(),
        }
    }
}

/// Lower bound for the process poll cadence; `0` in the file means "as fast as allowed"
pub const MIN_POLL_INTERVAL_MS: u64 = 100;

impl BridgeSettings {
    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.poll_interval_ms.max(MIN_POLL_INTERVAL_MS))
    }

    pub fn debounce(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.debounce_ms)
    }
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_debounce_ms() -> u64 {
    300
}

fn default_log_dir() -> String {
    "logs".to_string()
}

/// `%APPDATA%` on Windows, `$XDG_CONFIG_HOME` elsewhere; falls back to the working directory.
fn appdata_dir() -> Utf8PathBuf {
    dirs::config_dir()
        .and_then(|p| Utf8PathBuf::from_path_buf(p).ok())
        .unwrap_or_else(|| Utf8PathBuf::from("."))
}

fn default_galaxy_emu_root() -> Utf8PathBuf {
    appdata_dir().join("NemirtingasGalaxyEmu")
}

fn default_goldberg_saves_root() -> Utf8PathBuf {
    appdata_dir().join("Goldberg SteamEmu Saves")
}
