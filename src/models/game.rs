use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

/// One configured game.
///
/// Entries are created by the configuration collaborator and are read-only to
/// the monitoring core. Session state is tracked separately in
/// [`SessionStatus`](crate::models::SessionStatus) so the core never holds a
/// copy of an entry that could drift from the configured one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameEntry {
    /// Human-readable game name
    pub name: String,

    /// GOG `rootGameId`, the Galaxy emulator's instance id for this game
    pub gog_id: String,

    /// Steam app id the Goldberg save directory is keyed by
    pub steam_id: u64,

    /// Install directory; any process running from inside it belongs to this game
    pub game_dir: Utf8PathBuf,

    /// Optional process name that also identifies the game (e.g. `yakuza7.exe`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executable: Option<String>,

    /// Galaxy emulator `achievements.json` for this game
    pub source_path: Utf8PathBuf,

    /// Goldberg save directory (`.../Goldberg SteamEmu Saves/<steam_id>`)
    pub destination_dir: Utf8PathBuf,

    /// Injected Galaxy libraries (`Galaxy.dll` / `Galaxy64.dll`); a game may
    /// ship both, one per bitness
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub library_paths: Vec<Utf8PathBuf>,
}

impl GameEntry {
    /// Path of the Goldberg achievements file inside the destination directory
    pub fn destination_file(&self) -> Utf8PathBuf {
        self.destination_dir.join(crate::services::translator::DESTINATION_FILE_NAME)
    }

    /// Configured library paths, preferred first
    pub fn libraries(&self) -> &[Utf8PathBuf] {
        &self.library_paths
    }
}
