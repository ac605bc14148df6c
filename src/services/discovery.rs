//! Discovery helpers used when building game entries.
//!
//! Reads the GOG `.info` manifests shipped in a game directory, locates the
//! Galaxy emulator's `achievements.json` for a game id, and finds injected
//! Galaxy libraries.

use crate::models::{BridgeSettings, GameEntry};
use crate::services::translator::DESTINATION_FILE_NAME;
use anyhow::{Context, Result, anyhow};
use camino::{Utf8Path, Utf8PathBuf};
use serde_json::Value;
use std::fs;
use std::time::SystemTime;
use walkdir::WalkDir;

/// Galaxy library file names, preferred first
pub const GALAXY_LIBRARY_NAMES: &[&str] = &["Galaxy64.dll", "Galaxy.dll"];

/// What a GOG `.info` manifest says about a game
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameInfo {
    pub gog_id: String,
    pub name: Option<String>,
    /// Primary executable, relative to the game directory
    pub executable: Option<String>,
    pub info_path: Utf8PathBuf,
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn parse_info(content: &str, info_path: &Utf8Path) -> Option<GameInfo> {
    let value: Value = serde_json::from_str(content).ok()?;
    let gog_id = ["rootGameId", "gameId"]
        .iter()
        .find_map(|key| value.get(*key).and_then(id_string))?;

    let primary_task = value
        .get("playTasks")
        .and_then(Value::as_array)
        .and_then(|tasks| {
            tasks
                .iter()
                .find(|task| {
                    task.get("isPrimary").and_then(Value::as_bool) == Some(true)
                        && task
                            .get("category")
                            .and_then(Value::as_str)
                            .is_none_or(|category| category == "game")
                })
        });

    Some(GameInfo {
        gog_id,
        name: ["name", "title"]
            .iter()
            .find_map(|key| value.get(*key).and_then(Value::as_str))
            .map(str::to_string),
        executable: primary_task
            .and_then(|task| task.get("path"))
            .and_then(Value::as_str)
            .map(str::to_string),
        info_path: info_path.to_path_buf(),
    })
}

/// Read the GOG manifest of a game directory.
///
/// Scans `*.info` files directly inside `game_dir` and returns the
/// first one that carries a primary play task. DLC manifests have no primary
/// task and are skipped.
///
/// # Returns
///
/// `Ok(None)` when no usable manifest exists.
pub fn read_game_info(game_dir: &Utf8Path) -> Result<Option<GameInfo>> {
    let mut manifests: Vec<Utf8PathBuf> = game_dir
        .read_dir_utf8()
        .with_context(|| format!("Failed to read game directory: {}", game_dir))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.into_path())
        .filter(|path| path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("info")))
        .collect();
    manifests.sort();

    for path in manifests {
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!("Failed to read {}: {}", path, e);
                continue;
            }
        };

        match parse_info(&content, &path) {
            Some(info) if info.executable.is_some() => {
                tracing::debug!("Found GOG manifest {} (id {})", path, info.gog_id);
                return Ok(Some(info));
            }
            Some(_) => tracing::debug!("Skipping {}: no primary play task", path),
            None => tracing::debug!("Skipping {}: not a game manifest", path),
        }
    }

    Ok(None)
}

/// Find the Galaxy emulator achievements file for a GOG id.
///
/// The emulator keeps one directory per user id under its root, each holding
/// `<gog_id>/achievements.json`. When several profiles have the file, the most
/// recently modified one wins.
pub fn find_achievements_file(emu_root: &Utf8Path, gog_id: &str) -> Option<Utf8PathBuf> {
    let entries = emu_root.read_dir_utf8().ok()?;

    entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_ok_and(|t| t.is_dir()))
        .filter_map(|entry| {
            let candidate = entry.path().join(gog_id).join(DESTINATION_FILE_NAME);
            let modified = fs::metadata(&candidate)
                .and_then(|m| m.modified())
                .ok()?;
            Some((modified, candidate))
        })
        .max_by_key(|(modified, _): &(SystemTime, Utf8PathBuf)| *modified)
        .map(|(_, path)| path)
}

/// Find injected Galaxy libraries anywhere under a game directory.
pub fn find_galaxy_libraries(game_dir: &Utf8Path) -> Vec<Utf8PathBuf> {
    let mut libraries: Vec<Utf8PathBuf> = WalkDir::new(game_dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry.file_name().to_str().is_some_and(|name| {
                GALAXY_LIBRARY_NAMES
                    .iter()
                    .any(|lib| lib.eq_ignore_ascii_case(name))
            })
        })
        .filter_map(|entry| Utf8PathBuf::from_path_buf(entry.into_path()).ok())
        .collect();

    // Galaxy64.dll sorts before Galaxy.dll at equal depth
    libraries.sort_by_key(|path| {
        let preferred = path
            .file_name()
            .is_some_and(|name| name.eq_ignore_ascii_case(GALAXY_LIBRARY_NAMES[0]));
        (path.components().count(), !preferred, path.clone())
    });
    libraries
}

/// Build a game entry from an install directory and a Steam app id.
///
/// # Arguments
///
/// * `game_dir` - Game install directory containing the GOG manifest
/// * `steam_id` - Steam app id of the same game
/// * `settings` - Supplies the emulator and Goldberg roots
///
/// # Returns
///
/// The entry, with the source path pointing at the newest emulator profile
/// that has the file, or at the first profile directory if none has it yet.
pub fn build_game_entry(
    game_dir: &Utf8Path,
    steam_id: u64,
    settings: &BridgeSettings,
) -> Result<GameEntry> {
    let info = read_game_info(game_dir)?
        .ok_or_else(|| anyhow!("No GOG manifest with a primary play task in {}", game_dir))?;

    let source_path = match find_achievements_file(&settings.galaxy_emu_root, &info.gog_id) {
        Some(path) => path,
        None => first_profile_dir(&settings.galaxy_emu_root)?
            .join(&info.gog_id)
            .join(DESTINATION_FILE_NAME),
    };

    let executable = info
        .executable
        .as_deref()
        .and_then(|exe| Utf8Path::new(&exe.replace('\\', "/")).file_name().map(str::to_string));

    let name = info
        .name
        .clone()
        .or_else(|| game_dir.file_name().map(str::to_string))
        .unwrap_or_else(|| info.gog_id.clone());

    let library_paths = find_galaxy_libraries(game_dir);
    if library_paths.is_empty() {
        tracing::warn!("No Galaxy library found under {}", game_dir);
    }

    Ok(GameEntry {
        name,
        gog_id: info.gog_id,
        steam_id,
        game_dir: game_dir.to_path_buf(),
        executable,
        source_path,
        destination_dir: settings.goldberg_saves_root.join(steam_id.to_string()),
        library_paths,
    })
}

fn first_profile_dir(emu_root: &Utf8Path) -> Result<Utf8PathBuf> {
    let mut dirs: Vec<Utf8PathBuf> = emu_root
        .read_dir_utf8()
        .with_context(|| format!("Galaxy emulator directory not found: {}", emu_root))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_ok_and(|t| t.is_dir()))
        .map(|entry| entry.into_path())
        .collect();
    dirs.sort();
    dirs.into_iter()
        .next()
        .ok_or_else(|| anyhow!("No Galaxy emulator profile under {}", emu_root))
}
