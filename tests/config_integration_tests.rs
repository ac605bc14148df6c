//! Integration tests for ConfigManager and configuration file handling
//!
//! These tests verify:
//! - Configuration loading and saving
//! - Default configuration when the file is missing
//! - Game entries survive a round trip through the file unchanged
//! - Integration with StateManager and the controller

use camino::Utf8PathBuf;
use galaxy_goldberg::models::{BridgeConfig, GameEntry};
use galaxy_goldberg::services::patcher::{
    PatchOutcome, PatchState, SUPPORTED_GALAXY_VERSION, backup_path,
};
use galaxy_goldberg::{BridgeController, ConfigManager, StateManager};
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

fn create_test_config_dir() -> (TempDir, Utf8PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let config_path = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
    (temp_dir, config_path)
}

fn utf16(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
}

/// Minimal supported library image with a closed achievement gate
fn unpatched_library() -> Vec<u8> {
    let mut bytes = vec![0u8; 0x800];
    bytes[0..2].copy_from_slice(b"MZ");
    bytes[0x3C..0x40].copy_from_slice(&0x100u32.to_le_bytes());
    bytes[0x100..0x104].copy_from_slice(b"PE\0\0");
    bytes[0x300..0x30E].copy_from_slice(&[
        0x80, 0x3D, 0x10, 0x20, 0x30, 0x40, 0x00, 0x74, 0x05, 0xE8, 0x01, 0x02, 0x03, 0x04,
    ]);
    let mut marker = utf16("ProductVersion");
    marker.extend_from_slice(&[0, 0]);
    marker.extend(utf16(SUPPORTED_GALAXY_VERSION));
    bytes[0x600..0x600 + marker.len()].copy_from_slice(&marker);
    bytes
}

fn yakuza(root: &Utf8PathBuf) -> GameEntry {
    GameEntry {
        name: "Yakuza: Like a Dragon".to_string(),
        gog_id: "1207664663".to_string(),
        steam_id: 1235140,
        game_dir: root.join("Games/Yakuza7"),
        executable: Some("YakuzaLikeADragon.exe".to_string()),
        source_path: root.join("NemirtingasGalaxyEmu/12345/1207664663/achievements.json"),
        destination_dir: root.join("Goldberg SteamEmu Saves/1235140"),
        library_paths: vec![root.join("Games/Yakuza7/Galaxy64.dll")],
    }
}

#[test]
fn test_create_config_manager() {
    let (_temp_dir, config_path) = create_test_config_dir();
    let manager = ConfigManager::new(&config_path).unwrap();

    assert_eq!(manager.config_dir(), &config_path);
}

#[test]
fn test_config_directory_creation() {
    let (_temp_dir, root) = create_test_config_dir();
    let nested = root.join("GalaxyGoldberg Data");
    assert!(!nested.exists());

    ConfigManager::new(&nested).unwrap();
    assert!(nested.is_dir());
}

#[test]
fn test_save_and_load_config() {
    let (_temp_dir, config_path) = create_test_config_dir();
    let manager = ConfigManager::new(&config_path).unwrap();

    let mut config = BridgeConfig::default();
    config.settings.poll_interval_ms = 1500;
    config.games.insert("Yakuza 7".to_string(), yakuza(&config_path));
    manager.save_config(&config).unwrap();

    let loaded = manager.load_config().unwrap();
    assert_eq!(loaded.settings.poll_interval_ms, 1500);
    assert_eq!(loaded.games.len(), 1);
    // Keys are kept exactly, including case and spaces
    assert_eq!(loaded.games["Yakuza 7"], yakuza(&config_path));
}

#[test]
fn test_handwritten_config() {
    let (_temp_dir, config_path) = create_test_config_dir();
    let manager = ConfigManager::new(&config_path).unwrap();

    let yaml = r#"
settings:
  debounce_ms: 500
games:
  Yakuza7:
    name: "Yakuza: Like a Dragon"
    gog_id: "1207664663"
    steam_id: 1235140
    game_dir: 'C:\Games\Yakuza7'
    source_path: 'C:\Users\me\AppData\Roaming\NemirtingasGalaxyEmu\12345\1207664663\achievements.json'
    destination_dir: 'C:\Users\me\AppData\Roaming\Goldberg SteamEmu Saves\1235140'
"#;
    fs::write(manager.config_path(), yaml).unwrap();

    let config = manager.load_config().unwrap();
    assert_eq!(config.settings.debounce_ms, 500);
    assert_eq!(config.settings.poll_interval_ms, 2000);

    let entry = &config.games["Yakuza7"];
    assert_eq!(entry.steam_id, 1235140);
    assert_eq!(entry.game_dir.as_str(), "C:\\Games\\Yakuza7");
    assert!(entry.executable.is_none());
    assert!(entry.library_paths.is_empty());
}

#[test]
fn test_invalid_yaml_handling() {
    let (_temp_dir, config_path) = create_test_config_dir();
    let manager = ConfigManager::new(&config_path).unwrap();

    fs::write(manager.config_path(), "games: {Yakuza7: {steam_id: not-a-number}}").unwrap();

    let result = manager.load_config();
    assert!(result.is_err(), "Should fail to parse invalid entry");
}

#[test]
fn test_config_integration_with_state() {
    let (_temp_dir, config_path) = create_test_config_dir();
    let manager = ConfigManager::new(&config_path).unwrap();

    let mut config = BridgeConfig::default();
    config.games.insert("Yakuza7".to_string(), yakuza(&config_path));
    manager.save_config(&config).unwrap();

    let state = Arc::new(StateManager::new());
    state.load_games(&manager.load_config().unwrap());

    let status = state.read(|s| s.session("Yakuza7").cloned()).unwrap();
    assert_eq!(status.library, PatchState::Unknown);
    assert!(status.last_result.is_none());
}

#[test]
fn test_controller_persists_game_edits() {
    let (_temp_dir, config_path) = create_test_config_dir();
    let manager = ConfigManager::new(&config_path).unwrap();

    let mut controller = BridgeController::from_config(manager.clone()).unwrap();
    controller.add_game("Yakuza7", yakuza(&config_path)).unwrap();

    assert!(manager.load_config().unwrap().games.contains_key("Yakuza7"));
    assert!(controller.session_status("Yakuza7").is_some());

    assert!(controller.remove_game("Yakuza7").unwrap());
    assert!(!controller.remove_game("Yakuza7").unwrap());
    assert!(manager.load_config().unwrap().games.is_empty());
    assert!(controller.session_status("Yakuza7").is_none());
}

#[test]
fn test_controller_library_errors_are_reported() {
    let (_temp_dir, config_path) = create_test_config_dir();
    let manager = ConfigManager::new(&config_path).unwrap();
    let mut controller = BridgeController::from_config(manager).unwrap();

    let mut entry = yakuza(&config_path);
    fs::create_dir_all(&entry.game_dir).unwrap();
    fs::write(&entry.libraries()[0], b"not a library").unwrap();
    controller.add_game("Yakuza7", entry.clone()).unwrap();

    assert!(controller.inspect_library("Yakuza7").is_err());
    assert!(controller.patch_library("Yakuza7").is_err());
    assert!(controller.inspect_library("missing").is_err());

    entry.library_paths.clear();
    controller.add_game("NoLib", entry).unwrap();
    let err = controller.patch_library("NoLib").unwrap_err();
    assert!(err.to_string().contains("No Galaxy library"));
}

#[test]
fn test_controller_registers_game_from_install_dir() {
    let (_temp_dir, root) = create_test_config_dir();
    let manager = ConfigManager::new(root.join("GalaxyGoldberg Data")).unwrap();

    let mut config = BridgeConfig::default();
    config.settings.galaxy_emu_root = root.join("NemirtingasGalaxyEmu");
    config.settings.goldberg_saves_root = root.join("Goldberg SteamEmu Saves");
    manager.save_config(&config).unwrap();

    let game_dir = root.join("Games/Yakuza7");
    fs::create_dir_all(game_dir.join("bin")).unwrap();
    fs::write(
        game_dir.join("goggame-1207664663.info"),
        r#"{"rootGameId": "1207664663", "name": "Yakuza: Like a Dragon",
            "playTasks": [{"category": "game", "isPrimary": true, "path": "bin\\Yakuza7.exe"}]}"#,
    )
    .unwrap();
    fs::write(game_dir.join("bin/Galaxy64.dll"), b"MZ").unwrap();
    fs::write(game_dir.join("bin/Galaxy.dll"), b"MZ").unwrap();

    let source_dir = root.join("NemirtingasGalaxyEmu/12345/1207664663");
    fs::create_dir_all(&source_dir).unwrap();
    fs::write(source_dir.join("achievements.json"), "{}").unwrap();

    let mut controller = BridgeController::from_config(manager.clone()).unwrap();
    let entry = controller.register_game("Yakuza7", &game_dir, 1235140).unwrap();

    assert_eq!(entry.name, "Yakuza: Like a Dragon");
    assert_eq!(entry.executable.as_deref(), Some("Yakuza7.exe"));
    assert_eq!(entry.source_path, source_dir.join("achievements.json"));
    assert_eq!(entry.destination_dir, root.join("Goldberg SteamEmu Saves/1235140"));
    assert_eq!(
        entry.library_paths,
        vec![game_dir.join("bin/Galaxy64.dll"), game_dir.join("bin/Galaxy.dll")]
    );

    assert_eq!(manager.load_config().unwrap().games["Yakuza7"], entry);
}

#[test]
fn test_controller_register_requires_manifest() {
    let (_temp_dir, root) = create_test_config_dir();
    let manager = ConfigManager::new(&root).unwrap();
    let mut controller = BridgeController::from_config(manager).unwrap();

    assert!(controller.register_game("Empty", &root, 1).is_err());
    assert!(controller.config().games.is_empty());
}

#[test]
fn test_controller_patches_and_restores_every_library() {
    let (_temp_dir, root) = create_test_config_dir();
    let manager = ConfigManager::new(root.join("GalaxyGoldberg Data")).unwrap();
    let mut controller = BridgeController::from_config(manager).unwrap();

    let mut entry = yakuza(&root);
    fs::create_dir_all(&entry.game_dir).unwrap();
    entry.library_paths = vec![
        entry.game_dir.join("Galaxy64.dll"),
        entry.game_dir.join("Galaxy.dll"),
    ];
    let original = unpatched_library();
    for library in &entry.library_paths {
        fs::write(library, &original).unwrap();
    }
    controller.add_game("Yakuza7", entry.clone()).unwrap();

    let targets = controller.inspect_library("Yakuza7").unwrap();
    assert_eq!(targets.len(), 2);
    assert!(targets.iter().all(|t| t.state == PatchState::Unpatched));
    assert_eq!(controller.session_status("Yakuza7").unwrap().library, PatchState::Unpatched);

    let outcomes = controller.patch_library("Yakuza7").unwrap();
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().all(|o| matches!(o, PatchOutcome::Patched { .. })));
    assert_eq!(controller.session_status("Yakuza7").unwrap().library, PatchState::Patched);
    for library in &entry.library_paths {
        assert!(backup_path(library).exists());
    }

    let restored = controller.restore_library("Yakuza7").unwrap();
    assert_eq!(restored, entry.library_paths);
    assert_eq!(controller.session_status("Yakuza7").unwrap().library, PatchState::Unpatched);
    for library in &entry.library_paths {
        assert_eq!(fs::read(library).unwrap(), original);
        assert!(!backup_path(library).exists());
    }

    // Nothing left to restore
    assert!(controller.restore_library("Yakuza7").is_err());
}
