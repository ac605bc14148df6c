//! Process enumeration and game matching.
//!
//! A process belongs to a game entry when its executable lives anywhere under
//! the entry's install directory, or when its name equals the entry's
//! configured executable name. Launchers start games under varying executable
//! names, so directory containment is the primary rule.

use crate::models::GameEntry;
use camino::{Utf8Path, Utf8PathBuf};
use sysinfo::System;

/// One running process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    /// Executable path; `None` when the OS denies access to it
    pub exe: Option<Utf8PathBuf>,
}

/// Source of process snapshots for the monitor.
#[cfg_attr(test, mockall::automock)]
pub trait ProcessSource: Send {
    /// Enumerate currently running processes.
    fn snapshot(&mut self) -> Vec<ProcessInfo>;
}

/// [`ProcessSource`] backed by the operating system process table.
pub struct SystemProcesses {
    system: System,
}

impl SystemProcesses {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }
}

impl Default for SystemProcesses {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessSource for SystemProcesses {
    fn snapshot(&mut self) -> Vec<ProcessInfo> {
        self.system.refresh_processes();
        self.system
            .processes()
            .iter()
            .map(|(pid, process)| ProcessInfo {
                pid: pid.as_u32(),
                name: process.name().to_string(),
                exe: process
                    .exe()
                    .and_then(|exe| Utf8PathBuf::from_path_buf(exe.to_path_buf()).ok()),
            })
            .collect()
    }
}

/// Split a path into lowercase components, accepting both separators.
fn components(path: &str) -> Vec<String> {
    path.split(['/', '\\'])
        .filter(|c| !c.is_empty() && *c != ".")
        .map(str::to_lowercase)
        .collect()
}

/// Whether `path` lies strictly inside `dir`.
///
/// Comparison is by path component, case-insensitive, and treats `/` and
/// `\` alike, since game paths come from Windows shortcuts and configs.
pub fn is_path_within(path: &Utf8Path, dir: &Utf8Path) -> bool {
    let dir = components(dir.as_str());
    let path = components(path.as_str());
    !dir.is_empty() && path.len() > dir.len() && path.starts_with(&dir)
}

/// Whether a process belongs to a game entry.
pub fn process_matches(entry: &GameEntry, process: &ProcessInfo) -> bool {
    if let Some(exe) = &process.exe {
        if is_path_within(exe, &entry.game_dir) {
            return true;
        }
    }

    entry
        .executable
        .as_deref()
        .is_some_and(|name| name.eq_ignore_ascii_case(&process.name))
}

/// First process that belongs to the entry, if any.
pub fn find_match<'a>(entry: &GameEntry, processes: &'a [ProcessInfo]) -> Option<&'a ProcessInfo> {
    processes.iter().find(|p| process_matches(entry, p))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(game_dir: &str, executable: Option<&str>) -> GameEntry {
        GameEntry {
            name: "Yakuza 7".to_string(),
            gog_id: "1234".to_string(),
            steam_id: 1235140,
            game_dir: Utf8PathBuf::from(game_dir),
            executable: executable.map(str::to_string),
            source_path: Utf8PathBuf::from("C:/emu/achievements.json"),
            destination_dir: Utf8PathBuf::from("C:/goldberg/1235140"),
            library_paths: Vec::new(),
        }
    }

    fn process(name: &str, exe: Option<&str>) -> ProcessInfo {
        ProcessInfo {
            pid: 42,
            name: name.to_string(),
            exe: exe.map(Utf8PathBuf::from),
        }
    }

    #[test]
    fn test_path_within_directory() {
        let dir = Utf8Path::new("C:/Games/Yakuza7");
        assert!(is_path_within(Utf8Path::new("C:/Games/Yakuza7/yakuza7.exe"), dir));
        assert!(is_path_within(Utf8Path::new("C:\\Games\\Yakuza7\\runtime\\media\\game.exe"), dir));
        assert!(is_path_within(Utf8Path::new("c:/games/yakuza7/Yakuza7.exe"), dir));
        assert!(is_path_within(Utf8Path::new("C:/Games/Yakuza7/yakuza7.exe"), Utf8Path::new("C:/Games/Yakuza7/")));
    }

    #[test]
    fn test_path_not_within_sibling_or_self() {
        let dir = Utf8Path::new("C:/Games/Yakuza7");
        assert!(!is_path_within(Utf8Path::new("C:/Games/Yakuza7 Remastered/game.exe"), dir));
        assert!(!is_path_within(Utf8Path::new("C:/Games/Yakuza7"), dir));
        assert!(!is_path_within(Utf8Path::new("C:/Games/other.exe"), dir));
        assert!(!is_path_within(Utf8Path::new("C:/Games/Yakuza7/a.exe"), Utf8Path::new("")));
    }

    #[test]
    fn test_process_matches_by_directory() {
        let entry = entry("C:/Games/Yakuza7", None);
        assert!(process_matches(&entry, &process("yakuza7.exe", Some("C:/Games/Yakuza7/yakuza7.exe"))));
        assert!(!process_matches(&entry, &process("yakuza7.exe", None)));
    }

    #[test]
    fn test_process_matches_by_name() {
        let entry = entry("D:/Elsewhere", Some("Yakuza7.exe"));
        assert!(process_matches(&entry, &process("yakuza7.exe", None)));
        assert!(!process_matches(&entry, &process("explorer.exe", Some("C:/Windows/explorer.exe"))));
    }

    #[test]
    fn test_mock_source_feeds_find_match() {
        let mut source = MockProcessSource::new();
        source.expect_snapshot().times(1).returning(|| {
            vec![
                process("explorer.exe", Some("C:/Windows/explorer.exe")),
                process("yakuza7.exe", Some("C:/Games/Yakuza7/yakuza7.exe")),
            ]
        });

        let processes = source.snapshot();
        let found = find_match(&entry("C:/Games/Yakuza7", None), &processes).unwrap();
        assert_eq!(found.name, "yakuza7.exe");
    }
}
