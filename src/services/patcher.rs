//! Galaxy library inspection and patching.
//!
//! The Galaxy emulator only reports achievement state when the injected
//! library's achievement gate is open. This module locates that gate by
//! signature, reports whether it is open, and opens it in place after taking
//! a backup of the original bytes.
//!
//! Only one library build is supported. Any other build (version marker
//! mismatch, gate not found, gate found more than once) is reported as
//! [`PatchState::Unsupported`] and is never written to.

use camino::{Utf8Path, Utf8PathBuf};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use thiserror::Error;

/// The one library version whose gate layout is known.
pub const SUPPORTED_GALAXY_VERSION: &str = "1.152.10.0";

/// Suffix appended to the library file name for the backup copy.
pub const BACKUP_SUFFIX: &str = ".bak";

/// Version resource key that carries the version marker (stored as UTF-16LE).
const VERSION_KEY: &str = "ProductVersion";

/// `cmp byte ptr [rip+disp32], 0` / `je +5` / `call rel32`
///
/// The conditional jump skips the achievement report call while the
/// internal flag is clear.
const GATE_CLOSED: &[Option<u8>] = &[
    Some(0x80), Some(0x3D), None, None, None, None, Some(0x00),
    Some(0x74), Some(0x05),
    Some(0xE8), None, None, None, None,
];

/// Same sequence with the jump replaced by two NOPs.
const GATE_OPEN: &[Option<u8>] = &[
    Some(0x80), Some(0x3D), None, None, None, None, Some(0x00),
    Some(0x90), Some(0x90),
    Some(0xE8), None, None, None, None,
];

/// Offset of the jump inside the gate signature
const GATE_JUMP_OFFSET: usize = 7;

/// Bytes written over the jump
const GATE_REPLACEMENT: [u8; 2] = [0x90, 0x90];

/// Patch state of an injected library
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PatchState {
    /// Not inspected yet
    #[default]
    Unknown,
    Unpatched,
    Patched,
    Unsupported,
}

impl fmt::Display for PatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PatchState::Unknown => "unknown",
            PatchState::Unpatched => "unpatched",
            PatchState::Patched => "patched",
            PatchState::Unsupported => "unsupported",
        };
        f.write_str(s)
    }
}

/// A located library and what inspection found in it.
///
/// Always computed fresh from disk; the file may change between calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchTarget {
    pub path: Utf8PathBuf,
    pub state: PatchState,
    /// Version marker found in the image, if any
    pub version: Option<String>,
    /// File offset of the gate jump, when the gate was located
    pub gate_offset: Option<usize>,
}

/// Result of a successful [`patch`] call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchOutcome {
    /// The gate was opened; the original bytes are in `backup`
    Patched { backup: Utf8PathBuf },
    /// The library was already patched; nothing was written
    AlreadyPatched,
}

/// Errors that can occur while inspecting or patching a library
#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("Failed to access {path}: {source}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} is not a recognizable library image: {reason}")]
    Format { path: Utf8PathBuf, reason: String },

    #[error(
        "{path} is an unsupported library build (version {}, supported {})",
        .version.as_deref().unwrap_or("unknown"),
        SUPPORTED_GALAXY_VERSION
    )]
    Unsupported {
        path: Utf8PathBuf,
        version: Option<String>,
    },

    #[error("Backup {backup} already exists and differs from the current library")]
    BackupExists { backup: Utf8PathBuf },

    #[error("No backup found at {backup}")]
    NoBackup { backup: Utf8PathBuf },

    #[error("Patching {path} failed: {reason}")]
    Patch { path: Utf8PathBuf, reason: String },
}

impl LibraryError {
    fn io(path: &Utf8Path, source: std::io::Error) -> Self {
        LibraryError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Backup location for a library: `<name>.bak` next to it.
pub fn backup_path(library: &Utf8Path) -> Utf8PathBuf {
    Utf8PathBuf::from(format!("{}{}", library, BACKUP_SUFFIX))
}

/// Inspect a library on disk.
///
/// # Errors
/// - [`LibraryError::Io`] if the file cannot be read
/// - [`LibraryError::Format`] if it is not a PE image
pub fn inspect(path: &Utf8Path) -> Result<PatchTarget, LibraryError> {
    let bytes = fs::read(path).map_err(|e| LibraryError::io(path, e))?;
    let target = inspect_bytes(path, &bytes)?;
    tracing::debug!(
        "Inspected {}: state={}, version={:?}",
        path,
        target.state,
        target.version
    );
    Ok(target)
}

fn inspect_bytes(path: &Utf8Path, bytes: &[u8]) -> Result<PatchTarget, LibraryError> {
    check_image(bytes).map_err(|reason| LibraryError::Format {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    })?;

    let version = read_version_marker(bytes);
    let mut target = PatchTarget {
        path: path.to_path_buf(),
        state: PatchState::Unsupported,
        version,
        gate_offset: None,
    };

    if target.version.as_deref() != Some(SUPPORTED_GALAXY_VERSION) {
        return Ok(target);
    }

    let closed = find_all(bytes, GATE_CLOSED);
    let open = find_all(bytes, GATE_OPEN);

    match (closed.as_slice(), open.as_slice()) {
        ([offset], []) => {
            target.state = PatchState::Unpatched;
            target.gate_offset = Some(offset + GATE_JUMP_OFFSET);
        }
        ([], [offset]) => {
            target.state = PatchState::Patched;
            target.gate_offset = Some(offset + GATE_JUMP_OFFSET);
        }
        _ => {
            tracing::warn!(
                "Achievement gate not uniquely located in {} ({} closed, {} open matches)",
                path,
                closed.len(),
                open.len()
            );
        }
    }

    Ok(target)
}

/// Open the achievement gate of a library in place.
///
/// Precondition: the library inspects as [`PatchState::Unpatched`]. An already
/// patched library is left alone and reported as [`PatchOutcome::AlreadyPatched`].
///
/// # Errors
/// - [`LibraryError::Unsupported`] if the build is not supported; the file is not touched
/// - [`LibraryError::BackupExists`] if a differing backup is already present
/// - [`LibraryError::Patch`] if the write succeeded but re-inspection does not
///   report `Patched`; restore from the backup with [`restore`]
pub fn patch(path: &Utf8Path) -> Result<PatchOutcome, LibraryError> {
    let target = inspect(path)?;

    let offset = match (target.state, target.gate_offset) {
        (PatchState::Patched, _) => {
            tracing::info!("{} is already patched", path);
            return Ok(PatchOutcome::AlreadyPatched);
        }
        (PatchState::Unpatched, Some(offset)) => offset,
        (PatchState::Unsupported, _) => {
            tracing::error!(
                "Refusing to patch unsupported library {} (version {:?})",
                path,
                target.version
            );
            return Err(LibraryError::Unsupported {
                path: path.to_path_buf(),
                version: target.version,
            });
        }
        (state, _) => {
            return Err(LibraryError::Patch {
                path: path.to_path_buf(),
                reason: format!("library is in state {}", state),
            });
        }
    };

    let backup = backup_path(path);
    ensure_backup(path, &backup)?;

    write_at(path, offset, &GATE_REPLACEMENT)?;

    let verified = inspect(path)?;
    if verified.state != PatchState::Patched {
        tracing::error!(
            "Patch verification failed for {}: found {}, restore from {}",
            path,
            verified.state,
            backup
        );
        return Err(LibraryError::Patch {
            path: path.to_path_buf(),
            reason: format!("verification found state {}", verified.state),
        });
    }

    tracing::info!("Patched {} (backup at {})", path, backup);
    Ok(PatchOutcome::Patched { backup })
}

/// Put the backed-up original back in place and remove the backup.
///
/// The original is copied over the library through a temporary file so the
/// library is never left half written.
pub fn restore(path: &Utf8Path) -> Result<(), LibraryError> {
    let backup = backup_path(path);
    if !backup.exists() {
        return Err(LibraryError::NoBackup { backup });
    }

    let original = fs::read(&backup).map_err(|e| LibraryError::io(&backup, e))?;
    let dir = path.parent().unwrap_or_else(|| Utf8Path::new("."));

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| LibraryError::io(path, e))?;
    tmp.write_all(&original)
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| LibraryError::io(path, e))?;
    tmp.persist(path)
        .map_err(|e| LibraryError::io(path, e.error))?;

    fs::remove_file(&backup).map_err(|e| LibraryError::io(&backup, e))?;

    tracing::info!("Restored {} from {}", path, backup);
    Ok(())
}

fn ensure_backup(path: &Utf8Path, backup: &Utf8Path) -> Result<(), LibraryError> {
    if backup.exists() {
        let current = fs::read(path).map_err(|e| LibraryError::io(path, e))?;
        let saved = fs::read(backup).map_err(|e| LibraryError::io(backup, e))?;
        if current != saved {
            return Err(LibraryError::BackupExists {
                backup: backup.to_path_buf(),
            });
        }
        tracing::debug!("Reusing identical backup {}", backup);
        return Ok(());
    }

    fs::copy(path, backup).map_err(|e| LibraryError::io(backup, e))?;
    tracing::debug!("Backed up {} to {}", path, backup);
    Ok(())
}

fn write_at(path: &Utf8Path, offset: usize, bytes: &[u8]) -> Result<(), LibraryError> {
    let patch_err = |e: std::io::Error| LibraryError::Patch {
        path: path.to_path_buf(),
        reason: e.to_string(),
    };

    let mut file = OpenOptions::new()
        .write(true)
        .open(path)
        .map_err(|e| LibraryError::io(path, e))?;
    file.seek(SeekFrom::Start(offset as u64)).map_err(patch_err)?;
    file.write_all(bytes).map_err(patch_err)?;
    file.sync_all().map_err(patch_err)?;
    Ok(())
}

/// Check for a DOS header pointing at a PE signature.
fn check_image(bytes: &[u8]) -> Result<(), &'static str> {
    if bytes.len() < 0x40 || &bytes[0..2] != b"MZ" {
        return Err("missing MZ header");
    }

    let e_lfanew = u32::from_le_bytes([bytes[0x3C], bytes[0x3D], bytes[0x3E], bytes[0x3F]]) as usize;
    match e_lfanew.checked_add(4).and_then(|end| bytes.get(e_lfanew..end)) {
        Some(sig) if sig == b"PE\0\0" => Ok(()),
        _ => Err("missing PE signature"),
    }
}

/// Read the UTF-16LE string that follows the `ProductVersion` key.
fn read_version_marker(bytes: &[u8]) -> Option<String> {
    let key: Vec<Option<u8>> = utf16le(VERSION_KEY).into_iter().map(Some).collect();
    let start = *find_all(bytes, &key).first()?;

    let mut i = start + key.len();
    // Key terminator and alignment padding
    while i + 1 < bytes.len() && bytes[i] == 0 && bytes[i + 1] == 0 {
        i += 2;
    }

    let mut units = Vec::new();
    while i + 1 < bytes.len() {
        let unit = u16::from_le_bytes([bytes[i], bytes[i + 1]]);
        if unit == 0 {
            break;
        }
        units.push(unit);
        i += 2;
    }

    String::from_utf16(&units).ok().filter(|s| !s.is_empty())
}

fn utf16le(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
}

/// All offsets where `pattern` matches; `None` bytes are wildcards.
fn find_all(haystack: &[u8], pattern: &[Option<u8>]) -> Vec<usize> {
    if pattern.is_empty() || haystack.len() < pattern.len() {
        return Vec::new();
    }

    haystack
        .windows(pattern.len())
        .enumerate()
        .filter(|(_, window)| {
            window
                .iter()
                .zip(pattern)
                .all(|(byte, expected)| match expected {
                    Some(e) => e == byte,
                    None => true,
                })
        })
        .map(|(pos, _)| pos)
        .collect()
}
