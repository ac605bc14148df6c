//! Services module - the bridge's business logic, free of any runtime wiring.
//!
//! # Components
//!
//! - [`patcher`]: inspects, patches and restores the injected Galaxy library so
//!   that the game's achievement calls reach the emulator
//! - [`translator`]: merges the Galaxy emulator's `achievements.json` into
//!   Goldberg's, atomically and idempotently
//! - [`watcher`]: debounced change signals for one file
//! - [`process`]: process enumeration and matching processes to game entries
//! - [`discovery`]: reads GOG manifests and locates files when a game is added
//!
//! Patching and translation are synchronous and do plain file I/O; the
//! monitor runs translation on the blocking pool. The watcher needs a tokio
//! runtime.

pub mod discovery;
pub mod patcher;
pub mod process;
pub mod translator;
pub mod watcher;

pub use patcher::{LibraryError, PatchOutcome, PatchState, PatchTarget};
pub use process::{ProcessInfo, ProcessSource, SystemProcesses};
pub use translator::{SkipReason, TranslateError, TranslationResult};
pub use watcher::{FileWatcher, SourceChanged, WatchError};
