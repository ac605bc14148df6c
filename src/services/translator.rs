//! Galaxy → Goldberg achievement translation.
//!
//! Reads the Galaxy emulator's `achievements.json`, merges it into Goldberg's
//! `achievements.json` and commits the result atomically.
//!
//! The source file is written by the game while we read it, so empty and
//! half-written content is expected. Such passes are skipped without touching
//! the destination, and the next change signal retries. Correctness comes from
//! the merge being idempotent and monotonic:
//!
//! - an earned achievement is never reverted to unearned
//! - an existing unlock time is never replaced by a missing one
//! - a pass over unchanged input writes nothing

use crate::models::{DestinationRecord, DestinationStore, SourceRecord};
use camino::Utf8Path;
use chrono::{DateTime, NaiveDateTime};
use serde::Serialize;
use serde_json::{Map, Number, Value};
use std::fmt;
use std::fs;
use std::io::{ErrorKind, Write};
use thiserror::Error;

/// File name used by Goldberg inside the per-app save directory
pub const DESTINATION_FILE_NAME: &str = "achievements.json";

const EARNED_KEYS: &[&str] = &["earned", "unlocked", "achieved"];
const TIME_KEYS: &[&str] = &[
    "timestamp",
    "unlock_time",
    "unlockTime",
    "unlock_date",
    "earned_time",
    "time",
];
const PROGRESS_KEYS: &[&str] = &["progress", "current_progress"];
const ID_KEYS: &[&str] = &["id", "name", "api_name", "achievement_id"];

/// Epoch values above this are taken as milliseconds
const MILLIS_THRESHOLD: u64 = 100_000_000_000;

/// Why a pass did not touch the destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The source file exists but has no content yet
    EmptyFile,
    /// The source file is not valid Galaxy achievement JSON
    InvalidFormat,
    /// The source file does not exist (yet, or any more)
    MissingFile,
}

/// Outcome of one translation pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranslationResult {
    Skipped(SkipReason),
    /// Destination is up to date; the count is the number of records that changed
    Committed(usize),
}

impl fmt::Display for TranslationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranslationResult::Skipped(SkipReason::EmptyFile) => f.write_str("skipped (empty file)"),
            TranslationResult::Skipped(SkipReason::InvalidFormat) => {
                f.write_str("skipped (invalid format)")
            }
            TranslationResult::Skipped(SkipReason::MissingFile) => {
                f.write_str("skipped (missing file)")
            }
            TranslationResult::Committed(n) => write!(f, "committed ({} changed)", n),
        }
    }
}

/// Errors that abort a translation pass
#[derive(Error, Debug)]
pub enum TranslateError {
    #[error("Failed to read source {path}: {source}")]
    ReadSource {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read destination {path}: {source}")]
    ReadDestination {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write destination {path}: {source}")]
    WriteDestination {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Existing destination {path} is not valid achievement JSON: {source}")]
    CorruptDestination {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Run one translation pass from `source_path` into `destination_dir`.
///
/// # Errors
/// I/O failures on either side, or an existing destination that cannot be
/// parsed. In every error case the destination file is left as it was.
pub fn translate(
    source_path: &Utf8Path,
    destination_dir: &Utf8Path,
) -> Result<TranslationResult, TranslateError> {
    let content = match fs::read_to_string(source_path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            tracing::info!("Source achievements file is missing: {}", source_path);
            return Ok(TranslationResult::Skipped(SkipReason::MissingFile));
        }
        Err(e) if e.kind() == ErrorKind::InvalidData => {
            tracing::warn!("Source {} is not valid UTF-8", source_path);
            return Ok(TranslationResult::Skipped(SkipReason::InvalidFormat));
        }
        Err(source) => {
            return Err(TranslateError::ReadSource {
                path: source_path.to_string(),
                source,
            });
        }
    };

    if content.trim().is_empty() {
        tracing::info!("Source achievements file is empty: {}", source_path);
        return Ok(TranslationResult::Skipped(SkipReason::EmptyFile));
    }

    let records = match parse_source(&content) {
        Some(records) => records,
        None => {
            tracing::warn!("Source {} is not valid achievement JSON, skipping", source_path);
            return Ok(TranslationResult::Skipped(SkipReason::InvalidFormat));
        }
    };

    let destination_path = destination_dir.join(DESTINATION_FILE_NAME);
    let mut store = load_destination(&destination_path)?;
    let existed = destination_path.exists();

    let changed = merge_records(&mut store, &records, now_epoch());

    if changed > 0 || !existed {
        write_destination(destination_dir, &store)?;
        tracing::info!(
            "Processed {} -> {} ({} changed)",
            source_path,
            destination_path,
            changed
        );
    } else {
        tracing::debug!("No achievement changes for {}", destination_path);
    }

    Ok(TranslationResult::Committed(changed))
}

/// Parse Galaxy achievement JSON into source records.
///
/// Accepts an object keyed by achievement id or an array of objects carrying
/// their id. Returns `None` when the content is not JSON of either shape.
pub fn parse_source(content: &str) -> Option<Vec<SourceRecord>> {
    let value: Value = serde_json::from_str(content).ok()?;

    match value {
        Value::Object(map) => Some(
            map.into_iter()
                .map(|(id, value)| source_record(id, &value))
                .collect(),
        ),
        Value::Array(items) => {
            let mut records = Vec::with_capacity(items.len());
            for item in items {
                let fields = item.as_object()?;
                let id = ID_KEYS
                    .iter()
                    .find_map(|key| fields.get(*key).and_then(Value::as_str))?;
                records.push(source_record(id.to_string(), &item));
            }
            Some(records)
        }
        _ => None,
    }
}

fn source_record(id: String, value: &Value) -> SourceRecord {
    let fields = match value {
        Value::Object(fields) => fields,
        other => return bare_record(id, other),
    };

    let unlock_time = TIME_KEYS
        .iter()
        .find_map(|key| fields.get(*key).and_then(parse_timestamp));

    let earned = EARNED_KEYS
        .iter()
        .find_map(|key| fields.get(*key).and_then(parse_flag))
        .unwrap_or(unlock_time.is_some());

    let progress = PROGRESS_KEYS
        .iter()
        .find_map(|key| match fields.get(*key) {
            Some(Value::Number(n)) => Some(n.clone()),
            _ => None,
        });

    SourceRecord {
        id,
        earned,
        unlock_time,
        progress,
    }
}

/// A record given as a plain value instead of an object: `"ach": true`,
/// `"ach": 1` or `"ach": <timestamp>`.
fn bare_record(id: String, value: &Value) -> SourceRecord {
    let (earned, unlock_time) = match value {
        Value::Bool(b) => (*b, None),
        Value::Number(n) if matches!(n.as_u64(), Some(0 | 1)) => (n.as_u64() == Some(1), None),
        Value::Null => (false, None),
        other => {
            let unlock_time = parse_timestamp(other);
            (unlock_time.is_some(), unlock_time)
        }
    };

    SourceRecord {
        id,
        earned,
        unlock_time,
        progress: None,
    }
}

/// Numeric view of a progress value for comparisons
fn progress_value(n: &Number) -> f64 {
    n.as_f64().unwrap_or(0.0)
}

fn parse_flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_u64().map(|n| n != 0),
        _ => None,
    }
}

/// Parse a timestamp given as epoch seconds/milliseconds or an ISO-8601 string.
///
/// `null`, `0` and unparseable values are treated as "no timestamp".
pub fn parse_timestamp(value: &Value) -> Option<u64> {
    let seconds = match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f > 0.0).map(|f| f as u64))?,
        Value::String(s) => {
            let s = s.trim();
            if let Ok(n) = s.parse::<u64>() {
                n
            } else if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                u64::try_from(dt.timestamp()).ok()?
            } else {
                let naive = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
                    .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S"))
                    .ok()?;
                u64::try_from(naive.and_utc().timestamp()).ok()?
            }
        }
        _ => return None,
    };

    let seconds = if seconds > MILLIS_THRESHOLD {
        seconds / 1000
    } else {
        seconds
    };

    (seconds > 0).then_some(seconds)
}

/// Merge source records into the destination store.
///
/// `now` stamps earned records that arrive without an unlock time. Returns the
/// number of destination records that were added or changed.
pub fn merge_records(store: &mut DestinationStore, records: &[SourceRecord], now: u64) -> usize {
    let mut changed = 0;

    for record in records {
        match store.get_mut(&record.id) {
            None => {
                let earned_time = match (record.earned, record.unlock_time) {
                    (_, Some(t)) => t,
                    (true, None) => now,
                    (false, None) => 0,
                };
                store.insert(
                    record.id.clone(),
                    DestinationRecord {
                        earned: record.earned,
                        earned_time,
                        progress: record.progress.clone(),
                        extra: Map::new(),
                    },
                );
                changed += 1;
            }
            Some(existing) => {
                let before = existing.clone();

                if record.earned && !existing.earned {
                    existing.earned = true;
                    existing.earned_time = record
                        .unlock_time
                        .or((existing.earned_time > 0).then_some(existing.earned_time))
                        .unwrap_or(now);
                } else if existing.earned_time == 0 {
                    if let Some(t) = record.unlock_time {
                        existing.earned_time = t;
                    }
                }

                if let Some(progress) = &record.progress {
                    let grows = existing
                        .progress
                        .as_ref()
                        .is_none_or(|p| progress_value(progress) > progress_value(p));
                    if grows {
                        existing.progress = Some(progress.clone());
                    }
                }

                if *existing != before {
                    changed += 1;
                }
            }
        }
    }

    changed
}

/// Load the destination store; a missing file is an empty store.
pub fn load_destination(path: &Utf8Path) -> Result<DestinationStore, TranslateError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(DestinationStore::new()),
        Err(source) => {
            return Err(TranslateError::ReadDestination {
                path: path.to_string(),
                source,
            });
        }
    };

    if content.trim().is_empty() {
        return Ok(DestinationStore::new());
    }

    serde_json::from_str(&content).map_err(|source| TranslateError::CorruptDestination {
        path: path.to_string(),
        source,
    })
}

/// Serialize the store the way Goldberg's own files look (4-space indent).
pub fn render_destination(store: &DestinationStore) -> Vec<u8> {
    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut out, formatter);
    // Serializing string keys and plain records into a Vec cannot fail
    if store.serialize(&mut ser).is_err() {
        out.clear();
        out.extend_from_slice(b"{}");
    }
    out
}

/// Atomically replace `<dir>/achievements.json`.
///
/// Writes to a temporary file in the same directory and renames it over the
/// destination, so readers see either the old or the new file.
pub fn write_destination(dir: &Utf8Path, store: &DestinationStore) -> Result<(), TranslateError> {
    let path = dir.join(DESTINATION_FILE_NAME);
    let write_err = |source: std::io::Error| TranslateError::WriteDestination {
        path: path.to_string(),
        source,
    };

    fs::create_dir_all(dir).map_err(write_err)?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".achievements")
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(write_err)?;
    tmp.write_all(&render_destination(store)).map_err(write_err)?;
    tmp.as_file().sync_all().map_err(write_err)?;
    tmp.persist(&path).map_err(|e| write_err(e.error))?;

    Ok(())
}

fn now_epoch() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(id: &str, earned: bool, unlock_time: Option<u64>) -> SourceRecord {
        SourceRecord {
            id: id.to_string(),
            earned,
            unlock_time,
            progress: None,
        }
    }

    #[test]
    fn test_parse_object_form() {
        let records =
            parse_source(r#"{"ach_1":{"earned":true,"timestamp":1690000000},"ach_2":{"earned":false}}"#)
                .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], record("ach_1", true, Some(1690000000)));
        assert_eq!(records[1], record("ach_2", false, None));
    }

    #[test]
    fn test_parse_array_form() {
        let records = parse_source(
            r#"[{"id":"a","unlocked":1,"unlock_time":"2023-07-22T04:26:40Z"},{"name":"b","progress":3}]"#,
        )
        .unwrap();
        assert_eq!(records[0].id, "a");
        assert!(records[0].earned);
        assert_eq!(records[0].unlock_time, Some(1690000000));
        assert_eq!(records[1].id, "b");
        assert!(!records[1].earned);
        assert_eq!(records[1].progress, Some(Number::from(3)));
    }

    #[test]
    fn test_parse_rejects_other_shapes() {
        assert!(parse_source("{\"ach_1\":").is_none());
        assert!(parse_source("42").is_none());
        assert!(parse_source(r#"[{"no_id":true}]"#).is_none());
    }

    #[test]
    fn test_earned_inferred_from_timestamp() {
        let records = parse_source(r#"{"ach":{"unlock_time":1690000000}}"#).unwrap();
        assert!(records[0].earned);

        let records = parse_source(r#"{"ach":{"unlock_time":0}}"#).unwrap();
        assert!(!records[0].earned);
    }

    #[test]
    fn test_parse_timestamp_variants() {
        assert_eq!(parse_timestamp(&json!(1690000000)), Some(1690000000));
        assert_eq!(parse_timestamp(&json!(1690000000123u64)), Some(1690000000));
        assert_eq!(parse_timestamp(&json!(1690000000.5)), Some(1690000000));
        assert_eq!(parse_timestamp(&json!("1690000000")), Some(1690000000));
        assert_eq!(parse_timestamp(&json!("2023-07-22T04:26:40+00:00")), Some(1690000000));
        assert_eq!(parse_timestamp(&json!("2023-07-22 04:26:40")), Some(1690000000));
        assert_eq!(parse_timestamp(&json!(null)), None);
        assert_eq!(parse_timestamp(&json!(0)), None);
        assert_eq!(parse_timestamp(&json!("yesterday")), None);
    }

    #[test]
    fn test_merge_first_sight_carries_over() {
        let mut store = DestinationStore::new();
        let changed = merge_records(&mut store, &[record("a", true, Some(100))], 999);
        assert_eq!(changed, 1);
        assert_eq!(store["a"], DestinationRecord { earned: true, earned_time: 100, ..Default::default() });
    }

    #[test]
    fn test_merge_earned_without_time_uses_now() {
        let mut store = DestinationStore::new();
        merge_records(&mut store, &[record("a", true, None)], 999);
        assert_eq!(store["a"].earned_time, 999);
    }

    #[test]
    fn test_merge_never_reverts_unlock() {
        let mut store = DestinationStore::new();
        merge_records(&mut store, &[record("a", true, Some(100))], 999);
        let changed = merge_records(&mut store, &[record("a", false, None)], 999);
        assert_eq!(changed, 0);
        assert!(store["a"].earned);
        assert_eq!(store["a"].earned_time, 100);
    }

    #[test]
    fn test_merge_first_unlock_time_wins() {
        let mut store = DestinationStore::new();
        merge_records(&mut store, &[record("a", true, Some(100))], 999);
        let changed = merge_records(&mut store, &[record("a", true, Some(200))], 999);
        assert_eq!(changed, 0);
        assert_eq!(store["a"].earned_time, 100);
    }

    #[test]
    fn test_merge_late_unlock_updates() {
        let mut store = DestinationStore::new();
        merge_records(&mut store, &[record("a", false, None)], 999);
        let changed = merge_records(&mut store, &[record("a", true, Some(300))], 999);
        assert_eq!(changed, 1);
        assert_eq!(store["a"], DestinationRecord { earned: true, earned_time: 300, ..Default::default() });
    }

    #[test]
    fn test_merge_progress_only_grows() {
        let mut store = DestinationStore::new();
        let mut r = record("a", false, None);
        r.progress = Some(Number::from(5));
        merge_records(&mut store, &[r.clone()], 0);
        r.progress = Number::from_f64(2.5);
        assert_eq!(merge_records(&mut store, &[r.clone()], 0), 0);
        r.progress = Some(Number::from(7));
        assert_eq!(merge_records(&mut store, &[r], 0), 1);
        assert_eq!(store["a"].progress, Some(Number::from(7)));
    }

    #[test]
    fn test_parse_bare_values() {
        let records =
            parse_source(r#"{"a": true, "b": false, "c": 1, "d": 0, "e": 1690000000, "f": null}"#).unwrap();
        let by_id = |id: &str| records.iter().find(|r| r.id == id).unwrap().clone();

        assert_eq!(by_id("a"), record("a", true, None));
        assert_eq!(by_id("b"), record("b", false, None));
        assert_eq!(by_id("c"), record("c", true, None));
        assert_eq!(by_id("d"), record("d", false, None));
        assert_eq!(by_id("e"), record("e", true, Some(1690000000)));
        assert_eq!(by_id("f"), record("f", false, None));
    }

    #[test]
    fn test_merge_keeps_foreign_fields() {
        let mut store: DestinationStore = serde_json::from_value(json!({
            "a": {"earned": false, "earned_time": 0, "max_progress": 10, "progress": 2}
        }))
        .unwrap();
        merge_records(&mut store, &[record("a", true, Some(1690000000))], 0);

        assert_eq!(
            serde_json::to_value(&store).unwrap(),
            json!({"a": {"earned": true, "earned_time": 1690000000, "progress": 2, "max_progress": 10}})
        );
    }

    #[test]
    fn test_render_uses_goldberg_layout() {
        let mut store = DestinationStore::new();
        store.insert(
            "ach_1".to_string(),
            DestinationRecord { earned: true, earned_time: 1690000000, ..Default::default() },
        );
        let text = String::from_utf8(render_destination(&store)).unwrap();
        assert_eq!(
            text,
            "{\n    \"ach_1\": {\n        \"earned\": true,\n        \"earned_time\": 1690000000\n    }\n}"
        );
    }

    #[test]
    fn test_translation_result_display() {
        assert_eq!(TranslationResult::Committed(2).to_string(), "committed (2 changed)");
        assert_eq!(
            TranslationResult::Skipped(SkipReason::EmptyFile).to_string(),
            "skipped (empty file)"
        );
    }
}
