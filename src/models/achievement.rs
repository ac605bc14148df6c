use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

/// One achievement as reported by the Galaxy emulator.
///
/// Lives only for the duration of a single translation pass.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRecord {
    pub id: String,
    pub earned: bool,
    /// Unlock time in epoch seconds; `None` when the source has no timestamp
    pub unlock_time: Option<u64>,
    /// Kept as a JSON number so integer progress stays an integer
    pub progress: Option<Number>,
}

/// One achievement in Goldberg's `achievements.json`.
///
/// `earned_time` is epoch seconds, `0` meaning "no timestamp". An earned
/// record always carries a non-zero `earned_time`. Fields written by other
/// tools (`max_progress` and the like) are carried through unchanged.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DestinationRecord {
    pub earned: bool,

    #[serde(default)]
    pub earned_time: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<Number>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The full Goldberg achievements file, keyed by achievement id in file order.
pub type DestinationStore = IndexMap<String, DestinationRecord>;
