//! Shared primitive types used across the monitor.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An opaque subject (patient) identifier.
pub type SubjectId = String;

/// The fallback risk value returned when no reliable computation is possible.
pub const NEUTRAL_SCORE: f64 = 0.5;

/// The weight-table key that is never a feature column.
pub const INTERCEPT: &str = "intercept";

/// One physiological reading. Immutable once read from the row source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Measurement {
    pub subject_id:  SubjectId,
    pub label:       String,
    pub value:       f64,
    pub observed_at: NaiveDateTime,
}

/// Identifies one playback cursor in the simulator registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "subject_id", rename_all = "snake_case")]
pub enum CursorKey {
    Global,
    Subject(SubjectId),
}

impl CursorKey {
    pub fn from_subject(subject_id: Option<&str>) -> Self {
        match subject_id {
            Some(id) => Self::Subject(id.to_string()),
            None => Self::Global,
        }
    }
}

impl fmt::Display for CursorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => write!(f, "global"),
            Self::Subject(id) => write!(f, "subject {id}"),
        }
    }
}
