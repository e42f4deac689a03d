//! SQLite persistence layer.
//!
//! RULE: Only the store talks to the database.
//! Components reach it through the RowSource trait; they never execute
//! SQL directly.

use crate::{error::MonitorResult, types::SubjectId};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

mod features;
mod priority;
mod vitals;

pub struct MonitorStore {
    conn: Connection,
}

/// One (feature, weight) pair from the weight table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightRow {
    pub feature: String,
    pub weight: f64,
}

/// One subject's stored triage priority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorityRow {
    pub subject_id: SubjectId,
    pub priority: f64,
}

/// Feature values for one subject, positionally aligned with the
/// requested columns. NULL columns are `None`.
pub type FeatureRow = Vec<Option<f64>>;

impl MonitorStore {
    pub fn open(path: &str) -> MonitorResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (shared-memory and :memory: ignore it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        Ok(Self { conn })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> MonitorResult<Self> {
        let conn = Connection::open(":memory:")?;
        Ok(Self { conn })
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> MonitorResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_foundation.sql"))?;
        Ok(())
    }
}

/// Quote an SQL identifier so a validated column name can be spliced
/// into a projection.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_ident_escapes_embedded_quotes() {
        assert_eq!(quote_ident("hr"), "\"hr\"");
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn migrate_is_repeatable() {
        let store = MonitorStore::in_memory().expect("in-memory store");
        store.migrate().expect("first migration");
        store.migrate().expect("second migration");
    }
}
