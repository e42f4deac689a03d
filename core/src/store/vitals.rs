use super::MonitorStore;
use crate::{error::MonitorResult, types::Measurement};
use rusqlite::params;

impl MonitorStore {
    // ── Vitals ──────────────────────────────────────────────────────

    pub fn insert_measurement(&self, m: &Measurement) -> MonitorResult<()> {
        self.conn.execute(
            "INSERT INTO vitals (subject_id, label, valuenum, charttime) VALUES (?1, ?2, ?3, ?4)",
            params![m.subject_id, m.label, m.value, m.observed_at],
        )?;
        Ok(())
    }

    /// All numeric readings for one subject, oldest first.
    /// Ties on charttime keep insertion order.
    pub fn measurements_for(&self, subject_id: &str) -> MonitorResult<Vec<Measurement>> {
        let mut stmt = self.conn.prepare(
            "SELECT subject_id, label, valuenum, charttime
             FROM vitals
             WHERE subject_id = ?1 AND valuenum IS NOT NULL
             ORDER BY charttime ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![subject_id], |row| {
            Ok(Measurement {
                subject_id: row.get(0)?,
                label: row.get(1)?,
                value: row.get(2)?,
                observed_at: row.get(3)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Readings for the first `panel_size` subjects (by id), merged into
    /// one timeline ordered by charttime.
    pub fn panel_measurements(&self, panel_size: usize) -> MonitorResult<Vec<Measurement>> {
        let mut stmt = self.conn.prepare(
            "SELECT subject_id, label, valuenum, charttime
             FROM vitals
             WHERE valuenum IS NOT NULL
               AND subject_id IN (
                   SELECT DISTINCT subject_id FROM vitals ORDER BY subject_id LIMIT ?1
               )
             ORDER BY charttime ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![panel_size as i64], |row| {
            Ok(Measurement {
                subject_id: row.get(0)?,
                label: row.get(1)?,
                value: row.get(2)?,
                observed_at: row.get(3)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn measurement_count(&self) -> MonitorResult<i64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM vitals", [], |row| row.get(0))?;
        Ok(count)
    }
}
