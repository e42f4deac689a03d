use super::{MonitorStore, PriorityRow};
use crate::error::MonitorResult;
use rusqlite::params;

impl MonitorStore {
    // ── Priority panel ──────────────────────────────────────────────

    pub fn upsert_priority(&self, subject_id: &str, priority: f64) -> MonitorResult<()> {
        self.conn.execute(
            "INSERT INTO priority_patients (id, risk_score) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET risk_score = excluded.risk_score",
            params![subject_id, priority],
        )?;
        Ok(())
    }

    /// Every subject on the panel, highest stored priority first.
    pub fn priority_panel(&self) -> MonitorResult<Vec<PriorityRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, risk_score FROM priority_patients
             ORDER BY risk_score DESC, id ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(PriorityRow {
                subject_id: row.get(0)?,
                priority: row.get(1)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}
