use super::{quote_ident, FeatureRow, MonitorStore, WeightRow};
use crate::{
    error::{MonitorError, MonitorResult},
    types::INTERCEPT,
};
use rusqlite::{params, OptionalExtension};

/// Key column of the feature table; never a model feature.
const FEATURE_KEY_COLUMN: &str = "subject_id";

impl MonitorStore {
    // ── Feature schema ──────────────────────────────────────────────

    /// Column names of the feature table, excluding the key column.
    pub fn feature_column_names(&self) -> MonitorResult<Vec<String>> {
        let mut stmt = self.conn.prepare("PRAGMA table_info(vitals_features)")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names
            .into_iter()
            .filter(|name| name != FEATURE_KEY_COLUMN)
            .collect())
    }

    // ── Feature rows ────────────────────────────────────────────────

    /// Insert or replace one subject's feature row. Unknown columns are
    /// rejected rather than silently dropped.
    pub fn upsert_feature_row(
        &self,
        subject_id: &str,
        values: &[(&str, Option<f64>)],
    ) -> MonitorResult<()> {
        let known = self.feature_column_names()?;
        if let Some((unknown, _)) = values.iter().find(|(c, _)| !known.iter().any(|k| k == c)) {
            return Err(MonitorError::Config(format!(
                "vitals_features has no column '{unknown}'"
            )));
        }

        let mut columns = vec![quote_ident(FEATURE_KEY_COLUMN)];
        columns.extend(values.iter().map(|(c, _)| quote_ident(c)));
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "INSERT OR REPLACE INTO vitals_features ({}) VALUES ({})",
            columns.join(", "),
            placeholders.join(", ")
        );

        let mut bound: Vec<rusqlite::types::Value> = vec![subject_id.to_string().into()];
        bound.extend(values.iter().map(|(_, v)| match v {
            Some(x) => rusqlite::types::Value::Real(*x),
            None => rusqlite::types::Value::Null,
        }));
        self.conn.execute(&sql, rusqlite::params_from_iter(bound))?;
        Ok(())
    }

    /// Fetch exactly `columns` for one subject. `None` when the subject
    /// has no feature row. Callers pass only columns validated against
    /// `feature_column_names()`.
    pub fn feature_row_for(
        &self,
        subject_id: &str,
        columns: &[String],
    ) -> MonitorResult<Option<FeatureRow>> {
        if columns.is_empty() {
            return Ok(None);
        }
        let projection: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
        let sql = format!(
            "SELECT {} FROM vitals_features WHERE {} = ?1",
            projection.join(", "),
            quote_ident(FEATURE_KEY_COLUMN)
        );
        let row = self
            .conn
            .query_row(&sql, params![subject_id], |row| {
                // Non-numeric cells count as missing.
                Ok((0..columns.len())
                    .map(|i| row.get::<_, Option<f64>>(i).unwrap_or(None))
                    .collect::<FeatureRow>())
            })
            .optional()?;
        Ok(row)
    }

    // ── Weights ─────────────────────────────────────────────────────

    pub fn upsert_weight(&self, feature: &str, weight: f64) -> MonitorResult<()> {
        self.conn.execute(
            "INSERT INTO lr_weights (feature, weight) VALUES (?1, ?2)
             ON CONFLICT(feature) DO UPDATE SET weight = excluded.weight",
            params![feature, weight],
        )?;
        Ok(())
    }

    pub fn upsert_intercept(&self, weight: f64) -> MonitorResult<()> {
        self.upsert_weight(INTERCEPT, weight)
    }

    pub fn weight_rows(&self) -> MonitorResult<Vec<WeightRow>> {
        let mut stmt = self
            .conn
            .prepare("SELECT feature, weight FROM lr_weights ORDER BY feature ASC")?;
        let rows = stmt.query_map([], |row| {
            Ok(WeightRow {
                feature: row.get(0)?,
                weight: row.get(1)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn clear_weights(&self) -> MonitorResult<()> {
        self.conn.execute("DELETE FROM lr_weights", [])?;
        Ok(())
    }
}
