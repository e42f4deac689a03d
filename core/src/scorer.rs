//! Risk score engine: a logistic model over per-subject features whose
//! coefficients are loaded lazily from the row source.
//!
//! Coefficient loading is a three-state machine:
//!   Unloaded -> Loading -> { Loaded, LoadedWithDefault }
//!
//! RULES:
//!   - At most one load is in flight. Callers that queue behind a load
//!     receive that load's report instead of starting another.
//!   - The table is swapped in whole; readers hold an Arc to a complete
//!     table and never see a partial load.
//!   - Feature names are checked against the feature schema once, at load.
//!     Scoring queries exactly the table's columns and nothing else.
//!   - Neither `load_weights` nor `score` returns an error. Every failure
//!     becomes a neutral score (or a default table) with a note.

use crate::{
    config::ScorerConfig,
    row_source::RowSource,
    store::WeightRow,
    types::{SubjectId, INTERCEPT},
};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::time::timeout;

/// Standard logistic function, evaluated without overflow for large |z|.
pub fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

// ── Coefficient table ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoefficientTable {
    intercept: f64,
    /// Ordered (feature, weight) pairs; the order fixes the projection.
    features: Vec<(String, f64)>,
}

impl CoefficientTable {
    pub fn new(intercept: f64, features: Vec<(String, f64)>) -> Self {
        Self { intercept, features }
    }

    /// The table used before any load and after a load that found nothing.
    pub fn default_only() -> Self {
        Self::new(0.0, Vec::new())
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }

    pub fn features(&self) -> &[(String, f64)] {
        &self.features
    }

    pub fn has_features(&self) -> bool {
        !self.features.is_empty()
    }

    pub fn weight(&self, feature: &str) -> Option<f64> {
        if feature == INTERCEPT {
            return Some(self.intercept);
        }
        self.features.iter().find(|(f, _)| f == feature).map(|(_, w)| *w)
    }

    pub fn columns(&self) -> Vec<String> {
        self.features.iter().map(|(f, _)| f.clone()).collect()
    }

    /// `intercept + Σ weight_f · value_f`, with missing values as 0.
    /// `values` is aligned with `columns()`.
    pub fn linear_predictor(&self, values: &[Option<f64>]) -> f64 {
        self.features
            .iter()
            .enumerate()
            .fold(self.intercept, |z, (i, (_, weight))| {
                let value = values
                    .get(i)
                    .copied()
                    .flatten()
                    .filter(|v| v.is_finite())
                    .unwrap_or(0.0);
                z + weight * value
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadPhase {
    Unloaded,
    Loading,
    Loaded,
    LoadedWithDefault,
}

/// What one weight load found.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LoadReport {
    /// Weight rows kept, intercept included.
    pub loaded: usize,
    pub skipped: usize,
    pub skipped_features: Vec<String>,
    pub intercept_loaded: bool,
    pub feature_count: usize,
    /// Set when the schema sub-query failed or timed out.
    pub schema_error: Option<String>,
    /// Set when the weight sub-query failed or timed out.
    pub weights_error: Option<String>,
}

impl LoadReport {
    pub fn has_features(&self) -> bool {
        self.feature_count > 0
    }
}

// ── Scores ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradedReason {
    NoWeights,
    Timeout,
    SourceError,
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "basis", content = "reason", rename_all = "snake_case")]
pub enum ScoreBasis {
    Model,
    Neutral(DegradedReason),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskScore {
    pub subject_id: SubjectId,
    pub risk_score: f64,
    pub basis: ScoreBasis,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl RiskScore {
    fn model(subject_id: &str, risk_score: f64) -> Self {
        Self {
            subject_id: subject_id.to_string(),
            risk_score,
            basis: ScoreBasis::Model,
            note: None,
        }
    }

    fn neutral(subject_id: &str, score: f64, reason: DegradedReason, note: String) -> Self {
        Self {
            subject_id: subject_id.to_string(),
            risk_score: score,
            basis: ScoreBasis::Neutral(reason),
            note: Some(note),
        }
    }

    pub fn is_neutral(&self) -> bool {
        matches!(self.basis, ScoreBasis::Neutral(_))
    }

    pub fn degraded_reason(&self) -> Option<&DegradedReason> {
        match &self.basis {
            ScoreBasis::Model => None,
            ScoreBasis::Neutral(reason) => Some(reason),
        }
    }
}

// ── Engine ─────────────────────────────────────────────────────────

struct EngineState {
    phase:       LoadPhase,
    table:       Arc<CoefficientTable>,
    generation:  u64,
    last_report: Option<LoadReport>,
}

pub struct RiskScorer {
    source:    Arc<dyn RowSource>,
    config:    ScorerConfig,
    state:     RwLock<EngineState>,
    load_gate: tokio::sync::Mutex<()>,
}

impl RiskScorer {
    pub fn new(source: Arc<dyn RowSource>, config: ScorerConfig) -> Self {
        Self {
            source,
            config,
            state: RwLock::new(EngineState {
                phase: LoadPhase::Unloaded,
                table: Arc::new(CoefficientTable::default_only()),
                generation: 0,
                last_report: None,
            }),
            load_gate: tokio::sync::Mutex::new(()),
        }
    }

    pub fn config(&self) -> &ScorerConfig {
        &self.config
    }

    pub fn phase(&self) -> LoadPhase {
        self.read_state().phase
    }

    /// The current complete table. During a reload this is the previous one.
    pub fn table(&self) -> Arc<CoefficientTable> {
        Arc::clone(&self.read_state().table)
    }

    pub fn last_load_report(&self) -> Option<LoadReport> {
        self.read_state().last_report.clone()
    }

    /// Number of completed loads.
    pub fn generation(&self) -> u64 {
        self.read_state().generation
    }

    /// Load (or reload) the coefficient table. Returns whether at least
    /// one real feature weight is now in the table.
    pub async fn load_weights(&self) -> bool {
        self.reload().await.has_features()
    }

    /// Like `load_weights`, but returns the full report.
    pub async fn reload(&self) -> LoadReport {
        let seen = self.generation();
        self.load_after(seen).await
    }

    /// Run a load unless one has completed since generation `seen`, in
    /// which case that load's report is returned.
    async fn load_after(&self, seen: u64) -> LoadReport {
        let _gate = self.load_gate.lock().await;

        {
            let state = self.read_state();
            if state.generation != seen {
                if let Some(report) = &state.last_report {
                    return report.clone();
                }
            }
        }

        let mut phase_guard = PhaseGuard::enter(self);
        log::info!("Loading risk model weights...");
        let (table, report) = self.fetch_table().await;
        let phase = if table.has_features() {
            LoadPhase::Loaded
        } else {
            log::warn!("No usable feature weights loaded, scoring will use the neutral score");
            LoadPhase::LoadedWithDefault
        };

        {
            let mut state = self.write_state();
            state.table = Arc::new(table);
            state.phase = phase;
            state.generation += 1;
            state.last_report = Some(report.clone());
        }
        phase_guard.commit();

        log::info!(
            "Loaded {} valid weights (skipped {})",
            report.loaded,
            report.skipped
        );
        report
    }

    async fn fetch_table(&self) -> (CoefficientTable, LoadReport) {
        let limit = self.config.load_query_timeout();
        let mut report = LoadReport::default();

        let columns = match timeout(limit, self.source.feature_column_names()).await {
            Ok(Ok(columns)) => columns,
            Ok(Err(e)) => {
                log::error!("Error fetching feature columns: {e}");
                report.schema_error = Some(e.to_string());
                Vec::new()
            }
            Err(_) => {
                log::warn!("Fetching feature columns timed out after {limit:?}");
                report.schema_error = Some(format!("timed out after {limit:?}"));
                Vec::new()
            }
        };

        let rows: Vec<WeightRow> = match timeout(limit, self.source.weight_rows()).await {
            Ok(Ok(rows)) => rows,
            Ok(Err(e)) => {
                log::error!("Error fetching weights: {e}");
                report.weights_error = Some(e.to_string());
                Vec::new()
            }
            Err(_) => {
                log::warn!("Fetching weights timed out after {limit:?}");
                report.weights_error = Some(format!("timed out after {limit:?}"));
                Vec::new()
            }
        };

        let valid: HashSet<&str> = columns.iter().map(String::as_str).collect();
        let mut intercept = None;
        let mut features: Vec<(String, f64)> = Vec::new();

        for row in rows {
            if !row.weight.is_finite() {
                log::warn!("Skipping non-finite weight for feature: {}", row.feature);
                report.skipped += 1;
                report.skipped_features.push(row.feature);
            } else if row.feature == INTERCEPT {
                intercept = Some(row.weight);
                report.loaded += 1;
            } else if valid.contains(row.feature.as_str()) {
                match features.iter_mut().find(|(f, _)| *f == row.feature) {
                    Some(existing) => existing.1 = row.weight,
                    None => {
                        features.push((row.feature, row.weight));
                        report.loaded += 1;
                    }
                }
            } else {
                log::warn!("Skipping unknown feature: {}", row.feature);
                report.skipped += 1;
                report.skipped_features.push(row.feature);
            }
        }

        report.intercept_loaded = intercept.is_some();
        report.feature_count = features.len();
        (CoefficientTable::new(intercept.unwrap_or(0.0), features), report)
    }

    /// Score one subject. Always returns within `ScorerConfig::score_budget`.
    ///
    /// The wait for weights, time queued behind another caller's load
    /// included, is capped at two load timeouts.
    pub async fn score(&self, subject_id: &str) -> RiskScore {
        let neutral = self.config.neutral_score;

        let (mut table, seen) = self.usable_table();
        if table.is_none() {
            let limit = self.config.load_query_timeout() * 2;
            match timeout(limit, self.load_after(seen)).await {
                Ok(_) => table = self.usable_table().0,
                Err(_) => log::warn!("Waiting for risk model weights timed out after {limit:?}"),
            }
        }
        let Some(table) = table else {
            log::warn!("No feature weights loaded, returning default risk score for {subject_id}");
            return RiskScore::neutral(
                subject_id,
                neutral,
                DegradedReason::NoWeights,
                "Using default score: no feature weights loaded".into(),
            );
        };

        let limit = self.config.feature_query_timeout();
        let columns = table.columns();
        match timeout(limit, self.source.feature_row_for(subject_id, &columns)).await {
            Ok(Ok(Some(values))) => {
                let z = table.linear_predictor(&values);
                let risk_score = sigmoid(z);
                log::debug!("Computed risk score for subject {subject_id}: {risk_score:.4} (z = {z:.4})");
                RiskScore::model(subject_id, risk_score)
            }
            Ok(Ok(None)) => {
                log::warn!("No feature data found for subject {subject_id}");
                RiskScore::neutral(
                    subject_id,
                    neutral,
                    DegradedReason::NotFound,
                    "Subject not found".into(),
                )
            }
            Ok(Err(e)) => {
                log::error!("Feature query failed for subject {subject_id}: {e}");
                RiskScore::neutral(
                    subject_id,
                    neutral,
                    DegradedReason::SourceError,
                    format!("Feature source error: {e}"),
                )
            }
            Err(_) => {
                log::warn!("Feature query for subject {subject_id} timed out after {limit:?}");
                RiskScore::neutral(
                    subject_id,
                    neutral,
                    DegradedReason::Timeout,
                    format!("Feature query timed out after {limit:?}"),
                )
            }
        }
    }

    /// The table if it can score, read together with the generation it
    /// belongs to.
    fn usable_table(&self) -> (Option<Arc<CoefficientTable>>, u64) {
        let state = self.read_state();
        let table = match state.phase {
            LoadPhase::Unloaded => None,
            _ if state.table.has_features() => Some(Arc::clone(&state.table)),
            _ => None,
        };
        (table, state.generation)
    }

    fn read_state(&self) -> RwLockReadGuard<'_, EngineState> {
        match self.state.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, EngineState> {
        match self.state.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Marks the engine `Loading` for the life of one load. If the load is
/// abandoned before commit, the previous phase is restored.
struct PhaseGuard<'a> {
    scorer:    &'a RiskScorer,
    previous:  LoadPhase,
    committed: bool,
}

impl<'a> PhaseGuard<'a> {
    fn enter(scorer: &'a RiskScorer) -> Self {
        let mut state = scorer.write_state();
        let previous = state.phase;
        state.phase = LoadPhase::Loading;
        Self {
            scorer,
            previous,
            committed: false,
        }
    }

    fn commit(&mut self) {
        self.committed = true;
    }
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.scorer.write_state().phase = self.previous;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sigmoid_matches_logistic_definition() {
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-12);
        assert!((sigmoid(1.4) - 0.802_183_888_6).abs() < 1e-9);
        assert!((sigmoid(-1.4) - (1.0 - sigmoid(1.4))).abs() < 1e-12);
    }

    #[test]
    fn sigmoid_stays_finite_for_large_inputs() {
        assert_eq!(sigmoid(1_000.0), 1.0);
        assert_eq!(sigmoid(-1_000.0), 0.0);
        assert!(!sigmoid(-745.0).is_nan());
    }

    #[test]
    fn missing_values_count_as_zero() {
        let table = CoefficientTable::new(
            -1.0,
            vec![("hr".into(), 0.02), ("lactate".into(), 0.5)],
        );
        assert!((table.linear_predictor(&[Some(120.0), None]) - 1.4).abs() < 1e-12);
        assert!((table.linear_predictor(&[Some(120.0)]) - 1.4).abs() < 1e-12);
        assert_eq!(table.linear_predictor(&[]), -1.0);
    }

    #[test]
    fn weight_lookup_includes_intercept() {
        let table = CoefficientTable::new(-2.0, vec![("hr".into(), 0.1)]);
        assert_eq!(table.weight(INTERCEPT), Some(-2.0));
        assert_eq!(table.weight("hr"), Some(0.1));
        assert_eq!(table.weight("sbp"), None);
        assert_eq!(table.columns(), vec!["hr".to_string()]);
    }
}
