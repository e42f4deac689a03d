//! Shared fixtures: an in-memory RowSource whose failure modes can be
//! switched per query.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, NaiveDate, NaiveDateTime};
use icu_monitor_core::{
    error::{MonitorError, MonitorResult},
    row_source::RowSource,
    store::{FeatureRow, PriorityRow, WeightRow},
    types::Measurement,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// How every query on the fake behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Normal,
    Fail,
    /// Never resolves.
    Hang,
}

#[derive(Default)]
pub struct FakeSource {
    pub mode:          Mode,
    pub measurements:  HashMap<String, Vec<Measurement>>,
    pub panel:         Vec<Measurement>,
    pub columns:       Vec<String>,
    pub weights:       Vec<WeightRow>,
    pub features:      HashMap<String, HashMap<String, f64>>,
    pub priority:      Vec<PriorityRow>,
    /// Hang only the per-subject feature query.
    pub hang_features: bool,
    /// Fail only the priority panel query; switchable mid-test.
    pub fail_panel:    AtomicBool,
    pub weight_delay:  Option<Duration>,
    /// Per-call delays for the priority panel query, consumed in call order.
    pub panel_delays:  Mutex<VecDeque<Duration>>,
    pub weight_calls:  AtomicUsize,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_subject(mut self, subject_id: &str, rows: Vec<Measurement>) -> Self {
        self.measurements.insert(subject_id.to_string(), rows);
        self
    }

    pub fn with_panel(mut self, rows: Vec<Measurement>) -> Self {
        self.panel = rows;
        self
    }

    pub fn with_columns(mut self, columns: &[&str]) -> Self {
        self.columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn with_weight(mut self, feature: &str, weight: f64) -> Self {
        self.weights.push(WeightRow {
            feature: feature.to_string(),
            weight,
        });
        self
    }

    pub fn with_features(mut self, subject_id: &str, values: &[(&str, f64)]) -> Self {
        self.features.insert(
            subject_id.to_string(),
            values.iter().map(|(c, v)| (c.to_string(), *v)).collect(),
        );
        self
    }

    pub fn with_panel_delays(self, delays: &[Duration]) -> Self {
        self.panel_delays
            .lock()
            .expect("panel delays")
            .extend(delays.iter().copied());
        self
    }

    pub fn with_priority(mut self, subject_id: &str, priority: f64) -> Self {
        self.priority.push(PriorityRow {
            subject_id: subject_id.to_string(),
            priority,
        });
        self
    }

    async fn gate(&self, query: &str) -> MonitorResult<()> {
        match self.mode {
            Mode::Normal => Ok(()),
            Mode::Fail => Err(MonitorError::unavailable("fake", format!("{query} failed"))),
            Mode::Hang => std::future::pending().await,
        }
    }
}

#[async_trait]
impl RowSource for FakeSource {
    async fn measurements_for(&self, subject_id: &str) -> MonitorResult<Vec<Measurement>> {
        self.gate("measurements").await?;
        Ok(self.measurements.get(subject_id).cloned().unwrap_or_default())
    }

    async fn panel_measurements(&self, _panel_size: usize) -> MonitorResult<Vec<Measurement>> {
        self.gate("panel measurements").await?;
        Ok(self.panel.clone())
    }

    async fn feature_column_names(&self) -> MonitorResult<Vec<String>> {
        self.gate("feature columns").await?;
        Ok(self.columns.clone())
    }

    async fn weight_rows(&self) -> MonitorResult<Vec<WeightRow>> {
        self.weight_calls.fetch_add(1, Ordering::SeqCst);
        self.gate("weights").await?;
        if let Some(delay) = self.weight_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.weights.clone())
    }

    async fn feature_row_for(
        &self,
        subject_id: &str,
        columns: &[String],
    ) -> MonitorResult<Option<FeatureRow>> {
        self.gate("features").await?;
        if self.hang_features {
            std::future::pending::<()>().await;
        }
        Ok(self
            .features
            .get(subject_id)
            .map(|values| columns.iter().map(|c| values.get(c).copied()).collect()))
    }

    async fn priority_panel(&self) -> MonitorResult<Vec<PriorityRow>> {
        self.gate("priority panel").await?;
        let delay = self.panel_delays.lock().expect("panel delays").pop_front();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_panel.load(Ordering::SeqCst) {
            return Err(MonitorError::unavailable("fake", "priority panel failed"));
        }
        Ok(self.priority.clone())
    }
}

pub fn base_time() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2150, 1, 1)
        .and_then(|d| d.and_hms_opt(8, 0, 0))
        .expect("valid timestamp")
}

/// `values.len()` readings of one label, one minute apart.
pub fn readings(subject_id: &str, label: &str, values: &[f64]) -> Vec<Measurement> {
    values
        .iter()
        .enumerate()
        .map(|(i, v)| Measurement {
            subject_id: subject_id.to_string(),
            label: label.to_string(),
            value: *v,
            observed_at: base_time() + ChronoDuration::minutes(i as i64),
        })
        .collect()
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
