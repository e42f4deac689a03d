//! Synthetic ICU data so the runner and tests work without an external
//! vitals database.
//!
//! RULE: Same seed, same rows. All randomness comes from `rng::DemoRng`.

use crate::{
    error::MonitorResult,
    rng::{DemoRng, DemoSlot},
    store::MonitorStore,
    types::{Measurement, INTERCEPT},
};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::Serialize;

/// First subject id; subjects are numbered upward from here.
const FIRST_SUBJECT: u64 = 10_001;
const READINGS_PER_SUBJECT: i64 = 12;
const READING_INTERVAL_MINUTES: i64 = 15;

/// Raw-space logistic regression coefficients for the demo model.
const DEMO_WEIGHTS: &[(&str, f64)] = &[
    (INTERCEPT, -9.2),
    ("hr", 0.035),
    ("sbp", -0.012),
    ("resp_rate", 0.09),
    ("temp_c", 0.11),
    ("spo2", -0.02),
    ("lactate", 0.55),
    ("wbc", 0.04),
];

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DemoSummary {
    pub subjects:      usize,
    pub measurements:  usize,
    pub feature_rows:  usize,
    pub weights:       usize,
    pub deteriorating: usize,
}

pub fn demo_subject_id(index: usize) -> String {
    (FIRST_SUBJECT + index as u64).to_string()
}

fn admission_time() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2150, 1, 1)
        .and_then(|d| d.and_hms_opt(8, 0, 0))
        .unwrap_or_default()
}

/// Populate a migrated store with `subjects` synthetic patients.
pub fn seed_demo_data(store: &MonitorStore, seed: u64, subjects: usize) -> MonitorResult<DemoSummary> {
    let mut vitals_rng = DemoRng::new(seed, DemoSlot::Vitals);
    let mut feature_rng = DemoRng::new(seed, DemoSlot::Features);
    let mut weight_rng = DemoRng::new(seed, DemoSlot::Weights);
    let mut priority_rng = DemoRng::new(seed, DemoSlot::Priority);

    let mut summary = DemoSummary {
        subjects,
        ..DemoSummary::default()
    };

    for (feature, weight) in DEMO_WEIGHTS {
        // Small per-seed jitter so different seeds rank differently.
        let jitter = 1.0 + weight_rng.uniform(-0.05, 0.05);
        store.upsert_weight(feature, weight * jitter)?;
        summary.weights += 1;
    }

    let start = admission_time();
    for index in 0..subjects {
        let subject_id = demo_subject_id(index);
        let deteriorating = vitals_rng.chance(0.3);
        if deteriorating {
            summary.deteriorating += 1;
        }

        let mut hr = vitals_rng.normal(82.0, 8.0);
        let mut sbp = vitals_rng.normal(128.0, 12.0);
        let mut resp = vitals_rng.normal(16.0, 2.0);
        let mut spo2 = vitals_rng.normal(97.0, 1.0).min(100.0);

        for step in 0..READINGS_PER_SUBJECT {
            let at = start + Duration::minutes(step * READING_INTERVAL_MINUTES);
            if deteriorating {
                hr += vitals_rng.uniform(1.5, 4.0);
                sbp += vitals_rng.uniform(-1.0, 6.0);
                resp += vitals_rng.uniform(0.2, 0.8);
                spo2 -= vitals_rng.uniform(0.0, 0.6);
            } else {
                hr += vitals_rng.normal(0.0, 1.5);
                sbp += vitals_rng.normal(0.0, 2.0);
                resp += vitals_rng.normal(0.0, 0.4);
                spo2 = (spo2 + vitals_rng.normal(0.0, 0.3)).min(100.0);
            }
            for (label, value) in [
                ("Heart Rate", hr),
                ("Systolic BP", sbp),
                ("Respiratory Rate", resp),
                ("SpO2", spo2),
            ] {
                store.insert_measurement(&Measurement {
                    subject_id: subject_id.clone(),
                    label: label.to_string(),
                    value: (value * 10.0).round() / 10.0,
                    observed_at: at,
                })?;
                summary.measurements += 1;
            }
        }

        // Roughly one subject in ten has no feature row yet.
        if feature_rng.chance(0.1) {
            log::debug!("Demo subject {subject_id} left without features");
        } else {
            let lactate = if deteriorating {
                feature_rng.uniform(2.5, 6.0)
            } else {
                feature_rng.uniform(0.6, 2.0)
            };
            let temp_c = feature_rng.normal(if deteriorating { 38.4 } else { 36.9 }, 0.4);
            let wbc = feature_rng.uniform(4.0, if deteriorating { 22.0 } else { 11.0 });
            let dbp = if feature_rng.chance(0.2) {
                None
            } else {
                Some(feature_rng.normal(72.0, 8.0))
            };
            store.upsert_feature_row(
                &subject_id,
                &[
                    ("hr", Some(hr)),
                    ("sbp", Some(sbp)),
                    ("dbp", dbp),
                    ("resp_rate", Some(resp)),
                    ("temp_c", Some(temp_c)),
                    ("spo2", Some(spo2)),
                    ("lactate", Some(lactate)),
                    ("wbc", Some(wbc)),
                ],
            )?;
            summary.feature_rows += 1;
        }

        let priority = if deteriorating {
            priority_rng.uniform(0.5, 1.0)
        } else {
            priority_rng.uniform(0.0, 0.6)
        };
        store.upsert_priority(&subject_id, priority)?;
    }

    log::info!(
        "Seeded demo data: {} subjects, {} measurements, {} deteriorating",
        summary.subjects,
        summary.measurements,
        summary.deteriorating
    );
    Ok(summary)
}

/// Seed only a store that holds no measurements yet. Returns `None` when
/// the store was left as it was.
pub fn seed_if_empty(
    store: &MonitorStore,
    seed: u64,
    subjects: usize,
) -> MonitorResult<Option<DemoSummary>> {
    let existing = store.measurement_count()?;
    if existing > 0 {
        log::info!("Store already holds {existing} measurements, skipping demo seeding");
        return Ok(None);
    }
    seed_demo_data(store, seed, subjects).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded(seed: u64, subjects: usize) -> (MonitorStore, DemoSummary) {
        let store = MonitorStore::in_memory().expect("in-memory store");
        store.migrate().expect("migrate");
        let summary = seed_demo_data(&store, seed, subjects).expect("seed demo data");
        (store, summary)
    }

    #[test]
    fn seeding_fills_every_table() {
        let (store, summary) = seeded(42, 10);
        assert_eq!(summary.subjects, 10);
        assert_eq!(summary.measurements, 10 * 12 * 4);
        assert_eq!(
            store.measurement_count().expect("count"),
            summary.measurements as i64
        );
        assert_eq!(store.weight_rows().expect("weights").len(), DEMO_WEIGHTS.len());
        assert_eq!(store.priority_panel().expect("panel").len(), 10);
    }

    #[test]
    fn same_seed_reproduces_rows() {
        let (a, _) = seeded(7, 4);
        let (b, _) = seeded(7, 4);
        let subject = demo_subject_id(2);
        assert_eq!(
            a.measurements_for(&subject).expect("a"),
            b.measurements_for(&subject).expect("b")
        );
    }

    #[test]
    fn readings_come_back_in_time_order() {
        let (store, _) = seeded(3, 2);
        let readings = store.measurements_for(&demo_subject_id(0)).expect("readings");
        assert!(readings.windows(2).all(|w| w[0].observed_at <= w[1].observed_at));
    }

    #[test]
    fn seeding_twice_leaves_existing_rows_alone() {
        let (store, first) = seeded(42, 3);
        assert!(seed_if_empty(&store, 42, 3).expect("second seed").is_none());
        assert_eq!(
            store.measurement_count().expect("count"),
            first.measurements as i64
        );
        assert_eq!(store.measurements_for(&demo_subject_id(0)).expect("rows").len(), 12 * 4);
    }

    #[test]
    fn empty_store_is_seeded() {
        let store = MonitorStore::in_memory().expect("in-memory store");
        store.migrate().expect("migrate");
        let summary = seed_if_empty(&store, 1, 2).expect("seed").expect("seeded");
        assert_eq!(summary.subjects, 2);
    }
}
