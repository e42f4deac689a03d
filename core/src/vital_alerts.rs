//! Vital threshold alerts: flags individual readings that cross a fixed
//! clinical threshold as they are emitted.
//!
//! RULES:
//!   - The feed holds at most `capacity` alerts, newest first.
//!   - One entry per (subject, kind). A repeat updates that entry in place
//!     and moves it to the front instead of adding a second one.

use crate::{
    config::VitalAlertConfig,
    router::{BroadcastRouter, Topic},
    types::{Measurement, SubjectId},
};
use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    HighHeartRate,
    HighBloodPressure,
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HighHeartRate => f.write_str("High Heart Rate"),
            Self::HighBloodPressure => f.write_str("High Blood Pressure"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VitalAlert {
    pub alert_id:    Uuid,
    pub subject_id:  SubjectId,
    pub kind:        AlertKind,
    pub value:       f64,
    pub observed_at: NaiveDateTime,
    /// How many readings have triggered this (subject, kind) pair.
    pub occurrences: u32,
}

impl VitalAlert {
    pub fn message(&self) -> String {
        format!("ALERT: {} = {}", self.kind, self.value)
    }
}

pub struct VitalAlertFeed {
    config: VitalAlertConfig,
    recent: Mutex<VecDeque<VitalAlert>>,
}

impl VitalAlertFeed {
    pub fn new(config: VitalAlertConfig) -> Self {
        let capacity = config.capacity;
        Self {
            config,
            recent: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Which threshold, if any, this reading crosses. Both bounds are strict.
    pub fn classify(&self, m: &Measurement) -> Option<AlertKind> {
        if m.label == self.config.heart_rate_label && m.value > self.config.heart_rate_high {
            Some(AlertKind::HighHeartRate)
        } else if m.label == self.config.systolic_bp_label && m.value > self.config.systolic_bp_high {
            Some(AlertKind::HighBloodPressure)
        } else {
            None
        }
    }

    /// Record a reading. Returns the alert it raised or refreshed.
    pub fn observe(&self, m: &Measurement) -> Option<VitalAlert> {
        let kind = self.classify(m)?;
        if self.config.capacity == 0 {
            return None;
        }
        let mut recent = self.lock();

        let existing = recent
            .iter()
            .position(|a| a.subject_id == m.subject_id && a.kind == kind)
            .and_then(|i| recent.remove(i));
        let alert = match existing {
            Some(mut alert) => {
                alert.value = m.value;
                alert.observed_at = m.observed_at;
                alert.occurrences += 1;
                alert
            }
            None => VitalAlert {
                alert_id: Uuid::new_v4(),
                subject_id: m.subject_id.clone(),
                kind,
                value: m.value,
                observed_at: m.observed_at,
                occurrences: 1,
            },
        };

        log::info!("{} for subject {}", alert.message(), alert.subject_id);
        recent.push_front(alert.clone());
        recent.truncate(self.config.capacity);
        Some(alert)
    }

    /// Current alerts, newest first.
    pub fn recent(&self) -> Vec<VitalAlert> {
        self.lock().iter().cloned().collect()
    }

    /// Feed every measurement published on the global topic into `observe`.
    /// The task ends when the topic closes.
    pub fn spawn_watcher(self: &Arc<Self>, router: &BroadcastRouter) -> JoinHandle<()> {
        let mut subscription = router.subscribe(&Topic::Global);
        let feed = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(m) = subscription.recv().await {
                feed.observe(&m);
            }
            log::debug!("Vital alert watcher stopped");
        })
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<VitalAlert>> {
        match self.recent.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
