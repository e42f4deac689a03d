//! Alert cache: memoizes the top-K highest-risk subjects for a fixed
//! time window so request bursts do not rescore the whole panel.
//!
//! RULES:
//!   - A snapshot is built completely, then swapped in whole.
//!   - Refreshes are not mutually exclusive. Two callers that both find the
//!     snapshot stale both rescore; the last one to finish wins.
//!   - A failed panel query never clears the cache: the stale snapshot is
//!     returned and its timestamp is left alone so the next call retries.

use crate::{
    config::AlertConfig,
    row_source::RowSource,
    scorer::{RiskScore, RiskScorer},
    types::SubjectId,
};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::time::{timeout, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertEntry {
    pub subject_id: SubjectId,
    pub risk_score: f64,
    pub level: RiskLevel,
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AlertSnapshot {
    pub entries: Vec<AlertEntry>,
    pub last_refreshed: Option<DateTime<Utc>>,
    #[serde(skip)]
    refreshed_at: Option<Instant>,
}

impl AlertSnapshot {
    pub fn age(&self) -> Option<std::time::Duration> {
        self.refreshed_at.map(|t| t.elapsed())
    }

    pub fn is_fresh(&self, ttl: std::time::Duration) -> bool {
        self.age().is_some_and(|age| age < ttl)
    }
}

pub struct AlertCache {
    scorer:    Arc<RiskScorer>,
    source:    Arc<dyn RowSource>,
    config:    AlertConfig,
    snapshot:  RwLock<Arc<AlertSnapshot>>,
    refreshes: AtomicU64,
}

impl AlertCache {
    pub fn new(scorer: Arc<RiskScorer>, source: Arc<dyn RowSource>, config: AlertConfig) -> Self {
        Self {
            scorer,
            source,
            config,
            snapshot: RwLock::new(Arc::new(AlertSnapshot::default())),
            refreshes: AtomicU64::new(0),
        }
    }

    /// Completed full-panel rescores since creation.
    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::Relaxed)
    }

    /// The snapshot as it stands, without checking its age.
    pub fn current(&self) -> Arc<AlertSnapshot> {
        match self.snapshot.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Top-risk subjects, recomputed only when the snapshot is older than
    /// the TTL. Within the TTL the very same snapshot is returned.
    pub async fn get_alerts(&self) -> Arc<AlertSnapshot> {
        let current = self.current();
        if current.is_fresh(self.config.ttl()) {
            log::debug!("Using cached risk alerts");
            return current;
        }
        self.refresh().await.unwrap_or(current)
    }

    /// Rescore the whole panel and swap in a new snapshot.
    /// Returns `None` if the panel could not be read.
    pub async fn refresh(&self) -> Option<Arc<AlertSnapshot>> {
        log::debug!("Calculating fresh risk alerts...");
        let limit = self.config.panel_query_timeout();
        let panel = match timeout(limit, self.source.priority_panel()).await {
            Ok(Ok(panel)) => panel,
            Ok(Err(e)) => {
                log::error!("Error fetching priority panel: {e}");
                return None;
            }
            Err(_) => {
                log::warn!("Priority panel query timed out after {limit:?}");
                return None;
            }
        };

        let scores = join_all(panel.iter().map(|row| self.scorer.score(&row.subject_id))).await;
        let snapshot = Arc::new(self.rank(scores));

        match self.snapshot.write() {
            Ok(mut guard) => *guard = Arc::clone(&snapshot),
            Err(poisoned) => *poisoned.into_inner() = Arc::clone(&snapshot),
        }
        self.refreshes.fetch_add(1, Ordering::Relaxed);
        log::info!(
            "Risk alerts refreshed: {} of {} subjects above {:.2}",
            snapshot.entries.len(),
            panel.len(),
            self.config.medium_risk_threshold
        );
        Some(snapshot)
    }

    fn rank(&self, scores: Vec<RiskScore>) -> AlertSnapshot {
        let now = Utc::now();
        let mut entries: Vec<AlertEntry> = scores
            .into_iter()
            .filter(|s| self.config.include_neutral_scores || !s.is_neutral())
            .filter(|s| s.risk_score >= self.config.medium_risk_threshold)
            .map(|s| AlertEntry {
                level: if s.risk_score >= self.config.high_risk_threshold {
                    RiskLevel::High
                } else {
                    RiskLevel::Medium
                },
                subject_id: s.subject_id,
                risk_score: s.risk_score,
                computed_at: now,
            })
            .collect();

        // Stable sort: equal scores keep stored-priority order.
        entries.sort_by(|a, b| b.risk_score.total_cmp(&a.risk_score));
        entries.truncate(self.config.top_k);

        AlertSnapshot {
            entries,
            last_refreshed: Some(now),
            refreshed_at: Some(Instant::now()),
        }
    }
}
