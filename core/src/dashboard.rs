//! Triage dashboard: the highest stored priorities plus a few "arrivals"
//! scored live.
//!
//! RULE: A dashboard snapshot never fails. Panel errors give empty lists,
//! and an arrivals batch that overruns its budget is dropped whole.

use crate::{
    config::DashboardConfig,
    row_source::RowSource,
    scorer::{RiskScore, RiskScorer},
    store::PriorityRow,
};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use tokio::time::timeout;

#[derive(Debug, Clone, Serialize)]
pub struct DashboardSnapshot {
    pub top_priority:       Vec<PriorityRow>,
    pub simulated_arrivals: Vec<RiskScore>,
    pub arrivals_timed_out: bool,
    /// Set when the priority panel itself could not be read.
    pub degraded:           bool,
    pub generated_at:       DateTime<Utc>,
}

pub struct Dashboard {
    scorer: Arc<RiskScorer>,
    source: Arc<dyn RowSource>,
    config: DashboardConfig,
}

impl Dashboard {
    pub fn new(scorer: Arc<RiskScorer>, source: Arc<dyn RowSource>, config: DashboardConfig) -> Self {
        Self { scorer, source, config }
    }

    pub async fn snapshot(&self) -> DashboardSnapshot {
        let mut snapshot = DashboardSnapshot {
            top_priority: Vec::new(),
            simulated_arrivals: Vec::new(),
            arrivals_timed_out: false,
            degraded: false,
            generated_at: Utc::now(),
        };

        let limit = self.config.panel_query_timeout();
        let panel = match timeout(limit, self.source.priority_panel()).await {
            Ok(Ok(panel)) => panel,
            Ok(Err(e)) => {
                log::error!("Dashboard panel query failed: {e}");
                snapshot.degraded = true;
                return snapshot;
            }
            Err(_) => {
                log::warn!("Dashboard panel query timed out after {limit:?}");
                snapshot.degraded = true;
                return snapshot;
            }
        };

        let mut rows = panel.into_iter();
        snapshot.top_priority = rows.by_ref().take(self.config.top_n).collect();
        let arrivals: Vec<PriorityRow> = rows.take(self.config.arrivals).collect();
        if arrivals.is_empty() {
            return snapshot;
        }

        let budget = self.config.arrival_budget();
        let scoring = join_all(arrivals.iter().map(|row| self.scorer.score(&row.subject_id)));
        match timeout(budget, scoring).await {
            Ok(scores) => snapshot.simulated_arrivals = scores,
            Err(_) => {
                log::warn!(
                    "Scoring {} simulated arrivals exceeded {budget:?}, dropping them",
                    arrivals.len()
                );
                snapshot.arrivals_timed_out = true;
            }
        }
        snapshot
    }
}
