//! The monitor engine: wires every component around one row source.
//!
//! STARTUP ORDER (fixed):
//!   1. Vital alert watcher subscribes to the global topic.
//!   2. Idle-cursor reaper starts (only under an idle-timeout policy).
//!   3. Global panel cursor starts.
//!
//! RULES:
//!   - Components share one router and one scorer.
//!   - The engine owns background tasks and aborts them on shutdown.
//!   - Nothing here writes to the datastore.

use crate::{
    alerts::{AlertCache, AlertSnapshot},
    config::MonitorConfig,
    dashboard::{Dashboard, DashboardSnapshot},
    demo,
    error::MonitorResult,
    router::{BroadcastRouter, Subscription, Topic},
    row_source::{RowSource, SqliteRowSource},
    scorer::{RiskScore, RiskScorer},
    simulator::{StartOutcome, VitalSimulator},
    store::MonitorStore,
    types::Measurement,
    vital_alerts::{VitalAlert, VitalAlertFeed},
};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

pub struct MonitorEngine {
    pub config:       MonitorConfig,
    pub router:       Arc<BroadcastRouter>,
    pub simulator:    Arc<VitalSimulator>,
    pub scorer:       Arc<RiskScorer>,
    pub alerts:       AlertCache,
    pub vital_alerts: Arc<VitalAlertFeed>,
    pub dashboard:    Dashboard,
    background:       Mutex<Vec<JoinHandle<()>>>,
}

impl MonitorEngine {
    /// Build a fully wired engine over any row source. Nothing runs until
    /// `start()`.
    pub fn build(source: Arc<dyn RowSource>, config: MonitorConfig) -> Self {
        let router = Arc::new(BroadcastRouter::new(config.router.channel_capacity));
        let simulator = Arc::new(VitalSimulator::new(
            Arc::clone(&source),
            Arc::clone(&router),
            config.simulator.clone(),
        ));
        let scorer = Arc::new(RiskScorer::new(Arc::clone(&source), config.scorer.clone()));
        let alerts = AlertCache::new(Arc::clone(&scorer), Arc::clone(&source), config.alerts.clone());
        let vital_alerts = Arc::new(VitalAlertFeed::new(config.vital_alerts.clone()));
        let dashboard = Dashboard::new(Arc::clone(&scorer), source, config.dashboard.clone());

        Self {
            config,
            router,
            simulator,
            scorer,
            alerts,
            vital_alerts,
            dashboard,
            background: Mutex::new(Vec::new()),
        }
    }

    /// Build over a migrated SQLite store.
    pub fn build_sqlite(store: MonitorStore, config: MonitorConfig) -> MonitorResult<Self> {
        store.migrate()?;
        let source: Arc<dyn RowSource> = Arc::new(SqliteRowSource::new(store));
        Ok(Self::build(source, config))
    }

    /// In-memory store seeded with demo data and test timeouts.
    pub fn build_test(seed: u64, subjects: usize) -> MonitorResult<Self> {
        let store = MonitorStore::in_memory()?;
        store.migrate()?;
        demo::seed_demo_data(&store, seed, subjects)?;
        Self::build_sqlite(store, MonitorConfig::default_test())
    }

    /// Start background work. The global cursor failing to load is
    /// returned as an error; watcher and reaper are already running by then.
    pub async fn start(&self) -> MonitorResult<StartOutcome> {
        {
            let mut background = self.background_tasks();
            if background.is_empty() {
                background.push(self.vital_alerts.spawn_watcher(&self.router));
                if let Some(reaper) = self.simulator.spawn_reaper() {
                    background.push(reaper);
                }
            }
        }
        let outcome = self.simulator.start_global().await?;
        log::info!("Monitor engine started ({outcome:?} global cursor)");
        Ok(outcome)
    }

    pub fn latest(&self, subject_id: Option<&str>) -> Option<Arc<Measurement>> {
        self.simulator.latest(subject_id)
    }

    pub async fn activate(&self, subject_id: &str) -> MonitorResult<StartOutcome> {
        self.simulator.activate(subject_id).await
    }

    pub fn stop(&self, subject_id: &str) -> bool {
        self.simulator.stop(subject_id)
    }

    pub fn subscribe(&self, topic: &Topic) -> Subscription {
        self.router.subscribe(topic)
    }

    pub async fn score(&self, subject_id: &str) -> RiskScore {
        self.scorer.score(subject_id).await
    }

    pub async fn get_alerts(&self) -> Arc<AlertSnapshot> {
        self.alerts.get_alerts().await
    }

    pub fn recent_vital_alerts(&self) -> Vec<VitalAlert> {
        self.vital_alerts.recent()
    }

    pub async fn dashboard(&self) -> DashboardSnapshot {
        self.dashboard.snapshot().await
    }

    /// Stop every cursor and background task. Returns the number of
    /// cursors stopped.
    pub fn shutdown(&self) -> usize {
        let stopped = self.simulator.stop_all();
        for task in self.background_tasks().drain(..) {
            task.abort();
        }
        let pruned = self.router.prune();
        log::info!("Monitor engine shut down: {stopped} cursors stopped, {pruned} topics pruned");
        stopped
    }

    fn background_tasks(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        match self.background.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Drop for MonitorEngine {
    fn drop(&mut self) {
        let tasks = match self.background.get_mut() {
            Ok(tasks) => tasks,
            Err(poisoned) => poisoned.into_inner(),
        };
        for task in tasks.drain(..) {
            task.abort();
        }
    }
}
