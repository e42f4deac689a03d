//! The narrow query contract the core consumes from the datastore.
//!
//! RULE: Components never hold a database handle. Everything they read
//! arrives through RowSource, and nothing in the core writes through it.

use crate::{
    error::{MonitorError, MonitorResult},
    store::{FeatureRow, MonitorStore, PriorityRow, WeightRow},
    types::{Measurement, SubjectId},
};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

#[async_trait]
pub trait RowSource: Send + Sync {
    /// One subject's readings, ascending by observation time.
    async fn measurements_for(&self, subject_id: &str) -> MonitorResult<Vec<Measurement>>;

    /// The fixed playback panel replayed by the global cursor.
    async fn panel_measurements(&self, panel_size: usize) -> MonitorResult<Vec<Measurement>>;

    /// Schema introspection: queryable columns of the feature table.
    async fn feature_column_names(&self) -> MonitorResult<Vec<String>>;

    async fn weight_rows(&self) -> MonitorResult<Vec<WeightRow>>;

    /// Exactly `columns` for one subject, or `None` without a feature row.
    async fn feature_row_for(
        &self,
        subject_id: &str,
        columns: &[String],
    ) -> MonitorResult<Option<FeatureRow>>;

    /// Subjects ordered by stored priority, highest first.
    async fn priority_panel(&self) -> MonitorResult<Vec<PriorityRow>>;
}

/// RowSource backed by the SQLite store. Every query runs on the
/// blocking pool so timer tasks are never stalled by disk I/O.
#[derive(Clone)]
pub struct SqliteRowSource {
    store: Arc<Mutex<MonitorStore>>,
}

impl SqliteRowSource {
    pub fn new(store: MonitorStore) -> Self {
        Self {
            store: Arc::new(Mutex::new(store)),
        }
    }

    /// Run a closure against the store on the blocking pool.
    pub async fn with_store<T, F>(&self, f: F) -> MonitorResult<T>
    where
        F: FnOnce(&MonitorStore) -> MonitorResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || {
            let guard = store
                .lock()
                .map_err(|_| MonitorError::unavailable("sqlite", "store mutex poisoned"))?;
            f(&*guard)
        })
        .await?
    }
}

#[async_trait]
impl RowSource for SqliteRowSource {
    async fn measurements_for(&self, subject_id: &str) -> MonitorResult<Vec<Measurement>> {
        let subject_id: SubjectId = subject_id.to_string();
        self.with_store(move |s| s.measurements_for(&subject_id)).await
    }

    async fn panel_measurements(&self, panel_size: usize) -> MonitorResult<Vec<Measurement>> {
        self.with_store(move |s| s.panel_measurements(panel_size)).await
    }

    async fn feature_column_names(&self) -> MonitorResult<Vec<String>> {
        self.with_store(|s| s.feature_column_names()).await
    }

    async fn weight_rows(&self) -> MonitorResult<Vec<WeightRow>> {
        self.with_store(|s| s.weight_rows()).await
    }

    async fn feature_row_for(
        &self,
        subject_id: &str,
        columns: &[String],
    ) -> MonitorResult<Option<FeatureRow>> {
        let subject_id: SubjectId = subject_id.to_string();
        let columns = columns.to_vec();
        self.with_store(move |s| s.feature_row_for(&subject_id, &columns))
            .await
    }

    async fn priority_panel(&self) -> MonitorResult<Vec<PriorityRow>> {
        self.with_store(|s| s.priority_panel()).await
    }
}
