//! Vital stream simulator: replays stored measurement sequences as if
//! they were arriving live.
//!
//! RULES:
//!   - At most one cursor per key; `start` on a running key is a no-op.
//!   - Each cursor is advanced by exactly one timer task, so no cursor is
//!     ever ticked concurrently with itself.
//!   - Request code only reads `latest()`; it never moves a cursor.
//!   - Emission order within a cursor is source order. In cycle mode the
//!     cursor wraps to 0 only after the last row has been emitted.

use crate::{
    config::{PlaybackMode, SimulatorConfig},
    error::{MonitorError, MonitorResult},
    router::{BroadcastRouter, Topic},
    row_source::RowSource,
    types::{CursorKey, Measurement},
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, Instant, MissedTickBehavior};

// ── Cursor ─────────────────────────────────────────────────────────

/// Position pointer into one key's measurement sequence.
pub struct PlaybackCursor {
    key:      CursorKey,
    sequence: Vec<Arc<Measurement>>,
    mode:     PlaybackMode,
    /// Always within `[0, sequence.len()]`.
    position: Mutex<usize>,
    latest:   RwLock<Option<Arc<Measurement>>>,
    emitted:  AtomicU64,
}

impl PlaybackCursor {
    pub fn new(key: CursorKey, sequence: Vec<Measurement>, mode: PlaybackMode) -> Self {
        Self {
            key,
            sequence: sequence.into_iter().map(Arc::new).collect(),
            mode,
            position: Mutex::new(0),
            latest: RwLock::new(None),
            emitted: AtomicU64::new(0),
        }
    }

    pub fn key(&self) -> &CursorKey {
        &self.key
    }

    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }

    pub fn position(&self) -> usize {
        *lock(&self.position)
    }

    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    /// The most recently emitted measurement. Readers racing a tick see
    /// either the previous or the new reference, never a mix.
    pub fn latest(&self) -> Option<Arc<Measurement>> {
        match self.latest.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.mode == PlaybackMode::SinglePass && self.position() >= self.len()
    }

    /// One tick: emit the row at the current position and move on.
    /// Returns `None` once a single-pass cursor is exhausted.
    pub fn advance(&self) -> Option<Arc<Measurement>> {
        let mut position = lock(&self.position);
        if *position >= self.sequence.len() {
            return None;
        }

        let measurement = Arc::clone(&self.sequence[*position]);
        *position += 1;
        if *position == self.sequence.len() && self.mode == PlaybackMode::Cycle {
            *position = 0;
        }

        match self.latest.write() {
            Ok(mut guard) => *guard = Some(Arc::clone(&measurement)),
            Err(poisoned) => *poisoned.into_inner() = Some(Arc::clone(&measurement)),
        }
        self.emitted.fetch_add(1, Ordering::Relaxed);
        Some(measurement)
    }
}

// ── Registry ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
}

struct CursorEntry {
    cursor:    Arc<PlaybackCursor>,
    task:      JoinHandle<()>,
    last_read: Instant,
}

pub struct VitalSimulator {
    source:  Arc<dyn RowSource>,
    router:  Arc<BroadcastRouter>,
    config:  SimulatorConfig,
    cursors: Mutex<HashMap<CursorKey, CursorEntry>>,
}

impl VitalSimulator {
    pub fn new(
        source: Arc<dyn RowSource>,
        router: Arc<BroadcastRouter>,
        config: SimulatorConfig,
    ) -> Self {
        Self {
            source,
            router,
            config,
            cursors: Mutex::new(HashMap::new()),
        }
    }

    pub fn router(&self) -> &Arc<BroadcastRouter> {
        &self.router
    }

    /// Fetch the ordered sequence for one subject, or the fixed panel when
    /// `subject_id` is `None`. Zero rows is `Ok(vec![])`, not an error.
    pub async fn preload(&self, subject_id: Option<&str>) -> MonitorResult<Vec<Measurement>> {
        let key = CursorKey::from_subject(subject_id);
        let query = async {
            match subject_id {
                Some(id) => self.source.measurements_for(id).await,
                None => self.source.panel_measurements(self.config.panel_size).await,
            }
        };

        match timeout(self.config.preload_timeout(), query).await {
            Ok(Ok(rows)) => {
                log::debug!("Preloaded {} measurements for {key}", rows.len());
                Ok(rows)
            }
            Ok(Err(e)) => {
                log::warn!("Preload failed for {key}: {e}");
                Err(MonitorError::unavailable("vitals", e))
            }
            Err(_) => {
                log::warn!(
                    "Preload for {key} timed out after {:?}",
                    self.config.preload_timeout()
                );
                Err(MonitorError::unavailable(
                    "vitals",
                    format!("timed out after {:?}", self.config.preload_timeout()),
                ))
            }
        }
    }

    /// Register a cursor for `subject_id`. Outside a tokio runtime this
    /// fails with `NoRuntime`.
    pub fn start(&self, subject_id: &str, sequence: Vec<Measurement>) -> MonitorResult<StartOutcome> {
        self.start_cursor(CursorKey::Subject(subject_id.to_string()), sequence)
    }

    /// Start the global panel cursor unless it is already running.
    pub async fn start_global(&self) -> MonitorResult<StartOutcome> {
        if self.is_running(&CursorKey::Global) {
            return Ok(StartOutcome::AlreadyRunning);
        }
        let sequence = self.preload(None).await?;
        self.start_cursor(CursorKey::Global, sequence)
    }

    /// On-demand activation: preload and start one subject.
    /// A subject without rows is reported as `NotFound` and gets no cursor.
    pub async fn activate(&self, subject_id: &str) -> MonitorResult<StartOutcome> {
        if self.is_running(&CursorKey::Subject(subject_id.to_string())) {
            return Ok(StartOutcome::AlreadyRunning);
        }
        let sequence = self.preload(Some(subject_id)).await?;
        self.start(subject_id, sequence)
    }

    fn start_cursor(&self, key: CursorKey, sequence: Vec<Measurement>) -> MonitorResult<StartOutcome> {
        let mut cursors = self.registry();
        if cursors.contains_key(&key) {
            return Ok(StartOutcome::AlreadyRunning);
        }
        if sequence.is_empty() {
            return Err(MonitorError::NotFound {
                subject_id: match &key {
                    CursorKey::Global => "global".to_string(),
                    CursorKey::Subject(id) => id.clone(),
                },
            });
        }

        let runtime = Handle::try_current()?;
        let cursor = Arc::new(PlaybackCursor::new(key.clone(), sequence, self.config.playback));
        let task = runtime.spawn(run_cursor(
            Arc::clone(&cursor),
            Arc::clone(&self.router),
            self.config.clock().tick_period(),
        ));
        log::info!("Started cursor for {key} ({} measurements)", cursor.len());
        cursors.insert(
            key,
            CursorEntry {
                cursor,
                task,
                last_read: Instant::now(),
            },
        );
        Ok(StartOutcome::Started)
    }

    /// Most recently emitted measurement for a subject, or for the global
    /// cursor when `subject_id` is `None`.
    pub fn latest(&self, subject_id: Option<&str>) -> Option<Arc<Measurement>> {
        let key = CursorKey::from_subject(subject_id);
        let mut cursors = self.registry();
        let entry = cursors.get_mut(&key)?;
        entry.last_read = Instant::now();
        entry.cursor.latest()
    }

    pub fn is_running(&self, key: &CursorKey) -> bool {
        self.registry().contains_key(key)
    }

    pub fn cursor(&self, key: &CursorKey) -> Option<Arc<PlaybackCursor>> {
        self.registry().get(key).map(|e| Arc::clone(&e.cursor))
    }

    pub fn active_cursors(&self) -> Vec<CursorKey> {
        self.registry().keys().cloned().collect()
    }

    /// Stop and forget one subject's cursor. Returns false if none was running.
    pub fn stop(&self, subject_id: &str) -> bool {
        self.stop_key(&CursorKey::Subject(subject_id.to_string()))
    }

    pub fn stop_global(&self) -> bool {
        self.stop_key(&CursorKey::Global)
    }

    pub fn stop_all(&self) -> usize {
        let drained: Vec<_> = self.registry().drain().collect();
        for (key, entry) in &drained {
            entry.task.abort();
            log::info!("Stopped cursor for {key}");
        }
        drained.len()
    }

    fn stop_key(&self, key: &CursorKey) -> bool {
        match self.registry().remove(key) {
            Some(entry) => {
                entry.task.abort();
                log::info!("Stopped cursor for {key}");
                true
            }
            None => false,
        }
    }

    /// Evict subject cursors nobody has read within the idle timeout.
    /// The global cursor is never reaped. No-op under `EvictionPolicy::Never`.
    pub fn reap_idle(&self) -> Vec<CursorKey> {
        let Some(idle_timeout) = self.config.eviction.idle_timeout() else {
            return Vec::new();
        };

        let mut cursors = self.registry();
        let idle: Vec<CursorKey> = cursors
            .iter()
            .filter(|(key, entry)| {
                **key != CursorKey::Global && entry.last_read.elapsed() >= idle_timeout
            })
            .map(|(key, _)| key.clone())
            .collect();

        for key in &idle {
            if let Some(entry) = cursors.remove(key) {
                entry.task.abort();
                log::info!("Reaped idle cursor for {key}");
            }
        }
        idle
    }

    /// Periodically reap idle cursors. Returns `None` under
    /// `EvictionPolicy::Never`. The task ends once the simulator is dropped.
    pub fn spawn_reaper(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        self.config.eviction.idle_timeout()?;
        let weak: Weak<Self> = Arc::downgrade(self);
        let period = self.config.reap_interval();
        Some(tokio::spawn(async move {
            let mut timer = interval(period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                timer.tick().await;
                let Some(simulator) = weak.upgrade() else { break };
                let reaped = simulator.reap_idle();
                if !reaped.is_empty() {
                    log::debug!("Reaper evicted {} cursors", reaped.len());
                }
            }
        }))
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<CursorKey, CursorEntry>> {
        lock(&self.cursors)
    }
}

impl Drop for VitalSimulator {
    fn drop(&mut self) {
        let cursors = match self.cursors.get_mut() {
            Ok(c) => c,
            Err(poisoned) => poisoned.into_inner(),
        };
        for entry in cursors.values() {
            entry.task.abort();
        }
    }
}

/// The per-cursor scheduler task. Never blocks on I/O: it only reads the
/// in-memory sequence and publishes to the router.
async fn run_cursor(cursor: Arc<PlaybackCursor>, router: Arc<BroadcastRouter>, period: Duration) {
    let mut timer = interval(period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        timer.tick().await;
        match cursor.advance() {
            Some(measurement) => publish(&cursor, &router, measurement),
            None => {
                log::info!("Cursor for {} finished its single pass", cursor.key());
                break;
            }
        }
    }
}

fn publish(cursor: &PlaybackCursor, router: &BroadcastRouter, measurement: Arc<Measurement>) {
    let subject_topic = Topic::subject(measurement.subject_id.clone());
    router.publish(&subject_topic, Arc::clone(&measurement));
    if *cursor.key() == CursorKey::Global {
        router.publish(&Topic::Global, measurement);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
