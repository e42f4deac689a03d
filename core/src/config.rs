use crate::clock::{PlaybackClock, SimSpeed};
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ── Simulator ──────────────────────────────────────────────────────

/// What a cursor does after emitting the last row of its sequence.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackMode {
    #[default]
    Cycle,
    SinglePass,
}

/// When the cursor registry drops cursors on its own.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPolicy {
    #[default]
    Never,
    IdleTimeout { idle_timeout_secs: u64 },
}

impl EvictionPolicy {
    pub fn idle_timeout(&self) -> Option<Duration> {
        match self {
            Self::Never => None,
            Self::IdleTimeout { idle_timeout_secs } => Some(Duration::from_secs(*idle_timeout_secs)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    pub tick_period_ms: u64,
    pub speed: SimSpeed,
    /// Number of distinct subjects replayed by the global cursor.
    pub panel_size: usize,
    pub playback: PlaybackMode,
    pub eviction: EvictionPolicy,
    pub reap_interval_secs: u64,
    pub preload_timeout_ms: u64,
}

impl SimulatorConfig {
    pub fn clock(&self) -> PlaybackClock {
        PlaybackClock::new(Duration::from_millis(self.tick_period_ms)).with_speed(self.speed)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs.max(1))
    }

    pub fn preload_timeout(&self) -> Duration {
        Duration::from_millis(self.preload_timeout_ms)
    }
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            tick_period_ms: 1_000,
            speed: SimSpeed::Normal,
            panel_size: 3,
            playback: PlaybackMode::Cycle,
            eviction: EvictionPolicy::Never,
            reap_interval_secs: 60,
            preload_timeout_ms: 10_000,
        }
    }
}

// ── Risk scoring ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScorerConfig {
    /// Bound on each of the two weight-load sub-queries.
    pub load_query_timeout_ms: u64,
    /// Bound on the per-subject feature fetch.
    pub feature_query_timeout_ms: u64,
    pub neutral_score: f64,
}

impl ScorerConfig {
    pub fn load_query_timeout(&self) -> Duration {
        Duration::from_millis(self.load_query_timeout_ms)
    }

    pub fn feature_query_timeout(&self) -> Duration {
        Duration::from_millis(self.feature_query_timeout_ms)
    }

    /// Worst-case wall time of one `score()` call: a full weight load
    /// (two bounded sub-queries) followed by the bounded feature fetch.
    pub fn score_budget(&self) -> Duration {
        self.load_query_timeout() * 2 + self.feature_query_timeout()
    }
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            load_query_timeout_ms: 10_000,
            feature_query_timeout_ms: 5_000,
            neutral_score: crate::types::NEUTRAL_SCORE,
        }
    }
}

// ── Alert cache ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    pub ttl_secs: u64,
    pub medium_risk_threshold: f64,
    pub high_risk_threshold: f64,
    pub top_k: usize,
    pub panel_query_timeout_ms: u64,
    /// Rank neutral fallback scores alongside model scores.
    pub include_neutral_scores: bool,
}

impl AlertConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn panel_query_timeout(&self) -> Duration {
        Duration::from_millis(self.panel_query_timeout_ms)
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 20,
            medium_risk_threshold: 0.4,
            high_risk_threshold: 0.6,
            top_k: 5,
            panel_query_timeout_ms: 5_000,
            include_neutral_scores: false,
        }
    }
}

// ── Vital threshold alerts ─────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VitalAlertConfig {
    pub heart_rate_label: String,
    pub heart_rate_high: f64,
    pub systolic_bp_label: String,
    pub systolic_bp_high: f64,
    pub capacity: usize,
}

impl Default for VitalAlertConfig {
    fn default() -> Self {
        Self {
            heart_rate_label: "Heart Rate".into(),
            heart_rate_high: 100.0,
            systolic_bp_label: "Systolic BP".into(),
            systolic_bp_high: 180.0,
            capacity: 5,
        }
    }
}

// ── Dashboard ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    pub top_n: usize,
    pub arrivals: usize,
    pub arrival_budget_ms: u64,
    pub panel_query_timeout_ms: u64,
}

impl DashboardConfig {
    pub fn arrival_budget(&self) -> Duration {
        Duration::from_millis(self.arrival_budget_ms)
    }

    pub fn panel_query_timeout(&self) -> Duration {
        Duration::from_millis(self.panel_query_timeout_ms)
    }
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            top_n: 5,
            arrivals: 3,
            arrival_budget_ms: 8_000,
            panel_query_timeout_ms: 5_000,
        }
    }
}

// ── Broadcast router ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Per-topic buffer; slower subscribers skip ahead when it overflows.
    pub channel_capacity: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self { channel_capacity: 256 }
    }
}

// ── Top level ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub simulator: SimulatorConfig,
    pub scorer: ScorerConfig,
    pub alerts: AlertConfig,
    pub vital_alerts: VitalAlertConfig,
    pub dashboard: DashboardConfig,
    pub router: RouterConfig,
}

impl MonitorConfig {
    /// Load from a JSON file. Missing sections fall back to defaults.
    /// In tests, use MonitorConfig::default_test().
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: MonitorConfig = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Cannot parse {path}: {e}"))?;
        config.validate()?;
        Ok(config)
    }

    /// Short timeouts and tick periods so tests run on paused or real
    /// time without long waits.
    pub fn default_test() -> Self {
        Self {
            simulator: SimulatorConfig {
                tick_period_ms: 1_000,
                preload_timeout_ms: 1_000,
                ..SimulatorConfig::default()
            },
            scorer: ScorerConfig {
                load_query_timeout_ms: 1_000,
                feature_query_timeout_ms: 500,
                ..ScorerConfig::default()
            },
            alerts: AlertConfig {
                panel_query_timeout_ms: 500,
                ..AlertConfig::default()
            },
            dashboard: DashboardConfig {
                arrival_budget_ms: 2_000,
                panel_query_timeout_ms: 500,
                ..DashboardConfig::default()
            },
            ..Self::default()
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.simulator.tick_period_ms == 0 {
            anyhow::bail!("simulator.tick_period_ms must be > 0");
        }
        if self.simulator.panel_size == 0 {
            anyhow::bail!("simulator.panel_size must be > 0");
        }
        if !(0.0..=1.0).contains(&self.alerts.medium_risk_threshold) {
            anyhow::bail!(
                "alerts.medium_risk_threshold must be within [0, 1], got {}",
                self.alerts.medium_risk_threshold
            );
        }
        if self.router.channel_capacity == 0 {
            anyhow::bail!("router.channel_capacity must be > 0");
        }
        Ok(())
    }
}
