//! Playback clock: owns the tick period and speed control.
//!
//! Every cursor task derives its interval from the same clock, so all
//! cursors advance on a shared fixed period.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PlaybackClock {
    pub base_period: Duration,
    pub speed:       SimSpeed,
}

impl PlaybackClock {
    pub fn new(base_period: Duration) -> Self {
        Self {
            base_period,
            speed: SimSpeed::Normal,
        }
    }

    pub fn with_speed(mut self, speed: SimSpeed) -> Self {
        self.speed = speed;
        self
    }

    pub fn ticks_per_period(&self) -> u32 {
        match self.speed {
            SimSpeed::Normal      => 1,
            SimSpeed::Accelerated => 7,
            SimSpeed::FastForward => 30,
        }
    }

    /// The wall-clock time between two emissions of one cursor.
    /// Never zero; tokio intervals reject a zero period.
    pub fn tick_period(&self) -> Duration {
        let period = self.base_period / self.ticks_per_period();
        period.max(Duration::from_millis(1))
    }
}

impl Default for PlaybackClock {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SimSpeed {
    #[default]
    Normal,       // 1 measurement per base period
    Accelerated,  // 7 measurements per base period
    FastForward,  // 30 measurements per base period
}
