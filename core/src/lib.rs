//! ICU monitor core: vital-stream playback, risk scoring and alerting
//! over a read-only row source.

pub mod alerts;
pub mod clock;
pub mod config;
pub mod dashboard;
pub mod demo;
pub mod engine;
pub mod error;
pub mod rng;
pub mod router;
pub mod row_source;
pub mod scorer;
pub mod simulator;
pub mod store;
pub mod types;
pub mod vital_alerts;
