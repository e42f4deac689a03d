//! Vital stream simulator: cursor playback, registry lifecycle and fan-out.

mod common;

use common::{init_logging, readings, FakeSource, Mode};
use icu_monitor_core::{
    config::{EvictionPolicy, MonitorConfig, PlaybackMode, SimulatorConfig},
    error::MonitorError,
    router::{BroadcastRouter, Topic},
    simulator::{StartOutcome, VitalSimulator},
    types::CursorKey,
};
use std::sync::Arc;
use std::time::Duration;

fn simulator(source: FakeSource, config: SimulatorConfig) -> Arc<VitalSimulator> {
    init_logging();
    Arc::new(VitalSimulator::new(
        Arc::new(source),
        Arc::new(BroadcastRouter::new(64)),
        config,
    ))
}

fn test_config() -> SimulatorConfig {
    MonitorConfig::default_test().simulator
}

/// Three rows, five periods after start: the first tick fires at start,
/// so six rows have been emitted and the latest is the third row.
#[tokio::test(start_paused = true)]
async fn cursor_replays_in_order_and_wraps() {
    let seq = readings("S3", "Heart Rate", &[80.0, 85.0, 90.0]);
    let sim = simulator(FakeSource::new().with_subject("S3", seq.clone()), test_config());

    assert_eq!(sim.activate("S3").await.expect("activate"), StartOutcome::Started);
    tokio::time::sleep(Duration::from_millis(5_010)).await;

    let latest = sim.latest(Some("S3")).expect("latest reading");
    assert_eq!(*latest, seq[2]);
    let cursor = sim.cursor(&CursorKey::Subject("S3".into())).expect("cursor");
    assert_eq!(cursor.emitted(), 6);
}

/// Starting a running key is a no-op and leaves exactly one cursor.
#[tokio::test(start_paused = true)]
async fn start_is_idempotent() {
    let seq = readings("A", "Heart Rate", &[70.0, 71.0]);
    let sim = simulator(FakeSource::new().with_subject("A", seq.clone()), test_config());

    assert_eq!(sim.activate("A").await.expect("first"), StartOutcome::Started);
    assert_eq!(sim.activate("A").await.expect("second"), StartOutcome::AlreadyRunning);
    assert_eq!(sim.start("A", seq).expect("direct"), StartOutcome::AlreadyRunning);
    assert_eq!(sim.active_cursors(), vec![CursorKey::Subject("A".into())]);
}

/// A subject with zero rows is NotFound and never gets a cursor.
#[tokio::test(start_paused = true)]
async fn unknown_subject_is_not_found() {
    let sim = simulator(FakeSource::new(), test_config());

    let err = sim.activate("missing").await.expect_err("no rows");
    assert!(matches!(err, MonitorError::NotFound { ref subject_id } if subject_id == "missing"));
    assert!(sim.active_cursors().is_empty());
    assert!(sim.latest(Some("missing")).is_none());
}

/// An empty preload is a valid result, not an error.
#[tokio::test(start_paused = true)]
async fn empty_preload_is_ok() {
    let sim = simulator(FakeSource::new(), test_config());
    assert!(sim.preload(Some("nobody")).await.expect("preload").is_empty());
    assert!(sim.preload(None).await.expect("panel").is_empty());
}

/// A failing row source surfaces as DataUnavailable.
#[tokio::test(start_paused = true)]
async fn preload_failure_is_data_unavailable() {
    let sim = simulator(FakeSource::new().with_mode(Mode::Fail), test_config());
    let err = sim.preload(Some("A")).await.expect_err("source fails");
    assert!(matches!(err, MonitorError::DataUnavailable { .. }), "got {err:?}");
}

/// A source that never answers is cut off by the preload timeout.
#[tokio::test(start_paused = true)]
async fn hanging_preload_times_out() {
    let config = test_config();
    let sim = simulator(FakeSource::new().with_mode(Mode::Hang), config.clone());

    let started = tokio::time::Instant::now();
    let err = sim.activate("A").await.expect_err("source hangs");
    assert!(matches!(err, MonitorError::DataUnavailable { .. }), "got {err:?}");
    assert!(started.elapsed() <= config.preload_timeout() + Duration::from_millis(50));
    assert!(sim.active_cursors().is_empty());
}

/// Subject subscribers see only their subject; the global cursor also
/// publishes to the global topic.
#[tokio::test(start_paused = true)]
async fn topics_fan_out_independently() {
    let panel = readings("G1", "Heart Rate", &[60.0, 61.0]);
    let source = FakeSource::new()
        .with_panel(panel.clone())
        .with_subject("A", readings("A", "Systolic BP", &[120.0]));
    let sim = simulator(source, test_config());

    let mut global = sim.router().subscribe(&Topic::Global);
    let mut g1 = sim.router().subscribe(&Topic::subject("G1"));
    let mut a = sim.router().subscribe(&Topic::subject("A"));

    sim.start_global().await.expect("global");
    sim.activate("A").await.expect("A");

    assert_eq!(*global.recv().await.expect("global reading"), panel[0]);
    assert_eq!(*g1.recv().await.expect("G1 reading"), panel[0]);
    let from_a = a.recv().await.expect("A reading");
    assert_eq!(from_a.subject_id, "A");
    assert_eq!(from_a.label, "Systolic BP");
}

/// Single-pass cursors keep their last row after finishing.
#[tokio::test(start_paused = true)]
async fn single_pass_cursor_finishes() {
    let seq = readings("A", "Heart Rate", &[70.0, 75.0]);
    let config = SimulatorConfig {
        playback: PlaybackMode::SinglePass,
        ..test_config()
    };
    let sim = simulator(FakeSource::new().with_subject("A", seq.clone()), config);

    sim.activate("A").await.expect("activate");
    tokio::time::sleep(Duration::from_secs(10)).await;

    let cursor = sim.cursor(&CursorKey::Subject("A".into())).expect("cursor");
    assert!(cursor.is_finished());
    assert_eq!(cursor.emitted(), 2);
    assert_eq!(*sim.latest(Some("A")).expect("latest"), seq[1]);
}

/// Stopping removes the cursor; a second stop reports nothing to do.
#[tokio::test(start_paused = true)]
async fn stop_removes_cursor() {
    let sim = simulator(
        FakeSource::new().with_subject("A", readings("A", "Heart Rate", &[70.0])),
        test_config(),
    );
    sim.activate("A").await.expect("activate");
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(sim.stop("A"));
    assert!(!sim.stop("A"));
    assert!(sim.latest(Some("A")).is_none());
}

/// Cursors nobody reads are reaped; recently read ones and the global
/// cursor survive.
#[tokio::test(start_paused = true)]
async fn idle_cursors_are_reaped() {
    let config = SimulatorConfig {
        eviction: EvictionPolicy::IdleTimeout { idle_timeout_secs: 30 },
        ..test_config()
    };
    let source = FakeSource::new()
        .with_panel(readings("G1", "Heart Rate", &[60.0]))
        .with_subject("A", readings("A", "Heart Rate", &[70.0]))
        .with_subject("B", readings("B", "Heart Rate", &[90.0]));
    let sim = simulator(source, config);

    sim.start_global().await.expect("global");
    sim.activate("A").await.expect("A");
    sim.activate("B").await.expect("B");

    tokio::time::sleep(Duration::from_secs(20)).await;
    assert!(sim.latest(Some("A")).is_some());
    tokio::time::sleep(Duration::from_secs(15)).await;

    assert_eq!(sim.reap_idle(), vec![CursorKey::Subject("B".into())]);
    assert!(sim.is_running(&CursorKey::Global));
    assert!(sim.is_running(&CursorKey::Subject("A".into())));
}

/// Under the default policy nothing is ever reaped and no reaper runs.
#[tokio::test(start_paused = true)]
async fn never_policy_keeps_cursors() {
    let sim = simulator(
        FakeSource::new().with_subject("A", readings("A", "Heart Rate", &[70.0])),
        test_config(),
    );
    sim.activate("A").await.expect("A");
    tokio::time::sleep(Duration::from_secs(3_600)).await;

    assert!(sim.reap_idle().is_empty());
    assert!(sim.spawn_reaper().is_none());
    assert!(sim.is_running(&CursorKey::Subject("A".into())));
}

/// Starting a cursor outside a runtime is an error, not a panic.
#[test]
fn start_without_runtime_is_an_error() {
    let seq = readings("A", "Heart Rate", &[70.0]);
    let sim = simulator(FakeSource::new(), test_config());

    let err = sim.start("A", seq).expect_err("no runtime");
    assert!(matches!(err, MonitorError::NoRuntime(_)), "got {err:?}");
    assert!(sim.active_cursors().is_empty());
}
