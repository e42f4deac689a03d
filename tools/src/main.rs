//! monitor-runner: headless runner for the ICU monitor core.
//!
//! Usage:
//!   monitor-runner --demo 20 --seed 42 --seconds 30
//!   monitor-runner --db vitals.db --config data/monitor.json --ipc-mode

use anyhow::Result;
use icu_monitor_core::{
    config::MonitorConfig, demo, engine::MonitorEngine, router::Topic, store::MonitorStore,
};
use std::env;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

#[derive(serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum IpcCommand {
    Latest {
        #[serde(default)]
        subject_id: Option<String>,
    },
    Score {
        subject_id: String,
    },
    Alerts,
    Activate {
        subject_id: String,
    },
    Stop {
        subject_id: String,
    },
    Dashboard,
    VitalAlerts,
    Quit,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let seed = parse_arg(&args, "--seed", 42u64);
    let seconds = parse_arg(&args, "--seconds", 30u64);
    let ipc_mode = args.iter().any(|a| a == "--ipc-mode");
    let db = args
        .windows(2)
        .find(|w| w[0] == "--db")
        .map(|w| w[1].as_str())
        .unwrap_or(":memory:");
    // An in-memory database is empty unless seeded.
    let demo_subjects = match args.windows(2).find(|w| w[0] == "--demo") {
        Some(w) => w[1].parse::<usize>().ok(),
        None if db == ":memory:" => Some(20),
        None => None,
    };
    let config = match args.windows(2).find(|w| w[0] == "--config") {
        Some(w) => MonitorConfig::load(&w[1])?,
        None => MonitorConfig::default(),
    };

    if !ipc_mode {
        println!("ICU Monitor: monitor-runner");
        println!("  seed:      {seed}");
        println!("  seconds:   {seconds}");
        println!("  db:        {db}");
        println!("  demo:      {demo_subjects:?}");
        println!();
    }

    let store = if db == ":memory:" {
        MonitorStore::in_memory()?
    } else {
        MonitorStore::open(db)?
    };
    store.migrate()?;
    if let Some(subjects) = demo_subjects {
        demo::seed_if_empty(&store, seed, subjects)?;
    }

    let engine = MonitorEngine::build_sqlite(store, config)?;
    engine.start().await?;

    if ipc_mode {
        run_ipc_loop(&engine).await?;
    } else {
        run_for(&engine, Duration::from_secs(seconds)).await;
        print_summary(&engine).await?;
    }

    engine.shutdown();
    Ok(())
}

async fn run_ipc_loop(engine: &MonitorEngine) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let cmd: IpcCommand = match serde_json::from_str(&line) {
            Ok(c) => c,
            Err(e) => {
                log::warn!("Rejected IPC command: {e}");
                let err_json = serde_json::json!({ "error": e.to_string() });
                stdout.write_all(format!("{err_json}\n").as_bytes()).await?;
                stdout.flush().await?;
                continue;
            }
        };

        let response = match cmd {
            IpcCommand::Quit => break,
            IpcCommand::Latest { subject_id } => {
                serde_json::to_value(engine.latest(subject_id.as_deref()).as_deref())?
            }
            IpcCommand::Score { subject_id } => serde_json::to_value(engine.score(&subject_id).await)?,
            IpcCommand::Alerts => serde_json::to_value(&*engine.get_alerts().await)?,
            IpcCommand::Activate { subject_id } => match engine.activate(&subject_id).await {
                Ok(outcome) => serde_json::json!({ "subject_id": subject_id, "outcome": format!("{outcome:?}") }),
                Err(e) => serde_json::json!({ "subject_id": subject_id, "error": e.to_string() }),
            },
            IpcCommand::Stop { subject_id } => {
                serde_json::json!({ "subject_id": subject_id, "stopped": engine.stop(&subject_id) })
            }
            IpcCommand::Dashboard => serde_json::to_value(engine.dashboard().await)?,
            IpcCommand::VitalAlerts => serde_json::to_value(engine.recent_vital_alerts())?,
        };
        stdout.write_all(format!("{response}\n").as_bytes()).await?;
        stdout.flush().await?;
    }
    Ok(())
}

/// Print every global-topic measurement until `duration` elapses.
async fn run_for(engine: &MonitorEngine, duration: Duration) {
    let mut subscription = engine.subscribe(&Topic::Global);
    let deadline = tokio::time::sleep(duration);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            next = subscription.recv() => match next {
                Some(m) => println!(
                    "  [{}] subject {:<8} {:<18} {:>7.1}",
                    m.observed_at, m.subject_id, m.label, m.value
                ),
                None => break,
            },
        }
    }
}

async fn print_summary(engine: &MonitorEngine) -> Result<()> {
    let alerts = engine.get_alerts().await;
    let dashboard = engine.dashboard().await;

    println!();
    println!("=== Run Summary ===");
    println!("Model phase:      {:?}", engine.scorer.phase());
    if let Some(report) = engine.scorer.last_load_report() {
        println!(
            "Weights:          {} loaded, {} skipped",
            report.loaded, report.skipped
        );
    }
    println!("Active cursors:   {}", engine.simulator.active_cursors().len());
    println!();
    println!("Risk alerts ({}):", alerts.entries.len());
    for entry in &alerts.entries {
        println!(
            "  {:<8} {:.3}  {:?}",
            entry.subject_id, entry.risk_score, entry.level
        );
    }
    println!();
    println!("Vital alerts:");
    for alert in engine.recent_vital_alerts() {
        println!("  {:<8} {} (x{})", alert.subject_id, alert.message(), alert.occurrences);
    }
    println!();
    println!("Top priority:");
    for row in &dashboard.top_priority {
        println!("  {:<8} {:.3}", row.subject_id, row.priority);
    }
    if dashboard.arrivals_timed_out {
        println!("Simulated arrivals: timed out");
    } else {
        println!("Simulated arrivals:");
        for score in &dashboard.simulated_arrivals {
            println!("  {:<8} {:.3}  {:?}", score.subject_id, score.risk_score, score.basis);
        }
    }
    Ok(())
}

fn parse_arg<T: std::str::FromStr>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}
