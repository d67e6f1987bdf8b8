//! # Tide Watch Application Entry Point
//!
//! This binary wires the tide watch library to the outside world. It supports
//! three modes:
//!
//! - **Live** (default): reads newline-delimited JSON updates on stdin and
//!   writes report `{path, value}` pairs as JSON lines on stdout
//! - **Replay** (`--replay <file>`): replays a depth log and prints the
//!   resulting tide status
//! - **Simulate** (`--simulate [days]`): runs a synthetic tide through the
//!   analyzer and prints every report
//!
//! Logs go to stderr; set `RUST_LOG` to change the level.

// Test modules
#[cfg(test)]
mod tests;

use anyhow::{bail, Context};
use chrono::Utc;
use std::env;
use std::io::{self, Write};
use std::path::Path;
use std::time::Duration;
use tide_watch_lib::analyzer::TideAnalyzer;
use tide_watch_lib::config::{Config, SourcesConfig};
use tide_watch_lib::location::LocationRegistry;
use tide_watch_lib::report::{phase_report_values, PathValue};
use tide_watch_lib::ring_log::DepthLog;
use tide_watch_lib::simulate::SyntheticTide;
use tide_watch_lib::source::{route, Input, SourceUpdate};
use tide_watch_lib::watch::{TideWatch, WatchError, HEARTBEAT_SECS};
use tide_watch_lib::Position;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_SIMULATION_DAYS: u32 = 4;

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Write pairs as JSON lines on stdout.
fn publish(values: &[PathValue]) -> anyhow::Result<()> {
    if values.is_empty() {
        return Ok(());
    }
    let mut out = io::stdout().lock();
    for value in values {
        serde_json::to_writer(&mut out, value)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}

/// Publish the outcome of a pipeline step; pipeline errors are not fatal.
fn publish_result(result: Result<Vec<PathValue>, WatchError>) -> anyhow::Result<()> {
    match result {
        Ok(values) => publish(&values),
        Err(error) => {
            warn!(%error, "Tide watch step failed");
            Ok(())
        }
    }
}

/// Forward routed stdin updates until stdin closes or the receiver goes away.
async fn read_updates(sources: SourcesConfig, tx: mpsc::Sender<Input>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match SourceUpdate::parse(&line) {
                    Ok(update) => {
                        if let Some(input) = route(&update, &sources) {
                            if tx.send(input).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(error) => debug!(%error, "Skipping malformed update"),
                }
            }
            Ok(None) => return,
            Err(error) => {
                warn!(%error, "Failed to read updates");
                return;
            }
        }
    }
}

async fn run_live(config: Config) -> anyhow::Result<()> {
    let registry = LocationRegistry::new(
        config.locations_path(),
        config.recording.max_location_distance,
    );
    let record_every = Duration::from_secs(u64::from(config.sample_interval()) * 60);
    let sources = config.sources.clone();
    let mut watch = TideWatch::new(config, registry, now_ms());

    let (tx, mut rx) = mpsc::channel(256);
    tokio::spawn(read_updates(sources, tx));

    let mut heartbeat = interval(Duration::from_secs(HEARTBEAT_SECS));
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut record = interval_at(Instant::now() + record_every, record_every);
    record.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut last_status = None;
    loop {
        tokio::select! {
            input = rx.recv() => match input {
                Some(input) => publish_result(watch.handle_input(input, now_ms()))?,
                None => {
                    info!("Update stream closed, shutting down");
                    break;
                }
            },
            _ = heartbeat.tick() => {
                let now = now_ms();
                publish_result(watch.heartbeat(now))?;
                let status = watch.status(now);
                if last_status != Some(status) {
                    info!(%status, "Status");
                    last_status = Some(status);
                }
            }
            _ = record.tick() => publish(&watch.record_tick(now_ms()))?,
        }
    }

    watch.stop_recording(now_ms());
    Ok(())
}

/// Replay a depth log and print the resulting status as JSON.
fn run_replay(config: &Config, path: &Path) -> anyhow::Result<()> {
    if !path.exists() {
        bail!("depth log {} not found", path.display());
    }
    let mut log = DepthLog::open(path, config.log_capacity())
        .with_context(|| format!("opening depth log {}", path.display()))?;

    let mut analyzer = TideAnalyzer::new(config.sample_interval());
    let replayed = log.for_each(|sample| {
        analyzer.include_data(&sample, false);
    })?;
    log.close()?;
    info!(replayed, path = %path.display(), "Replayed depth log");

    let status = analyzer.tide_status(now_ms());
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

/// Feed a synthetic tide through the analyzer, printing reports as they happen.
fn run_simulation(config: &Config, days: u32) -> anyhow::Result<()> {
    let minutes = config.sample_interval();
    let end = now_ms();
    let start = end - i64::from(days) * 24 * 3_600_000;
    let tide = SyntheticTide::new(4.0, 1.2, start);
    let position = Position::new(41.5, -70.6);

    let mut analyzer = TideAnalyzer::new(minutes);
    let mut reports = 0;
    for sample in tide.samples(start, end, minutes, position) {
        if let Some(report) = analyzer.include_data(&sample, true) {
            reports += 1;
            let height = analyzer.estimate_tide_height_now(report.timer);
            publish(&phase_report_values(&report, height, sample.timer))?;
        }
    }
    info!(days, reports, "Simulation finished");
    Ok(())
}

/// Main application entry point.
fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let config = Config::load();
    let args: Vec<String> = env::args().skip(1).collect();

    match args.first().map(String::as_str) {
        Some("--replay") => {
            let Some(path) = args.get(1) else {
                bail!("usage: tide-watch --replay <file>");
            };
            run_replay(&config, Path::new(path))
        }
        Some("--simulate") => {
            let days = match args.get(1) {
                Some(days) => days
                    .parse()
                    .with_context(|| format!("invalid day count {days:?}"))?,
                None => DEFAULT_SIMULATION_DAYS,
            };
            run_simulation(&config, days)
        }
        Some(other) => bail!("unknown argument {other:?}"),
        None => {
            // Single-threaded: one owned TideWatch, driven from one loop.
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            runtime.block_on(run_live(config))
        }
    }
}
