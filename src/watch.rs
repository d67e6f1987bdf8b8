//! # Tide Watch Pipeline
//!
//! Glue between the inbound updates, the depth log and the analyzer. The
//! binary owns one [`TideWatch`] and drives it from three event sources:
//!
//! - every inbound update, through [`TideWatch::handle_input`]
//! - a heartbeat every [`HEARTBEAT_SECS`] seconds, through [`TideWatch::heartbeat`]
//! - a record tick every sample interval, through [`TideWatch::record_tick`]
//!
//! Recording runs while the engine is off. Stopping the engine (15 s without
//! RPM) starts a recording session at the current anchorage; starting it
//! again ends the session.

use crate::analyzer::{TideAnalyzer, TideStatus};
use crate::config::Config;
use crate::location::{Anchorage, LocationError, LocationResolver};
use crate::report::{height_values, phase_report_values, PathValue};
use crate::ring_log::{self, DepthLog, LogError};
use crate::source::Input;
use crate::{PhaseReport, Position, Sample, TidePhase};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use thiserror::Error;
use tracing::{debug, info, warn};

const HOUR_MS: i64 = 3_600_000;
const DAY_MS: i64 = 24 * HOUR_MS;

/// Seconds between heartbeats
pub const HEARTBEAT_SECS: u64 = 15;
/// Engine is considered stopped after this long without RPM
pub const ENGINE_IDLE_MS: i64 = 15_000;
/// No data timeouts are reported before this long after startup
pub const STARTUP_GRACE_MS: i64 = 30_000;
/// Older log records are not replayed
pub const REPLAY_MAX_AGE_MS: i64 = 31 * DAY_MS;
/// Known extremes older than this are forgotten after replay
pub const KNOWN_EXTREME_MAX_AGE_MS: i64 = 4 * DAY_MS;
/// A replayed report younger than this is announced again
pub const REANNOUNCE_WINDOW_MS: i64 = 7 * HOUR_MS;

/// Errors raised by the recording pipeline.
#[derive(Error, Debug)]
pub enum WatchError {
    #[error(transparent)]
    Location(#[from] LocationError),

    #[error(transparent)]
    Log(#[from] LogError),

    /// Only the anchorage being recorded can be edited
    #[error("anchorage {0} is not the current capture location")]
    NotCapturing(u32),
}

/// Sliding mean over the most recent depth readings.
#[derive(Clone, Debug)]
pub struct MovingAverage {
    window: VecDeque<f64>,
    size: usize,
}

impl MovingAverage {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            window: VecDeque::with_capacity(size),
            size,
        }
    }

    /// Add a reading and return the new mean.
    pub fn push(&mut self, value: f64) -> f64 {
        if self.window.len() == self.size {
            self.window.pop_front();
        }
        self.window.push_back(value);
        self.mean()
    }

    /// Mean of the current window, rounded to millimetres.
    pub fn value(&self) -> Option<f64> {
        (!self.window.is_empty()).then(|| self.mean())
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    fn mean(&self) -> f64 {
        let sum: f64 = self.window.iter().sum();
        (sum / self.window.len() as f64 * 1000.0).round() / 1000.0
    }
}

/// Engine state change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineEdge {
    On,
    Off,
}

/// Turns the RPM stream into on/off edges.
///
/// Starts "on" with no activity, so the first heartbeat reports the engine
/// off unless RPM has arrived in the meantime.
#[derive(Clone, Debug)]
pub struct EngineMonitor {
    running: bool,
    last_activity: i64,
}

impl Default for EngineMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineMonitor {
    pub fn new() -> Self {
        Self {
            running: true,
            last_activity: 0,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn rpm(&mut self, rpm: f64, now: i64) -> Option<EngineEdge> {
        if rpm <= 0.0 {
            return None;
        }
        self.last_activity = now;
        if self.running {
            return None;
        }
        self.running = true;
        Some(EngineEdge::On)
    }

    pub fn heartbeat(&mut self, now: i64) -> Option<EngineEdge> {
        if self.running && now - self.last_activity > ENGINE_IDLE_MS {
            self.running = false;
            return Some(EngineEdge::Off);
        }
        None
    }
}

/// One-line state of the watcher.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WatchStatus {
    Starting,
    NoDepthData,
    NoPositionData,
    /// Recording, direction not known yet
    WatchingDepth,
    Tracking(TidePhase),
    EngineOn,
    Stopped,
}

impl fmt::Display for WatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatchStatus::Starting => f.write_str("Starting"),
            WatchStatus::NoDepthData => f.write_str("No depth data"),
            WatchStatus::NoPositionData => f.write_str("No position data"),
            WatchStatus::WatchingDepth => f.write_str("Watching depth"),
            WatchStatus::Tracking(phase) => write!(f, "Tracking: {phase} tide"),
            WatchStatus::EngineOn => f.write_str("Engine on"),
            WatchStatus::Stopped => f.write_str("Stopped"),
        }
    }
}

/// Analyzer status plus the recording session.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchSnapshot {
    #[serde(flatten)]
    pub tide: TideStatus,
    pub recording: bool,
    pub recording_start: Option<i64>,
    pub recording_stop: Option<i64>,
    pub capture_anchorage: Option<Anchorage>,
}

/// The whole recording pipeline for one vessel.
pub struct TideWatch<R: LocationResolver> {
    config: Config,
    resolver: R,
    analyzer: TideAnalyzer,
    average: MovingAverage,
    engine: EngineMonitor,

    position: Option<Position>,
    last_depth_update: Option<i64>,
    last_position_update: Option<i64>,
    started_at: i64,

    recording: bool,
    start_pending: bool,
    recording_start: Option<i64>,
    recording_stop: Option<i64>,
    capture: Option<Anchorage>,
}

impl<R: LocationResolver> TideWatch<R> {
    pub fn new(config: Config, resolver: R, now: i64) -> Self {
        let analyzer = TideAnalyzer::new(config.sample_interval());
        let average = MovingAverage::new(config.recording.depth_samples_in_average);
        Self {
            config,
            resolver,
            analyzer,
            average,
            engine: EngineMonitor::new(),
            position: None,
            last_depth_update: None,
            last_position_update: None,
            started_at: now,
            recording: false,
            start_pending: false,
            recording_start: None,
            recording_stop: None,
            capture: None,
        }
    }

    pub fn analyzer(&self) -> &TideAnalyzer {
        &self.analyzer
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn capture(&self) -> Option<&Anchorage> {
        self.capture.as_ref()
    }

    pub fn average_depth(&self) -> Option<f64> {
        self.average.value()
    }

    /// Apply one inbound update. Returns pairs to publish, if any.
    pub fn handle_input(&mut self, input: Input, now: i64) -> Result<Vec<PathValue>, WatchError> {
        match input {
            Input::Depth(depth) => {
                self.average.push(depth);
                self.last_depth_update = Some(now);
            }
            Input::Position(position) => {
                self.position = Some(position);
                self.last_position_update = Some(now);
                if self.start_pending {
                    return self.start_recording(position, now);
                }
            }
            Input::EngineRpm(rpm) => {
                if self.engine.rpm(rpm, now) == Some(EngineEdge::On) {
                    info!("Engine started");
                    self.stop_recording(now);
                }
            }
        }
        Ok(Vec::new())
    }

    /// Periodic check of the engine state.
    pub fn heartbeat(&mut self, now: i64) -> Result<Vec<PathValue>, WatchError> {
        if self.engine.heartbeat(now) == Some(EngineEdge::Off) {
            info!("Engine stopped");
            return self.request_start(now);
        }
        Ok(Vec::new())
    }

    /// Record one averaged sample and analyze it.
    ///
    /// Does nothing unless recording with both a depth and a position. Log
    /// write failures are logged and the sample is still analyzed.
    pub fn record_tick(&mut self, now: i64) -> Vec<PathValue> {
        if !self.recording {
            return Vec::new();
        }
        let (Some(depth), Some(position), Some(anchorage)) =
            (self.average.value(), self.position, self.capture.as_ref())
        else {
            debug!("No depth or position yet, skipping sample");
            return Vec::new();
        };

        let sample = Sample {
            timer: now,
            depth: depth as f32,
            position,
        };

        let path = self.config.log_path(anchorage.id);
        if let Err(error) = ring_log::append_to(&path, self.config.log_capacity(), &sample) {
            warn!(path = %path.display(), %error, "Failed to record depth sample");
        }

        let mut values = Vec::new();
        if let Some(report) = self.analyzer.include_data(&sample, true) {
            values.extend(self.report_values(&report, now));
        }
        if let Some(report) = self.analyzer.last_phase_report() {
            let phase = self.analyzer.phase().unwrap_or(report.phase);
            values.extend(height_values(
                phase,
                self.analyzer.estimate_tide_height_now(now),
            ));
        }
        values
    }

    fn request_start(&mut self, now: i64) -> Result<Vec<PathValue>, WatchError> {
        match self.position {
            Some(position) => self.start_recording(position, now),
            None => {
                debug!("No position yet, recording starts when one arrives");
                self.start_pending = true;
                Ok(Vec::new())
            }
        }
    }

    /// Begin a recording session at `position`.
    ///
    /// The anchorage's depth log is replayed into a fresh analyzer first, so
    /// known extremes from earlier visits carry over. A recent enough report
    /// is announced again; otherwise phase tracking starts over.
    pub fn start_recording(
        &mut self,
        position: Position,
        now: i64,
    ) -> Result<Vec<PathValue>, WatchError> {
        self.start_pending = false;
        let anchorage = self.resolver.resolve(&position)?;
        info!(id = anchorage.id, name = %anchorage.name, "Recording depth");

        self.analyzer.start();
        let replayed = self.replay(anchorage.id, now);
        debug!(replayed, "Replayed depth log");
        self.analyzer.expire_known_before(now - KNOWN_EXTREME_MAX_AGE_MS);

        let mut values = Vec::new();
        match self.analyzer.last_phase_report().cloned() {
            Some(report) if now - report.timer < REANNOUNCE_WINDOW_MS => {
                info!(phase = %report.phase, "Resuming from last tide report");
                values = self.report_values(&report, now);
            }
            _ => self.analyzer.reset_phase_tracking(),
        }

        self.recording = true;
        self.recording_start = Some(now);
        self.capture = Some(anchorage);
        Ok(values)
    }

    /// End the recording session, if any.
    pub fn stop_recording(&mut self, now: i64) {
        self.start_pending = false;
        if self.recording {
            info!("Stopped recording depth");
            self.recording = false;
            self.recording_stop = Some(now);
        }
    }

    fn replay(&mut self, anchorage_id: u32, now: i64) -> usize {
        let path = self.config.log_path(anchorage_id);
        let cutoff = now - REPLAY_MAX_AGE_MS;

        if !path.exists() {
            debug!(path = %path.display(), "No depth log yet, nothing to replay");
            return 0;
        }
        let mut log = match DepthLog::open(&path, self.config.log_capacity()) {
            Ok(log) => log,
            Err(error) => {
                warn!(path = %path.display(), %error, "Cannot open depth log, starting without history");
                return 0;
            }
        };

        let analyzer = &mut self.analyzer;
        let mut replayed = 0;
        let result = log.for_each(|sample| {
            if sample.timer >= cutoff {
                analyzer.include_data(&sample, false);
                replayed += 1;
            }
        });
        if let Err(error) = result {
            warn!(path = %path.display(), %error, "Depth log replay interrupted");
        }
        if let Err(error) = log.close() {
            warn!(path = %path.display(), %error, "Failed to close depth log");
        }
        replayed
    }

    fn report_values(&self, report: &PhaseReport, now: i64) -> Vec<PathValue> {
        let height = self.analyzer.estimate_tide_height_now(report.timer);
        phase_report_values(report, height, now)
    }

    /// Rename (or otherwise edit) the anchorage being recorded.
    pub fn update_location(&mut self, anchorage: Anchorage) -> Result<(), WatchError> {
        match &self.capture {
            Some(current) if current.id == anchorage.id => {
                self.resolver.update(&anchorage)?;
                self.capture = Some(anchorage);
                Ok(())
            }
            _ => Err(WatchError::NotCapturing(anchorage.id)),
        }
    }

    /// Current state for the status line.
    pub fn status(&self, now: i64) -> WatchStatus {
        let warmed_up = now - self.started_at >= STARTUP_GRACE_MS;
        if warmed_up {
            let sources = &self.config.sources;
            if is_stale(self.last_depth_update, sources.depth_data_timeout, now) {
                return WatchStatus::NoDepthData;
            }
            if is_stale(self.last_position_update, sources.pos_data_timeout, now) {
                return WatchStatus::NoPositionData;
            }
        }

        if self.recording {
            match self.analyzer.phase() {
                Some(phase) => WatchStatus::Tracking(phase),
                None => WatchStatus::WatchingDepth,
            }
        } else if !warmed_up {
            WatchStatus::Starting
        } else if self.engine.is_running() {
            WatchStatus::EngineOn
        } else {
            WatchStatus::Stopped
        }
    }

    pub fn snapshot(&self, now: i64) -> WatchSnapshot {
        WatchSnapshot {
            tide: self.analyzer.tide_status(now),
            recording: self.recording,
            recording_start: self.recording_start,
            recording_stop: self.recording_stop,
            capture_anchorage: self.capture.clone(),
        }
    }
}

fn is_stale(last_update: Option<i64>, timeout_secs: u64, now: i64) -> bool {
    match last_update {
        Some(at) => now - at > timeout_secs as i64 * 1000,
        None => true,
    }
}
