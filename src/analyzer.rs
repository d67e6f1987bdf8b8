//! # Tide Phase Analyzer
//!
//! Turns a stream of averaged depth samples into tide information: whether the
//! tide is ebbing or flooding, when the last high and low occurred, and roughly
//! how far the water currently sits above the last low.
//!
//! ## Trend Detection
//!
//! Each new sample is compared with the sample taken 30 minutes earlier. The
//! sign of that slope lands in a three-bucket histogram (falling, flat,
//! rising). While no trend is locked, four votes in the falling or rising
//! bucket lock the trend. Once locked, a single disagreeing vote unlocks it and
//! clears the histogram, so a real turn needs four fresh votes before it is
//! believed.
//!
//! A locked trend different from the previous one is a **phase flip**. From
//! the second flip onwards the running extreme of the half cycle that just
//! ended is committed as a known high or low. The very first flip is ignored
//! for that purpose because tracking may have started halfway up or down a
//! tide.
//!
//! ## Height Estimate
//!
//! With both a known high and low and the depth difference between them, the
//! current offset is interpolated with a raised cosine over the average
//! semidiurnal phase length of 12 h 25 min.
//!
//! ## Known Weakness
//!
//! The histogram is only cleared on an unlock. Long noisy stretches let old
//! votes count towards a later decision.

use crate::{ExtremeRecord, PhaseReport, Sample, TidePhase};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::f64::consts::PI;
use tracing::{debug, info, warn};

/// Average time between two identical tide phases: 12 hours 25 minutes
pub const PHASE_LENGTH_MS: i64 = (12 * 60 + 25) * 60 * 1000;

/// Span of the trend window in minutes
pub const TREND_WINDOW_MINUTES: u32 = 30;

/// Votes needed in one histogram bucket to lock a trend
pub const TREND_LOCK_COUNT: u32 = 4;

/// Turns a per-millisecond slope into a human-scale number
pub const DIRECTION_SCALE: f64 = 100_000.0;

/// A gap between samples longer than this restarts phase tracking
pub const GAP_RESET_MS: i64 = 40 * 60 * 1000;

/// Shortest plausible time between a high and the adjacent low, in hours
pub const MIN_WAVE_GAP_HOURS: f64 = 5.5;

/// Longest plausible time between a high and the adjacent low, in hours
pub const MAX_WAVE_GAP_HOURS: f64 = 13.0;

const MS_PER_HOUR: f64 = 3_600_000.0;

/// Locked depth trend.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    #[default]
    Undetermined,
    Ebb,
    Flood,
}

impl Trend {
    /// -1 falling, 0 undetermined, +1 rising
    pub fn sign(self) -> i8 {
        match self {
            Trend::Undetermined => 0,
            Trend::Ebb => -1,
            Trend::Flood => 1,
        }
    }

    pub fn phase(self) -> Option<TidePhase> {
        match self {
            Trend::Undetermined => None,
            Trend::Ebb => Some(TidePhase::Ebb),
            Trend::Flood => Some(TidePhase::Flood),
        }
    }
}

/// Slope between two points, `None` when both share the same x.
pub fn slope(x1: i64, y1: f32, x2: i64, y2: f32) -> Option<f64> {
    if x1 == x2 {
        return None;
    }
    Some((y2 as f64 - y1 as f64) / (x2 - x1) as f64)
}

fn direction_sign(direction: f64) -> i8 {
    if direction > 0.0 {
        1
    } else if direction < 0.0 {
        -1
    } else {
        0
    }
}

/// Depth difference `committed - paired` if the two extremes are a plausible
/// half tide cycle apart (5.5 to 13 hours), otherwise `None`.
pub fn wave_height_between(committed: &ExtremeRecord, paired: &ExtremeRecord) -> Option<f32> {
    let hours = (committed.timer - paired.timer).abs() as f64 / MS_PER_HOUR;
    (MIN_WAVE_GAP_HOURS..=MAX_WAVE_GAP_HOURS)
        .contains(&hours)
        .then(|| committed.depth - paired.depth)
}

/// Move `timer` forward by whole phase lengths until it is no earlier than `now`.
pub fn future_phase(timer: i64, now: i64) -> i64 {
    if timer >= now {
        return timer;
    }
    let cycles = (now - timer + PHASE_LENGTH_MS - 1) / PHASE_LENGTH_MS;
    timer + cycles * PHASE_LENGTH_MS
}

/// A known extreme projected to its next expected occurrence.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictedExtreme {
    pub timer: i64,
    pub depth: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wave_height: Option<f32>,
}

impl PredictedExtreme {
    fn project(extreme: &ExtremeRecord, now: i64) -> Self {
        Self {
            timer: future_phase(extreme.timer, now),
            depth: extreme.depth,
            wave_height: extreme.wave_height,
        }
    }
}

/// Read-only snapshot of everything the analyzer knows.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TideStatus {
    /// Running low since the last ebb flip
    pub lowest_tide: Option<ExtremeRecord>,
    /// Running high since the last flood flip
    pub highest_tide: Option<ExtremeRecord>,
    pub lowest_known: Option<ExtremeRecord>,
    pub highest_known: Option<ExtremeRecord>,
    pub tide_sample_count: u64,
    /// Last computed direction (scaled slope)
    pub cur_tide_dir: Option<f64>,
    pub depth_trend: Trend,
    pub depth_trend_count: [u32; 3],
    pub cur_tide_phase: Option<TidePhase>,
    pub phase_switch_count: u32,
    pub last_reading: Option<i64>,
    pub next_highest_known: Option<PredictedExtreme>,
    pub next_lowest_known: Option<PredictedExtreme>,
    /// Mean depth of all committed lows
    pub average_low: Option<f64>,
}

/// Online tide phase detector and height estimator.
///
/// Feed samples in time order with [`include_data`](Self::include_data). Replay
/// stored samples with `is_live = false` first, then live samples.
#[derive(Clone, Debug)]
pub struct TideAnalyzer {
    window_len: usize,

    // Phase tracking, cleared by reset_phase_tracking()
    trend_window: VecDeque<Sample>,
    histogram: [u32; 3],
    locked_trend: Trend,
    last_known_trend: Trend,
    phase_switch_count: u32,
    cur_phase: Option<TidePhase>,
    direction: Option<f64>,
    running_low: Option<ExtremeRecord>,
    running_high: Option<ExtremeRecord>,
    sample_count: u64,

    // Survives phase tracking resets, cleared by start()
    last_reading: Option<i64>,
    lowest_known: Option<ExtremeRecord>,
    highest_known: Option<ExtremeRecord>,
    last_phase_report: Option<PhaseReport>,
    low_tide_total: f64,
    low_tide_samples: u32,
}

impl TideAnalyzer {
    /// Create an analyzer for samples taken every `sample_interval_minutes`.
    pub fn new(sample_interval_minutes: u32) -> Self {
        let interval = sample_interval_minutes.max(1);
        // Always compare against at least the previous sample.
        let window_len = TREND_WINDOW_MINUTES.div_ceil(interval).max(2) as usize;

        let mut analyzer = Self {
            window_len,
            trend_window: VecDeque::with_capacity(window_len),
            histogram: [0; 3],
            locked_trend: Trend::Undetermined,
            last_known_trend: Trend::Undetermined,
            phase_switch_count: 0,
            cur_phase: None,
            direction: None,
            running_low: None,
            running_high: None,
            sample_count: 0,
            last_reading: None,
            lowest_known: None,
            highest_known: None,
            last_phase_report: None,
            low_tide_total: 0.0,
            low_tide_samples: 0,
        };
        analyzer.start();
        analyzer
    }

    /// Forget everything, including known extremes and the last report.
    pub fn start(&mut self) {
        debug!("Starting tide analysis");
        self.lowest_known = None;
        self.highest_known = None;
        self.last_phase_report = None;
        self.last_reading = None;
        self.low_tide_total = 0.0;
        self.low_tide_samples = 0;
        self.reset_phase_tracking();
    }

    /// Restart trend detection from scratch. Known extremes survive.
    pub fn reset_phase_tracking(&mut self) {
        debug!("Resetting tracking status");
        self.trend_window.clear();
        self.histogram = [0; 3];
        self.locked_trend = Trend::Undetermined;
        self.last_known_trend = Trend::Undetermined;
        self.phase_switch_count = 0;
        self.cur_phase = None;
        self.direction = None;
        self.running_low = None;
        self.running_high = None;
        self.sample_count = 0;
    }

    /// Add one sample to the analysis.
    ///
    /// Returns the phase report when this sample confirmed a phase flip and
    /// `is_live` is set. During replay the report is only stored.
    pub fn include_data(&mut self, sample: &Sample, is_live: bool) -> Option<PhaseReport> {
        if let Some(last) = self.last_reading {
            let gap = sample.timer - last;
            if gap > GAP_RESET_MS {
                debug!(gap_minutes = gap / 60_000, "Data gap, restarting phase tracking");
                self.reset_phase_tracking();
            } else if gap < 0 {
                warn!(
                    timer = sample.timer,
                    last, "Sample older than previous reading, restarting phase tracking"
                );
                self.reset_phase_tracking();
            }
        }

        if is_live {
            debug!(timer = sample.timer, depth = sample.depth, "Checking tide data");
        }

        self.trend_window.push_back(*sample);

        let mut report = None;
        if self.trend_window.len() >= self.window_len {
            if let Some(prev) = self.trend_window.pop_front() {
                match slope(prev.timer, prev.depth, sample.timer, sample.depth) {
                    Some(slope) => {
                        let direction = slope * DIRECTION_SCALE;
                        self.direction = Some(direction);
                        if !is_live {
                            debug!(
                                timer = sample.timer,
                                depth = sample.depth,
                                direction,
                                "Playback tide data"
                            );
                        }
                        report = self.track_direction(direction, sample, is_live);
                    }
                    None => {
                        debug!(timer = sample.timer, "Duplicate timestamp, no direction");
                    }
                }
            }
        }

        self.update_running_extremes(sample);
        self.sample_count += 1;
        self.last_reading = Some(sample.timer);

        report
    }

    fn track_direction(
        &mut self,
        direction: f64,
        sample: &Sample,
        is_live: bool,
    ) -> Option<PhaseReport> {
        let sign = direction_sign(direction);
        self.histogram[(sign + 1) as usize] += 1;

        if self.locked_trend == Trend::Undetermined {
            self.locked_trend = self.find_depth_trend();
            if self.locked_trend == Trend::Undetermined {
                return None;
            }
            debug!(trend = ?self.locked_trend, "Current trend determined");
            if self.locked_trend != self.last_known_trend {
                return self.flip_phase(sample, is_live);
            }
        } else if self.locked_trend.sign() != sign {
            debug!(direction, "Suspected phase change");
            self.locked_trend = Trend::Undetermined;
            self.histogram = [0; 3];
        }
        None
    }

    fn find_depth_trend(&self) -> Trend {
        let [falling, _, rising] = self.histogram;
        let (trend, count) = if rising > falling {
            (Trend::Flood, rising)
        } else {
            (Trend::Ebb, falling)
        };

        if count >= TREND_LOCK_COUNT {
            trend
        } else {
            Trend::Undetermined
        }
    }

    fn flip_phase(&mut self, sample: &Sample, is_live: bool) -> Option<PhaseReport> {
        let phase = self.locked_trend.phase()?;
        self.last_known_trend = self.locked_trend;
        self.phase_switch_count += 1;
        self.cur_phase = Some(phase);

        let committing = self.phase_switch_count >= 2;
        match phase {
            TidePhase::Ebb => {
                // Flood to ebb: the running high was the actual high tide.
                if committing {
                    if let Some(high) = self.running_high {
                        self.highest_known = Some(commit(high, self.lowest_known.as_ref()));
                    }
                }
                self.running_low = None;
            }
            TidePhase::Flood => {
                if committing {
                    if let Some(low) = self.running_low {
                        self.lowest_known = Some(commit(low, self.highest_known.as_ref()));
                        self.low_tide_total += low.depth as f64;
                        self.low_tide_samples += 1;
                    }
                }
                self.running_high = None;
            }
        }

        let report = PhaseReport {
            timer: sample.timer,
            phase,
            lowest_known: self.lowest_known,
            highest_known: self.highest_known,
        };

        if is_live {
            info!(%phase, switches = self.phase_switch_count, timer = sample.timer, "New tide phase established");
        } else {
            debug!(%phase, switches = self.phase_switch_count, timer = sample.timer, "Replayed tide phase");
        }

        self.last_phase_report = Some(report.clone());
        is_live.then_some(report)
    }

    fn update_running_extremes(&mut self, sample: &Sample) {
        if self.running_low.map_or(true, |low| sample.depth < low.depth) {
            self.running_low = Some(ExtremeRecord::from_sample(sample));
        }
        if self.running_high.map_or(true, |high| sample.depth > high.depth) {
            self.running_high = Some(ExtremeRecord::from_sample(sample));
        }
    }

    /// Estimated height above the last low at `now`, in meters.
    ///
    /// `None` until the last report carries both extremes and the wave height
    /// the current phase needs.
    pub fn estimate_tide_height_now(&self, now: i64) -> Option<f64> {
        let report = self.last_phase_report.as_ref()?;
        let low = report.lowest_known.as_ref()?;
        let high = report.highest_known.as_ref()?;

        let (elapsed, offset, wave_height) = match self.cur_phase? {
            TidePhase::Ebb => (now - high.timer, 0.0, low.wave_height?.abs()),
            TidePhase::Flood => (now - low.timer, PI, high.wave_height?),
        };

        let radians = elapsed as f64 / PHASE_LENGTH_MS as f64 * PI + offset;
        Some(wave_height as f64 * (radians.cos() + 1.0) / 2.0)
    }

    /// Forget known extremes older than `cutoff`, also in the last report.
    pub fn expire_known_before(&mut self, cutoff: i64) {
        forget_if_older(&mut self.lowest_known, cutoff);
        forget_if_older(&mut self.highest_known, cutoff);
        if let Some(report) = self.last_phase_report.as_mut() {
            forget_if_older(&mut report.lowest_known, cutoff);
            forget_if_older(&mut report.highest_known, cutoff);
        }
    }

    /// Snapshot for status displays; next extremes are projected past `now`.
    pub fn tide_status(&self, now: i64) -> TideStatus {
        TideStatus {
            lowest_tide: self.running_low,
            highest_tide: self.running_high,
            lowest_known: self.lowest_known,
            highest_known: self.highest_known,
            tide_sample_count: self.sample_count,
            cur_tide_dir: self.direction,
            depth_trend: self.locked_trend,
            depth_trend_count: self.histogram,
            cur_tide_phase: self.cur_phase,
            phase_switch_count: self.phase_switch_count,
            last_reading: self.last_reading,
            next_highest_known: self
                .highest_known
                .as_ref()
                .map(|high| PredictedExtreme::project(high, now)),
            next_lowest_known: self
                .lowest_known
                .as_ref()
                .map(|low| PredictedExtreme::project(low, now)),
            average_low: self.average_low(),
        }
    }

    /// Mean depth of all committed low tides
    pub fn average_low(&self) -> Option<f64> {
        (self.low_tide_samples > 0).then(|| self.low_tide_total / self.low_tide_samples as f64)
    }

    pub fn phase(&self) -> Option<TidePhase> {
        self.cur_phase
    }

    pub fn locked_trend(&self) -> Trend {
        self.locked_trend
    }

    pub fn histogram(&self) -> [u32; 3] {
        self.histogram
    }

    pub fn phase_switch_count(&self) -> u32 {
        self.phase_switch_count
    }

    pub fn direction(&self) -> Option<f64> {
        self.direction
    }

    pub fn sample_count(&self) -> u64 {
        self.sample_count
    }

    pub fn last_reading(&self) -> Option<i64> {
        self.last_reading
    }

    pub fn lowest_known(&self) -> Option<&ExtremeRecord> {
        self.lowest_known.as_ref()
    }

    pub fn highest_known(&self) -> Option<&ExtremeRecord> {
        self.highest_known.as_ref()
    }

    pub fn last_phase_report(&self) -> Option<&PhaseReport> {
        self.last_phase_report.as_ref()
    }
}

fn commit(extreme: ExtremeRecord, paired: Option<&ExtremeRecord>) -> ExtremeRecord {
    ExtremeRecord {
        wave_height: paired.and_then(|paired| wave_height_between(&extreme, paired)),
        ..extreme
    }
}

fn forget_if_older(extreme: &mut Option<ExtremeRecord>, cutoff: i64) {
    if extreme.is_some_and(|e| e.timer < cutoff) {
        *extreme = None;
    }
}
