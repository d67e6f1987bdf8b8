//! # Tide Watch Core Library
//!
//! This library infers the tide from a depth sounder aboard a vessel lying at
//! anchor. There is no tide table and no network: the vessel itself is the
//! tide gauge. Once the boat has watched a couple of tide turns at an
//! anchorage, it can report the current phase, predict the next high and low,
//! and estimate how far the water has risen above the last low.
//!
//! ## Design Philosophy
//!
//! ### Small, Owned State
//! - **One analyzer per recording session**: [`analyzer::TideAnalyzer`] owns all
//!   trend and extreme tracking state; nothing is global
//! - **Fixed-size persistence**: the [`ring_log::DepthLog`] file is sized once
//!   for 30 days of samples and never grows
//! - **Primitive fields**: `f32` depths (the persisted precision) and `i64`
//!   epoch-millisecond timers keep samples compact
//!
//! ### Temporal Resolution
//! Depth is averaged continuously and sampled every few minutes (5 by default):
//! - **Trend window**: 30 minutes of samples decide whether water is rising or
//!   falling
//! - **Phase length**: successive identical tide phases are assumed to be
//!   12 h 25 min apart (semidiurnal tide)
//!
//! ### Data Flow
//! 1. **Record**: every sample interval, `{timer, depth, position}` is appended to
//!    the anchorage's ring log
//! 2. **Analyze**: the same sample is fed to the phase analyzer
//! 3. **Report**: confirmed phase flips become outbound path/value pairs
//! 4. **Restart**: on a new recording session the ring log is replayed silently
//!    to rebuild the analyzer before live samples resume
//!
//! ## Core Types
//!
//! - [`Sample`]: one averaged depth reading at a position
//! - [`ExtremeRecord`]: a running or confirmed high/low tide
//! - [`PhaseReport`]: announcement of a confirmed ebb/flood transition

use serde::{Deserialize, Serialize};

// Module declarations
pub mod analyzer;
pub mod config;
pub mod location;
pub mod report;
pub mod ring_log;
pub mod simulate;
pub mod source;
pub mod watch;

/// A geographic position in decimal degrees.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
}

impl Position {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Great-circle distance to `other` in meters (haversine, mean Earth radius).
    pub fn distance_to(&self, other: &Position) -> f64 {
        let r = 6_371_000.0_f64;
        let dlat = (other.latitude - self.latitude).to_radians();
        let dlon = (other.longitude - self.longitude).to_radians();
        let a = (dlat / 2.0).sin().powi(2)
            + self.latitude.to_radians().cos()
                * other.latitude.to_radians().cos()
                * (dlon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
        r * c
    }
}

/// A single averaged depth reading.
///
/// Depth is kept as `f32` because that is the precision stored in the ring
/// log; a live run and a replay of the same samples must see identical values.
///
/// # Example
/// ```
/// use tide_watch_lib::{Position, Sample};
///
/// let sample = Sample {
///     timer: 1_700_000_000_000,
///     depth: 4.25,
///     position: Position::new(26.285139, -80.090347),
/// };
/// assert_eq!(sample.depth, 4.25);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Wall-clock time in epoch milliseconds
    pub timer: i64,
    /// Depth below surface in meters
    pub depth: f32,
    /// Where the vessel was when the sample was taken
    pub position: Position,
}

/// Ebb (falling) or flood (rising) tide.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TidePhase {
    Ebb,
    Flood,
}

impl TidePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            TidePhase::Ebb => "ebb",
            TidePhase::Flood => "flood",
        }
    }
}

impl std::fmt::Display for TidePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A local high or low tide.
///
/// Running extremes are updated on every sample; known extremes are copies of
/// a running extreme committed when the tide is confirmed to have turned.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtremeRecord {
    /// Depth in meters at the extreme
    pub depth: f32,
    /// When the extreme was observed (epoch ms)
    pub timer: i64,
    pub position: Position,
    /// Depth difference to the paired opposite extreme, when the two are a
    /// plausible half tide cycle apart
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wave_height: Option<f32>,
}

impl ExtremeRecord {
    pub fn from_sample(sample: &Sample) -> Self {
        Self {
            depth: sample.depth,
            timer: sample.timer,
            position: sample.position,
            wave_height: None,
        }
    }
}

/// Announcement of a confirmed tide phase transition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseReport {
    /// Timer of the sample that confirmed the transition
    pub timer: i64,
    pub phase: TidePhase,
    pub lowest_known: Option<ExtremeRecord>,
    pub highest_known: Option<ExtremeRecord>,
}
