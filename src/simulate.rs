//! # Synthetic Tide
//!
//! A single-constituent semidiurnal tide, used to exercise the analyzer
//! without a boat: the binary's `--simulate` mode and the scenario tests
//! both feed it through the same code path as live samples.
//!
//! ## Model Characteristics
//! - **Period**: 12 h 25 min, the phase length the analyzer predicts with
//! - **Phase**: tied to the clock through a reference high water timer
//! - **No asymmetry**: highs and lows are equally spaced and equally deep
//!
//! Depth is `mean + amplitude * cos(2π (t - high_water) / period)`.

use crate::analyzer::PHASE_LENGTH_MS;
use crate::{Position, Sample};
use std::f64::consts::TAU;

/// Synthetic depth sounder.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SyntheticTide {
    /// Mean depth in meters
    pub mean: f64,
    /// Half the tidal range in meters
    pub amplitude: f64,
    /// Time of one high water, epoch ms
    pub high_water: i64,
    pub period_ms: i64,
}

impl SyntheticTide {
    pub fn new(mean: f64, amplitude: f64, high_water: i64) -> Self {
        Self {
            mean,
            amplitude,
            high_water,
            period_ms: PHASE_LENGTH_MS,
        }
    }

    pub fn depth_at(&self, timer: i64) -> f64 {
        let cycles = (timer - self.high_water) as f64 / self.period_ms as f64;
        self.mean + self.amplitude * (cycles * TAU).cos()
    }

    /// Samples every `interval_minutes` from `start` (inclusive) to `end`
    /// (exclusive), all at `position`.
    pub fn samples(
        &self,
        start: i64,
        end: i64,
        interval_minutes: u32,
        position: Position,
    ) -> Vec<Sample> {
        let step = i64::from(interval_minutes.max(1)) * 60_000;
        let count = ((end - start).max(0) + step - 1) / step;
        let mut samples = Vec::with_capacity(count as usize);
        let mut timer = start;
        while timer < end {
            samples.push(Sample {
                timer,
                depth: self.depth_at(timer) as f32,
                position,
            });
            timer += step;
        }
        samples
    }
}
