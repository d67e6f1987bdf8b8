//! # Outbound Tide Reports
//!
//! Tide information leaves the watcher as a flat list of `{path, value}` pairs.
//! Wrapping them in the host's delta envelope is the sink's job.
//!
//! | Path | Value |
//! |---|---|
//! | `environment.tide.phaseNow` | `"ebb"` or `"flood"` |
//! | `environment.tide.heightNow` | estimated meters above the last low |
//! | `environment.tide.timeLow` | next predicted low, RFC 3339 UTC |
//! | `environment.tide.heightLow` | depth at the last known low |
//! | `environment.tide.timeHigh` | next predicted high, RFC 3339 UTC |
//! | `environment.tide.heightHigh` | depth at the last known high |

use crate::analyzer::future_phase;
use crate::{ExtremeRecord, PhaseReport, TidePhase};
use chrono::{SecondsFormat, TimeZone, Utc};
use serde::Serialize;
use serde_json::Value;

pub const PHASE_NOW: &str = "environment.tide.phaseNow";
pub const HEIGHT_NOW: &str = "environment.tide.heightNow";
pub const TIME_LOW: &str = "environment.tide.timeLow";
pub const HEIGHT_LOW: &str = "environment.tide.heightLow";
pub const TIME_HIGH: &str = "environment.tide.timeHigh";
pub const HEIGHT_HIGH: &str = "environment.tide.heightHigh";

/// One outbound value.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PathValue {
    pub path: String,
    pub value: Value,
}

impl PathValue {
    pub fn new(path: &str, value: impl Into<Value>) -> Self {
        Self {
            path: path.to_string(),
            value: value.into(),
        }
    }
}

/// Epoch milliseconds as an RFC 3339 UTC string with millisecond precision.
pub fn iso_time(timer: i64) -> Option<String> {
    Utc.timestamp_millis_opt(timer)
        .single()
        .map(|time| time.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Everything known at a phase flip: the phase, the next predicted low and
/// high (projected past `now`) and the height estimate when there is one.
pub fn phase_report_values(
    report: &PhaseReport,
    height_now: Option<f64>,
    now: i64,
) -> Vec<PathValue> {
    let mut values = vec![PathValue::new(PHASE_NOW, report.phase.as_str())];

    if let Some(low) = &report.lowest_known {
        push_extreme(&mut values, low, TIME_LOW, HEIGHT_LOW, now);
    }
    if let Some(high) = &report.highest_known {
        push_extreme(&mut values, high, TIME_HIGH, HEIGHT_HIGH, now);
    }
    if let Some(height) = height_now {
        values.push(PathValue::new(HEIGHT_NOW, height));
    }

    values
}

/// The periodic update: current phase plus height estimate when available.
pub fn height_values(phase: TidePhase, height_now: Option<f64>) -> Vec<PathValue> {
    let mut values = vec![PathValue::new(PHASE_NOW, phase.as_str())];
    if let Some(height) = height_now {
        values.push(PathValue::new(HEIGHT_NOW, height));
    }
    values
}

fn push_extreme(
    values: &mut Vec<PathValue>,
    extreme: &ExtremeRecord,
    time_path: &str,
    height_path: &str,
    now: i64,
) {
    if let Some(time) = iso_time(future_phase(extreme.timer, now)) {
        values.push(PathValue::new(time_path, time));
    }
    values.push(PathValue::new(height_path, f64::from(extreme.depth)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::PHASE_LENGTH_MS;
    use crate::Position;

    // 2025-07-24T00:00:00Z
    const MIDNIGHT: i64 = 1_753_315_200_000;

    fn extreme(timer: i64, depth: f32) -> ExtremeRecord {
        ExtremeRecord {
            depth,
            timer,
            position: Position::new(41.5, -70.6),
            wave_height: None,
        }
    }

    fn find<'a>(values: &'a [PathValue], path: &str) -> Option<&'a Value> {
        values.iter().find(|v| v.path == path).map(|v| &v.value)
    }

    #[test]
    fn test_iso_time_format() {
        assert_eq!(
            iso_time(MIDNIGHT + 1_500).as_deref(),
            Some("2025-07-24T00:00:01.500Z")
        );
    }

    #[test]
    fn test_phase_only_report() {
        let report = PhaseReport {
            timer: MIDNIGHT,
            phase: TidePhase::Flood,
            lowest_known: None,
            highest_known: None,
        };
        let values = phase_report_values(&report, None, MIDNIGHT);
        assert_eq!(values, vec![PathValue::new(PHASE_NOW, "flood")]);
    }

    #[test]
    fn test_full_report_projects_times_forward() {
        let report = PhaseReport {
            timer: MIDNIGHT,
            phase: TidePhase::Ebb,
            lowest_known: Some(extreme(MIDNIGHT - 7 * 3_600_000, 1.5)),
            highest_known: Some(extreme(MIDNIGHT - 3_600_000, 3.25)),
        };
        let values = phase_report_values(&report, Some(1.75), MIDNIGHT);

        assert_eq!(find(&values, PHASE_NOW), Some(&Value::from("ebb")));
        assert_eq!(find(&values, HEIGHT_LOW), Some(&Value::from(1.5)));
        assert_eq!(find(&values, HEIGHT_HIGH), Some(&Value::from(3.25)));
        assert_eq!(find(&values, HEIGHT_NOW), Some(&Value::from(1.75)));

        let expected_high = iso_time(MIDNIGHT - 3_600_000 + PHASE_LENGTH_MS).unwrap();
        assert_eq!(find(&values, TIME_HIGH), Some(&Value::from(expected_high)));
        let expected_low = iso_time(MIDNIGHT - 7 * 3_600_000 + PHASE_LENGTH_MS).unwrap();
        assert_eq!(find(&values, TIME_LOW), Some(&Value::from(expected_low)));
    }

    #[test]
    fn test_height_values_omit_missing_estimate() {
        assert_eq!(
            height_values(TidePhase::Ebb, None),
            vec![PathValue::new(PHASE_NOW, "ebb")]
        );
        assert_eq!(height_values(TidePhase::Flood, Some(0.5)).len(), 2);
    }
}
