//! # Tide Detection Scenarios
//!
//! Multi-day runs of a synthetic tide through the analyzer and the depth log.
//! Each test builds its own data, so they run independently and quickly.

use tempfile::tempdir;
use tide_watch_lib::analyzer::{TideAnalyzer, Trend, PHASE_LENGTH_MS};
use tide_watch_lib::ring_log::DepthLog;
use tide_watch_lib::simulate::SyntheticTide;
use tide_watch_lib::{PhaseReport, Position, Sample, TidePhase};

// 2025-07-24T00:00:00Z
const T0: i64 = 1_753_315_200_000;
const MINUTE: i64 = 60_000;
const DAY: i64 = 24 * 60 * MINUTE;

fn harbor() -> Position {
    Position::new(41.5, -70.6)
}

/// High water at `T0`, 3 m range around 4 m.
fn tide() -> SyntheticTide {
    SyntheticTide::new(4.0, 1.5, T0)
}

fn run_live(analyzer: &mut TideAnalyzer, samples: &[Sample]) -> Vec<PhaseReport> {
    samples
        .iter()
        .filter_map(|sample| analyzer.include_data(sample, true))
        .collect()
}

#[test]
fn sinusoid_yields_alternating_reports_half_a_period_apart() {
    let samples = tide().samples(T0, T0 + 5 * DAY, 5, harbor());
    let mut analyzer = TideAnalyzer::new(5);
    let reports = run_live(&mut analyzer, &samples);

    // Roughly 9.7 half cycles in 5 days
    assert!(reports.len() >= 9, "only {} reports", reports.len());

    for pair in reports.windows(2) {
        assert_ne!(pair[0].phase, pair[1].phase, "phases must alternate");
        let spacing = pair[1].timer - pair[0].timer;
        assert!(
            (spacing - PHASE_LENGTH_MS / 2).abs() <= 15 * MINUTE,
            "reports {} minutes apart",
            spacing / MINUTE
        );
    }
}

#[test]
fn flips_follow_extremes_closely() {
    let samples = tide().samples(T0, T0 + 2 * DAY, 5, harbor());
    let mut analyzer = TideAnalyzer::new(5);
    let reports = run_live(&mut analyzer, &samples);

    // Starting at high water, the first flip is to ebb.
    assert_eq!(reports[0].phase, TidePhase::Ebb);
    for (n, report) in reports.iter().enumerate() {
        let extreme = T0 + n as i64 * PHASE_LENGTH_MS / 2;
        let delay = report.timer - extreme;
        assert!(
            (0..=60 * MINUTE).contains(&delay),
            "flip {} came {} minutes after the extreme",
            n,
            delay / MINUTE
        );
    }
}

#[test]
fn first_transition_commits_no_extreme() {
    let samples = tide().samples(T0, T0 + DAY, 5, harbor());
    let mut analyzer = TideAnalyzer::new(5);
    let reports = run_live(&mut analyzer, &samples);

    let first = &reports[0];
    assert_eq!(first.lowest_known, None);
    assert_eq!(first.highest_known, None);

    // The second flip (to flood) commits the low, still without a wave height.
    let second = &reports[1];
    assert_eq!(second.phase, TidePhase::Flood);
    let low = second.lowest_known.expect("low committed on second flip");
    assert!((low.depth - 2.5).abs() < 0.01);
    assert_eq!(low.wave_height, None);
    assert_eq!(second.highest_known, None);
}

#[test]
fn wave_heights_and_estimate_after_four_flips() {
    let samples = tide().samples(T0, T0 + 2 * DAY, 5, harbor());
    let mut analyzer = TideAnalyzer::new(5);
    let mut flips = 0;

    for sample in &samples {
        let Some(report) = analyzer.include_data(sample, true) else {
            continue;
        };
        flips += 1;
        let estimate = analyzer.estimate_tide_height_now(report.timer);

        match flips {
            1..=3 => assert_eq!(estimate, None, "no estimate after flip {flips}"),
            4 => {
                let high = report.highest_known.unwrap();
                let low = report.lowest_known.unwrap();
                assert!((high.wave_height.unwrap() - 3.0).abs() < 0.01);
                assert!((low.wave_height.unwrap() + 3.0).abs() < 0.01);

                // Just after low water on a flood tide: close to zero.
                let height = estimate.expect("estimate once both heights are known");
                assert!((0.0..0.5).contains(&height), "height {height}");
            }
            _ => assert!(estimate.is_some()),
        }
    }
    assert!(flips >= 5);
    assert!((analyzer.average_low().unwrap() - 2.5).abs() < 0.01);
}

#[test]
fn long_gap_restarts_detection() {
    let mut analyzer = TideAnalyzer::new(5);
    let before = tide().samples(T0, T0 + 3 * 60 * MINUTE, 5, harbor());
    run_live(&mut analyzer, &before);
    assert_eq!(analyzer.locked_trend(), Trend::Ebb);
    let known_high = analyzer.highest_known().copied();

    let last = before.last().unwrap().timer;
    let resume = last + 45 * MINUTE;
    let after = tide().samples(resume, resume + 5 * MINUTE, 5, harbor());
    run_live(&mut analyzer, &after);

    assert_eq!(analyzer.locked_trend(), Trend::Undetermined);
    assert_eq!(analyzer.histogram(), [0, 0, 0]);
    assert_eq!(analyzer.phase(), None);
    assert_eq!(analyzer.phase_switch_count(), 0);
    assert_eq!(analyzer.highest_known().copied(), known_high);
}

#[test]
fn ring_log_keeps_newest_records_in_order() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("00001.dat");
    let capacity = 50;
    let samples = tide().samples(T0, T0 + 57 * 5 * MINUTE, 5, harbor());
    assert_eq!(samples.len(), 57);

    {
        let mut log = DepthLog::open(&path, capacity).unwrap();
        for sample in &samples {
            log.append_record(sample).unwrap();
        }
    }

    let mut log = DepthLog::open(&path, capacity).unwrap();
    let records = log.records().unwrap();
    assert_eq!(records.len(), capacity as usize);
    assert_eq!(records, samples[7..].to_vec());
    assert!(records.windows(2).all(|w| w[0].timer < w[1].timer));
}

#[test]
fn replaying_the_log_reproduces_the_live_run() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("00001.dat");
    let samples = tide().samples(T0, T0 + 3 * DAY, 5, harbor());

    let mut live = TideAnalyzer::new(5);
    {
        let mut log = DepthLog::open(&path, 8640).unwrap();
        for sample in &samples {
            log.append_record(sample).unwrap();
            live.include_data(sample, true);
        }
    }

    let mut replayed = TideAnalyzer::new(5);
    let mut reports = 0;
    let mut log = DepthLog::open(&path, 8640).unwrap();
    let count = log
        .for_each(|sample| {
            if replayed.include_data(&sample, false).is_some() {
                reports += 1;
            }
        })
        .unwrap();

    assert_eq!(count, samples.len());
    assert_eq!(reports, 0, "replay never yields reports");
    assert_eq!(replayed.phase(), live.phase());
    assert_eq!(replayed.lowest_known(), live.lowest_known());
    assert_eq!(replayed.highest_known(), live.highest_known());
    assert_eq!(replayed.last_phase_report(), live.last_phase_report());
}
