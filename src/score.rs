use chrono::{DateTime, Utc};

use crate::models::{Confidence, CrowdLabel, Report, Trend};

pub const DECAY_MINUTES: f64 = 30.0;
pub const CONSENSUS_WINDOW_MINUTES: f64 = 30.0;
pub const OUTLIER_GAP: f64 = 2.0;
pub const OUTLIER_DAMP: f64 = 0.25;
pub const NEUTRAL_SIGNAL: f64 = 2.0;
pub const NEUTRAL_CONSENSUS: i16 = 2;
pub const TREND_LOOKBACK_MINUTES: f64 = 90.0;
pub const TREND_NOISE_FLOOR: f64 = 0.25;
pub const TREND_MIN_REPORTS: usize = 2;
pub const REPORT_WINDOW_MINUTES: i64 = 180;

fn age_minutes(report: &Report, now: DateTime<Utc>) -> f64 {
    (now - report.submitted_at).num_milliseconds() as f64 / 60_000.0
}

fn decay_weight(age_minutes: f64) -> f64 {
    (-age_minutes / DECAY_MINUTES).exp()
}

/// Weighted consensus over reports no older than the quick window, rounded
/// to the nearest status. Used only to decide which reports get damped.
fn quick_consensus(reports: &[Report], now: DateTime<Utc>) -> i16 {
    let mut weighted = 0.0;
    let mut total = 0.0;
    for report in reports {
        let age = age_minutes(report, now);
        if age > CONSENSUS_WINDOW_MINUTES {
            continue;
        }
        let weight = decay_weight(age);
        weighted += report.status as f64 * weight;
        total += weight;
    }
    if total > 0.0 {
        (weighted / total).round() as i16
    } else {
        NEUTRAL_CONSENSUS
    }
}

/// Two-pass decayed consensus signal in [1, 4]. Reports that disagree with
/// the quick consensus by two or more levels keep a quarter of their decayed
/// weight; no report is ever dropped outright.
pub fn consensus_signal(reports: &[Report], now: DateTime<Utc>) -> f64 {
    let consensus = quick_consensus(reports, now);
    let mut weighted = 0.0;
    let mut total = 0.0;
    for report in reports {
        let mut weight = decay_weight(age_minutes(report, now));
        if (report.status - consensus).abs() as f64 >= OUTLIER_GAP {
            weight *= OUTLIER_DAMP;
        }
        weighted += report.status as f64 * weight;
        total += weight;
    }
    if total > 0.0 {
        weighted / total
    } else {
        NEUTRAL_SIGNAL
    }
}

pub fn classify(signal: f64) -> CrowdLabel {
    if signal < 1.6 {
        CrowdLabel::Low
    } else if signal < 2.4 {
        CrowdLabel::Medium
    } else if signal < 3.2 {
        CrowdLabel::High
    } else {
        CrowdLabel::Insane
    }
}

/// Recency-and-volume heuristic. The high check runs before the medium
/// check; reordering changes the output for fresh, busy venues.
pub fn confidence(reports: &[Report], now: DateTime<Utc>) -> Confidence {
    let Some(latest) = reports.iter().map(|r| r.submitted_at).max() else {
        return Confidence::Low;
    };
    let age = (now - latest).num_milliseconds() as f64 / 60_000.0;
    if age <= 10.0 && reports.len() >= 3 {
        Confidence::High
    } else if age <= 25.0 && reports.len() >= 2 {
        Confidence::Medium
    } else {
        Confidence::Low
    }
}

/// Compares the signal over the last 30 minutes with the 30-90 minute
/// window. Thin history on either side is `unknown`, not flat.
pub fn trend(reports: &[Report], now: DateTime<Utc>) -> Trend {
    let mut current = Vec::new();
    let mut previous = Vec::new();
    for report in reports {
        let age = age_minutes(report, now);
        if age <= CONSENSUS_WINDOW_MINUTES {
            current.push(report.clone());
        } else if age <= TREND_LOOKBACK_MINUTES {
            previous.push(report.clone());
        }
    }
    if current.len() < TREND_MIN_REPORTS || previous.len() < TREND_MIN_REPORTS {
        return Trend::Unknown;
    }
    let diff = consensus_signal(&current, now) - consensus_signal(&previous, now);
    if diff >= TREND_NOISE_FLOOR {
        Trend::Up
    } else if diff <= -TREND_NOISE_FLOOR {
        Trend::Down
    } else {
        Trend::Flat
    }
}
