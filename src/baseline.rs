use chrono::{DateTime, Datelike, Duration, NaiveTime, Timelike, Utc};

use crate::models::Forecast;
use crate::score;

/// Single-region deployment pinned to one civil calendar (US Eastern
/// standard time). Multi-region venues would carry their own offset.
pub const LOCAL_UTC_OFFSET_HOURS: i32 = -5;

pub const BASELINE_SEED_MEAN: f64 = 2.0;
pub const BLEND_BASELINE_WEIGHT: f64 = 0.55;
pub const BLEND_CURRENT_WEIGHT: f64 = 0.45;
pub const FORECAST_HORIZONS_MINUTES: [i64; 3] = [30, 60, 90];

/// Resolves an instant to the (day-of-week, hour) baseline key, with
/// Sunday as day 0.
pub fn bucket_for(ts: DateTime<Utc>, offset_hours: i32) -> (i16, i16) {
    let local = ts + Duration::hours(offset_hours as i64);
    (
        local.weekday().num_days_from_sunday() as i16,
        local.hour() as i16,
    )
}

/// The UTC instant of the most recent local midnight. Anchors the
/// per-device daily submission cap.
pub fn local_midnight(now: DateTime<Utc>, offset_hours: i32) -> DateTime<Utc> {
    let local = now + Duration::hours(offset_hours as i64);
    let since_midnight = local.time().signed_duration_since(NaiveTime::MIN);
    now - since_midnight
}

/// Folds one status sample into a bucket's running mean. An unseen bucket
/// starts at the neutral seed with zero samples, so its first fold lands
/// exactly on the sample value.
pub fn advance_mean(mean: f64, count: i64, status: i16) -> (f64, i64) {
    let next = count + 1;
    ((mean * count as f64 + status as f64) / next as f64, next)
}

/// Blends the historical bucket mean with the live signal, leaning
/// slightly on history. With no baseline the live signal stands alone.
pub fn blended_signal(current: f64, baseline_mean: Option<f64>) -> f64 {
    match baseline_mean {
        Some(mean) => BLEND_BASELINE_WEIGHT * mean + BLEND_CURRENT_WEIGHT * current,
        None => current,
    }
}

pub fn forecast_entry(minutes_ahead: i64, current: f64, baseline_mean: Option<f64>) -> Forecast {
    let signal = blended_signal(current, baseline_mean);
    Forecast {
        minutes_ahead,
        signal,
        label: score::classify(signal),
    }
}
