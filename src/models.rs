use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct Report {
    pub venue_id: Uuid,
    pub status: i16,
    pub line_outside: bool,
    pub device_id: String,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CrowdLabel {
    Low,
    Medium,
    High,
    Insane,
}

impl CrowdLabel {
    pub fn ordinal(self) -> i16 {
        match self {
            CrowdLabel::Low => 1,
            CrowdLabel::Medium => 2,
            CrowdLabel::High => 3,
            CrowdLabel::Insane => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CrowdLabel::Low => "low",
            CrowdLabel::Medium => "medium",
            CrowdLabel::High => "high",
            CrowdLabel::Insane => "insane",
        }
    }
}

impl fmt::Display for CrowdLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Confidence::Low => "low",
            Confidence::Medium => "medium",
            Confidence::High => "high",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Up,
    Down,
    Flat,
    Unknown,
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Trend::Up => "up",
            Trend::Down => "down",
            Trend::Flat => "flat",
            Trend::Unknown => "unknown",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone)]
pub struct BaselineBucket {
    pub mean_status: f64,
    pub sample_count: i64,
}

#[derive(Debug, Clone)]
pub struct Subscription {
    pub id: Uuid,
    pub venue_id: Uuid,
    pub device_id: String,
    pub threshold: i16,
    pub active: bool,
    pub last_triggered_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CrowdSnapshot {
    pub venue: String,
    pub signal: f64,
    pub label: CrowdLabel,
    pub confidence: Confidence,
    pub trend: Trend,
    pub report_count: usize,
    pub line_outside: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Forecast {
    pub minutes_ahead: i64,
    pub signal: f64,
    pub label: CrowdLabel,
}
