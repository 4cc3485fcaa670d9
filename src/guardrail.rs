use chrono::{DateTime, Utc};
use thiserror::Error;

pub const DEVICE_VENUE_COOLDOWN_MINUTES: f64 = 10.0;
pub const DEVICE_DAILY_CAP: i64 = 20;

#[derive(Debug, Error, PartialEq)]
pub enum SubmitError {
    #[error("status must be 1 (low), 2 (medium), 3 (high), or 4 (insane); got {0}")]
    InvalidStatus(i16),
    #[error("alert threshold must be 1 (low) or 2 (medium or lower); got {0}")]
    InvalidThreshold(i16),
    #[error("no venue named \"{0}\"")]
    UnknownVenue(String),
    #[error("you already reported this venue recently; try again in about {wait} min")]
    Cooldown { wait: i64 },
    #[error("daily report limit of {0} reached for this device")]
    DailyCapReached(i64),
}

impl SubmitError {
    /// Rate-limit rejections are expected traffic, not faults; callers show
    /// the message and move on instead of logging an error.
    pub fn is_rate_limit(&self) -> bool {
        matches!(
            self,
            SubmitError::Cooldown { .. } | SubmitError::DailyCapReached(_)
        )
    }
}

pub fn validate_status(status: i16) -> Result<(), SubmitError> {
    if (1..=4).contains(&status) {
        Ok(())
    } else {
        Err(SubmitError::InvalidStatus(status))
    }
}

pub fn validate_threshold(threshold: i16) -> Result<(), SubmitError> {
    if (1..=2).contains(&threshold) {
        Ok(())
    } else {
        Err(SubmitError::InvalidThreshold(threshold))
    }
}

/// Advisory rate limits keyed on the client-supplied device token. The
/// lookups and the subsequent insert are not atomic as a unit; a tight race
/// letting two submissions through is accepted.
pub fn check_rate_limits(
    last_venue_report_at: Option<DateTime<Utc>>,
    reports_today: i64,
    now: DateTime<Utc>,
) -> Result<(), SubmitError> {
    if let Some(last) = last_venue_report_at {
        let age = (now - last).num_milliseconds() as f64 / 60_000.0;
        if age < DEVICE_VENUE_COOLDOWN_MINUTES {
            let wait = ((DEVICE_VENUE_COOLDOWN_MINUTES - age).ceil() as i64).max(1);
            return Err(SubmitError::Cooldown { wait });
        }
    }
    if reports_today >= DEVICE_DAILY_CAP {
        return Err(SubmitError::DailyCapReached(DEVICE_DAILY_CAP));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn second_report_inside_cooldown_is_rejected_with_wait_hint() {
        let now = Utc::now();
        let last = Some(now - Duration::minutes(9));
        assert_eq!(
            check_rate_limits(last, 0, now),
            Err(SubmitError::Cooldown { wait: 1 })
        );
    }

    #[test]
    fn report_after_cooldown_is_accepted() {
        let now = Utc::now();
        let last = Some(now - Duration::minutes(11));
        assert_eq!(check_rate_limits(last, 0, now), Ok(()));
    }

    #[test]
    fn wait_hint_never_drops_below_one_minute() {
        let now = Utc::now();
        let last = Some(now - Duration::seconds(9 * 60 + 55));
        assert_eq!(
            check_rate_limits(last, 0, now),
            Err(SubmitError::Cooldown { wait: 1 })
        );
    }

    #[test]
    fn fresh_device_has_longer_wait() {
        let now = Utc::now();
        let last = Some(now - Duration::minutes(1));
        assert_eq!(
            check_rate_limits(last, 0, now),
            Err(SubmitError::Cooldown { wait: 9 })
        );
    }

    #[test]
    fn daily_cap_applies_after_cooldown_clears() {
        let now = Utc::now();
        assert_eq!(
            check_rate_limits(None, DEVICE_DAILY_CAP, now),
            Err(SubmitError::DailyCapReached(DEVICE_DAILY_CAP))
        );
        assert_eq!(check_rate_limits(None, DEVICE_DAILY_CAP - 1, now), Ok(()));
    }

    #[test]
    fn status_and_threshold_validation() {
        assert!(validate_status(1).is_ok());
        assert!(validate_status(4).is_ok());
        assert_eq!(validate_status(0), Err(SubmitError::InvalidStatus(0)));
        assert_eq!(validate_status(5), Err(SubmitError::InvalidStatus(5)));
        assert!(validate_threshold(2).is_ok());
        assert_eq!(validate_threshold(3), Err(SubmitError::InvalidThreshold(3)));
    }

    #[test]
    fn rate_limit_classification() {
        assert!(SubmitError::Cooldown { wait: 3 }.is_rate_limit());
        assert!(SubmitError::DailyCapReached(20).is_rate_limit());
        assert!(!SubmitError::InvalidStatus(9).is_rate_limit());
    }

    #[test]
    fn rate_limit_checks_only_produce_rate_limits() {
        let now = Utc::now();
        let cooled = check_rate_limits(Some(now), 0, now).unwrap_err();
        assert!(cooled.is_rate_limit());
        let capped = check_rate_limits(None, DEVICE_DAILY_CAP, now).unwrap_err();
        assert!(capped.is_rate_limit());
    }
}
