use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::models::{CrowdLabel, Report, Subscription};
use crate::score;

pub const ALERT_COOLDOWN_MINUTES: i64 = 60;

/// Delivery channel for fired alerts. Console, SMS, and push all live
/// behind this seam; the evaluator only cares about success or failure.
pub trait Notifier {
    fn notify(
        &self,
        subscription: &Subscription,
        venue_name: &str,
        label: CrowdLabel,
    ) -> anyhow::Result<()>;
}

pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(
        &self,
        subscription: &Subscription,
        venue_name: &str,
        label: CrowdLabel,
    ) -> anyhow::Result<()> {
        println!(
            "[alert] {venue_name} is {label} (device {})",
            subscription.device_id
        );
        Ok(())
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub processed: usize,
    pub triggered: usize,
}

pub fn in_cooldown(subscription: &Subscription, now: DateTime<Utc>) -> bool {
    subscription
        .last_triggered_at
        .map(|at| now - at < Duration::minutes(ALERT_COOLDOWN_MINUTES))
        .unwrap_or(false)
}

/// Threshold 2 fires on medium or lower, threshold 1 only on low.
pub fn should_fire(threshold: i16, label: CrowdLabel) -> bool {
    label.ordinal() <= threshold
}

pub fn group_by_venue(reports: Vec<Report>) -> HashMap<Uuid, Vec<Report>> {
    let mut grouped: HashMap<Uuid, Vec<Report>> = HashMap::new();
    for report in reports {
        grouped.entry(report.venue_id).or_default().push(report);
    }
    grouped
}

/// One evaluation pass over the active subscriptions. Returns the summary
/// plus the `last_triggered_at` updates to persist; the timestamp advances
/// only for confirmed deliveries, so a failed notify is retried on the next
/// run. The stored cooldown is the only guard against overlapping runs.
pub fn evaluate(
    subscriptions: &[Subscription],
    reports_by_venue: &HashMap<Uuid, Vec<Report>>,
    venue_names: &HashMap<Uuid, String>,
    now: DateTime<Utc>,
    notifier: &dyn Notifier,
) -> (RunSummary, Vec<(Uuid, DateTime<Utc>)>) {
    let mut summary = RunSummary::default();
    let mut delivered = Vec::new();

    for subscription in subscriptions {
        if !subscription.active {
            continue;
        }
        summary.processed += 1;
        if in_cooldown(subscription, now) {
            continue;
        }

        let reports = reports_by_venue
            .get(&subscription.venue_id)
            .map(|r| r.as_slice())
            .unwrap_or(&[]);
        let label = score::classify(score::consensus_signal(reports, now));
        if !should_fire(subscription.threshold, label) {
            continue;
        }

        let venue_name = venue_names
            .get(&subscription.venue_id)
            .map(|name| name.as_str())
            .unwrap_or("unknown venue");
        match notifier.notify(subscription, venue_name, label) {
            Ok(()) => {
                delivered.push((subscription.id, now));
                summary.triggered += 1;
            }
            Err(err) => {
                tracing::warn!(
                    subscription_id = %subscription.id,
                    venue = venue_name,
                    error = %err,
                    "notify failed, subscription stays eligible for the next run"
                );
            }
        }
    }

    (summary, delivered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use std::cell::RefCell;

    fn subscription(
        venue_id: Uuid,
        threshold: i16,
        last_triggered_minutes_ago: Option<i64>,
        now: DateTime<Utc>,
    ) -> Subscription {
        Subscription {
            id: Uuid::new_v4(),
            venue_id,
            device_id: "device-1".to_string(),
            threshold,
            active: true,
            last_triggered_at: last_triggered_minutes_ago
                .map(|minutes| now - Duration::minutes(minutes)),
        }
    }

    fn low_reports(venue_id: Uuid, now: DateTime<Utc>) -> Vec<Report> {
        (1..=3)
            .map(|minutes| Report {
                venue_id,
                status: 1,
                line_outside: false,
                device_id: format!("device-{minutes}"),
                submitted_at: now - Duration::minutes(minutes),
            })
            .collect()
    }

    struct RecordingNotifier {
        calls: RefCell<Vec<String>>,
        fail_for: Option<String>,
    }

    impl RecordingNotifier {
        fn new() -> Self {
            Self {
                calls: RefCell::new(Vec::new()),
                fail_for: None,
            }
        }

        fn failing_for(venue_name: &str) -> Self {
            Self {
                calls: RefCell::new(Vec::new()),
                fail_for: Some(venue_name.to_string()),
            }
        }
    }

    impl Notifier for RecordingNotifier {
        fn notify(
            &self,
            _subscription: &Subscription,
            venue_name: &str,
            label: CrowdLabel,
        ) -> anyhow::Result<()> {
            if self.fail_for.as_deref() == Some(venue_name) {
                bail!("delivery channel down");
            }
            self.calls.borrow_mut().push(format!("{venue_name}:{label}"));
            Ok(())
        }
    }

    #[test]
    fn threshold_semantics() {
        assert!(should_fire(2, CrowdLabel::Low));
        assert!(should_fire(2, CrowdLabel::Medium));
        assert!(!should_fire(2, CrowdLabel::High));
        assert!(should_fire(1, CrowdLabel::Low));
        assert!(!should_fire(1, CrowdLabel::Medium));
    }

    #[test]
    fn cooldown_gates_at_sixty_minutes() {
        let now = Utc::now();
        let venue = Uuid::new_v4();
        assert!(in_cooldown(&subscription(venue, 2, Some(59), now), now));
        assert!(!in_cooldown(&subscription(venue, 2, Some(61), now), now));
        assert!(!in_cooldown(&subscription(venue, 2, None, now), now));
    }

    #[test]
    fn recently_triggered_subscription_does_not_fire() {
        let now = Utc::now();
        let venue = Uuid::new_v4();
        let subs = vec![subscription(venue, 2, Some(59), now)];
        let reports = group_by_venue(low_reports(venue, now));
        let names = HashMap::from([(venue, "The Basement".to_string())]);
        let notifier = RecordingNotifier::new();

        let (summary, delivered) = evaluate(&subs, &reports, &names, now, &notifier);
        assert_eq!(summary, RunSummary { processed: 1, triggered: 0 });
        assert!(delivered.is_empty());
        assert!(notifier.calls.borrow().is_empty());
    }

    #[test]
    fn expired_cooldown_fires_and_advances_the_timestamp() {
        let now = Utc::now();
        let venue = Uuid::new_v4();
        let subs = vec![subscription(venue, 2, Some(61), now)];
        let reports = group_by_venue(low_reports(venue, now));
        let names = HashMap::from([(venue, "The Basement".to_string())]);
        let notifier = RecordingNotifier::new();

        let (summary, delivered) = evaluate(&subs, &reports, &names, now, &notifier);
        assert_eq!(summary, RunSummary { processed: 1, triggered: 1 });
        assert_eq!(delivered, vec![(subs[0].id, now)]);
        assert_eq!(notifier.calls.borrow().as_slice(), ["The Basement:low"]);
    }

    #[test]
    fn strict_threshold_waits_for_low() {
        let now = Utc::now();
        let venue = Uuid::new_v4();
        let subs = vec![subscription(venue, 1, None, now)];
        let medium = vec![Report {
            venue_id: venue,
            status: 2,
            line_outside: false,
            device_id: "device-9".to_string(),
            submitted_at: now - Duration::minutes(2),
        }];
        let reports = group_by_venue(medium);
        let names = HashMap::from([(venue, "The Basement".to_string())]);
        let notifier = RecordingNotifier::new();

        let (summary, _) = evaluate(&subs, &reports, &names, now, &notifier);
        assert_eq!(summary, RunSummary { processed: 1, triggered: 0 });

        let reports = group_by_venue(low_reports(venue, now));
        let (summary, _) = evaluate(&subs, &reports, &names, now, &notifier);
        assert_eq!(summary, RunSummary { processed: 1, triggered: 1 });
    }

    #[test]
    fn failed_delivery_keeps_cooldown_unset_and_batch_moving() {
        let now = Utc::now();
        let flaky_venue = Uuid::new_v4();
        let healthy_venue = Uuid::new_v4();
        let subs = vec![
            subscription(flaky_venue, 2, None, now),
            subscription(healthy_venue, 2, None, now),
        ];
        let mut reports = group_by_venue(low_reports(flaky_venue, now));
        reports.extend(group_by_venue(low_reports(healthy_venue, now)));
        let names = HashMap::from([
            (flaky_venue, "Flaky Hall".to_string()),
            (healthy_venue, "Steady House".to_string()),
        ]);
        let notifier = RecordingNotifier::failing_for("Flaky Hall");

        let (summary, delivered) = evaluate(&subs, &reports, &names, now, &notifier);
        assert_eq!(summary, RunSummary { processed: 2, triggered: 1 });
        assert_eq!(delivered, vec![(subs[1].id, now)]);
        assert_eq!(notifier.calls.borrow().as_slice(), ["Steady House:low"]);
    }

    #[test]
    fn inactive_subscriptions_are_skipped_entirely() {
        let now = Utc::now();
        let venue = Uuid::new_v4();
        let mut sub = subscription(venue, 2, None, now);
        sub.active = false;
        let reports = group_by_venue(low_reports(venue, now));
        let names = HashMap::from([(venue, "The Basement".to_string())]);
        let notifier = RecordingNotifier::new();

        let (summary, delivered) = evaluate(&[sub], &reports, &names, now, &notifier);
        assert_eq!(summary, RunSummary { processed: 0, triggered: 0 });
        assert!(delivered.is_empty());
    }
}
