use std::collections::HashMap;

use anyhow::Context;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::baseline;
use crate::guardrail;
use crate::models::{BaselineBucket, Report, Subscription};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let venues = vec![
        (
            Uuid::parse_str("8c6c6a2e-4f4b-4a0e-9f2d-1c9a51d6b7e4")?,
            "The Basement",
        ),
        (
            Uuid::parse_str("2b9d3e71-6a0f-4d0c-8b3a-f2c4f0f7a9d1")?,
            "Harbor Lights",
        ),
        (
            Uuid::parse_str("e4f82c55-90d1-4b7c-a3e6-7d2b8a915c03")?,
            "Midnight Diner",
        ),
    ];

    for (id, name) in &venues {
        sqlx::query(
            r#"
            INSERT INTO crowd_pulse.venues (id, name)
            VALUES ($1, $2)
            ON CONFLICT (name) DO NOTHING
            "#,
        )
        .bind(*id)
        .bind(*name)
        .execute(pool)
        .await?;
    }

    let now = Utc::now();
    let reports = vec![
        (venues[0].0, 1, false, "seed-device-a", 4i64),
        (venues[0].0, 1, false, "seed-device-b", 9),
        (venues[0].0, 2, false, "seed-device-c", 14),
        (venues[1].0, 3, true, "seed-device-a", 6),
        (venues[1].0, 4, true, "seed-device-d", 12),
        (venues[2].0, 2, false, "seed-device-e", 20),
    ];

    for (venue_id, status, line_outside, device_id, minutes_ago) in reports {
        let report = Report {
            venue_id,
            status,
            line_outside,
            device_id: device_id.to_string(),
            submitted_at: now - chrono::Duration::minutes(minutes_ago),
        };
        insert_report(pool, &report).await?;
        let (dow, hour) = baseline::bucket_for(report.submitted_at, baseline::LOCAL_UTC_OFFSET_HOURS);
        record_baseline_sample(pool, venue_id, dow, hour, status).await?;
    }

    Ok(())
}

pub async fn venue_id_by_name(pool: &PgPool, name: &str) -> anyhow::Result<Option<Uuid>> {
    let row = sqlx::query("SELECT id FROM crowd_pulse.venues WHERE name = $1")
        .bind(name)
        .fetch_optional(pool)
        .await
        .context("failed to look up venue")?;
    Ok(row.map(|r| r.get("id")))
}

pub async fn upsert_venue(pool: &PgPool, name: &str) -> anyhow::Result<Uuid> {
    let row = sqlx::query(
        r#"
        INSERT INTO crowd_pulse.venues (id, name)
        VALUES ($1, $2)
        ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(name)
    .fetch_one(pool)
    .await
    .context("failed to upsert venue")?;
    Ok(row.get("id"))
}

pub async fn venue_names(
    pool: &PgPool,
    venue_ids: &[Uuid],
) -> anyhow::Result<HashMap<Uuid, String>> {
    let rows = sqlx::query("SELECT id, name FROM crowd_pulse.venues WHERE id = ANY($1)")
        .bind(venue_ids)
        .fetch_all(pool)
        .await
        .context("failed to load venue names")?;
    Ok(rows
        .into_iter()
        .map(|row| (row.get("id"), row.get("name")))
        .collect())
}

pub async fn insert_report(pool: &PgPool, report: &Report) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO crowd_pulse.reports
        (id, venue_id, status, line_outside, device_id, submitted_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(report.venue_id)
    .bind(report.status)
    .bind(report.line_outside)
    .bind(&report.device_id)
    .bind(report.submitted_at)
    .execute(pool)
    .await
    .context("failed to insert report")?;
    Ok(())
}

/// Bulk fetch across venues, newest first. Every read path works from this
/// one query shape so the alert run stays at a constant number of queries.
pub async fn fetch_reports(
    pool: &PgPool,
    venue_ids: &[Uuid],
    since: DateTime<Utc>,
) -> anyhow::Result<Vec<Report>> {
    let rows = sqlx::query(
        r#"
        SELECT venue_id, status, line_outside, device_id, submitted_at
        FROM crowd_pulse.reports
        WHERE venue_id = ANY($1) AND submitted_at >= $2
        ORDER BY submitted_at DESC
        "#,
    )
    .bind(venue_ids)
    .bind(since)
    .fetch_all(pool)
    .await
    .context("failed to fetch reports")?;

    Ok(rows
        .into_iter()
        .map(|row| Report {
            venue_id: row.get("venue_id"),
            status: row.get("status"),
            line_outside: row.get("line_outside"),
            device_id: row.get("device_id"),
            submitted_at: row.get("submitted_at"),
        })
        .collect())
}

pub async fn last_device_report_at(
    pool: &PgPool,
    device_id: &str,
    venue_id: Uuid,
) -> anyhow::Result<Option<DateTime<Utc>>> {
    let row = sqlx::query(
        r#"
        SELECT MAX(submitted_at) AS last_at
        FROM crowd_pulse.reports
        WHERE device_id = $1 AND venue_id = $2
        "#,
    )
    .bind(device_id)
    .bind(venue_id)
    .fetch_one(pool)
    .await
    .context("failed to check device cooldown")?;
    Ok(row.get("last_at"))
}

pub async fn device_report_count_since(
    pool: &PgPool,
    device_id: &str,
    since: DateTime<Utc>,
) -> anyhow::Result<i64> {
    let row = sqlx::query(
        r#"
        SELECT COUNT(*) AS report_count
        FROM crowd_pulse.reports
        WHERE device_id = $1 AND submitted_at >= $2
        "#,
    )
    .bind(device_id)
    .bind(since)
    .fetch_one(pool)
    .await
    .context("failed to count device reports")?;
    Ok(row.get("report_count"))
}

/// Folds one status sample into the (venue, dow, hour) bucket. The write is
/// conditional on the sample count observed at read time, so a concurrent
/// writer advancing the same bucket just forces a reread instead of losing
/// an update.
pub async fn record_baseline_sample(
    pool: &PgPool,
    venue_id: Uuid,
    dow: i16,
    hour: i16,
    status: i16,
) -> anyhow::Result<()> {
    loop {
        let bucket = get_baseline(pool, venue_id, dow, hour)
            .await?
            .unwrap_or(BaselineBucket {
                mean_status: baseline::BASELINE_SEED_MEAN,
                sample_count: 0,
            });
        let (mean, count) = baseline::advance_mean(bucket.mean_status, bucket.sample_count, status);

        let result = sqlx::query(
            r#"
            INSERT INTO crowd_pulse.baselines (venue_id, dow, hour, mean_status, sample_count)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (venue_id, dow, hour) DO UPDATE
            SET mean_status = EXCLUDED.mean_status,
                sample_count = EXCLUDED.sample_count
            WHERE baselines.sample_count = $6
            "#,
        )
        .bind(venue_id)
        .bind(dow)
        .bind(hour)
        .bind(mean)
        .bind(count)
        .bind(bucket.sample_count)
        .execute(pool)
        .await
        .context("failed to update baseline bucket")?;

        if result.rows_affected() > 0 {
            return Ok(());
        }
    }
}

pub async fn get_baseline(
    pool: &PgPool,
    venue_id: Uuid,
    dow: i16,
    hour: i16,
) -> anyhow::Result<Option<BaselineBucket>> {
    let row = sqlx::query(
        r#"
        SELECT mean_status, sample_count
        FROM crowd_pulse.baselines
        WHERE venue_id = $1 AND dow = $2 AND hour = $3
        "#,
    )
    .bind(venue_id)
    .bind(dow)
    .bind(hour)
    .fetch_optional(pool)
    .await
    .context("failed to read baseline bucket")?;
    Ok(row.map(|r| BaselineBucket {
        mean_status: r.get("mean_status"),
        sample_count: r.get("sample_count"),
    }))
}

/// Subscribe is an upsert on the (venue, device, threshold) triple; hitting
/// an existing row just reactivates it.
pub async fn upsert_subscription(
    pool: &PgPool,
    venue_id: Uuid,
    device_id: &str,
    threshold: i16,
) -> anyhow::Result<Uuid> {
    let row = sqlx::query(
        r#"
        INSERT INTO crowd_pulse.subscriptions (id, venue_id, device_id, threshold, active)
        VALUES ($1, $2, $3, $4, TRUE)
        ON CONFLICT (venue_id, device_id, threshold) DO UPDATE SET active = TRUE
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(venue_id)
    .bind(device_id)
    .bind(threshold)
    .fetch_one(pool)
    .await
    .context("failed to upsert subscription")?;
    Ok(row.get("id"))
}

pub async fn deactivate_subscription(
    pool: &PgPool,
    venue_id: Uuid,
    device_id: &str,
    threshold: i16,
) -> anyhow::Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE crowd_pulse.subscriptions
        SET active = FALSE
        WHERE venue_id = $1 AND device_id = $2 AND threshold = $3
        "#,
    )
    .bind(venue_id)
    .bind(device_id)
    .bind(threshold)
    .execute(pool)
    .await
    .context("failed to deactivate subscription")?;
    Ok(result.rows_affected() > 0)
}

pub async fn list_active_subscriptions(pool: &PgPool) -> anyhow::Result<Vec<Subscription>> {
    let rows = sqlx::query(
        r#"
        SELECT id, venue_id, device_id, threshold, active, last_triggered_at
        FROM crowd_pulse.subscriptions
        WHERE active = TRUE
        "#,
    )
    .fetch_all(pool)
    .await
    .context("failed to list subscriptions")?;

    Ok(rows
        .into_iter()
        .map(|row| Subscription {
            id: row.get("id"),
            venue_id: row.get("venue_id"),
            device_id: row.get("device_id"),
            threshold: row.get("threshold"),
            active: row.get("active"),
            last_triggered_at: row.get("last_triggered_at"),
        })
        .collect())
}

pub async fn set_last_triggered(
    pool: &PgPool,
    subscription_id: Uuid,
    at: DateTime<Utc>,
) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        UPDATE crowd_pulse.subscriptions
        SET last_triggered_at = $2
        WHERE id = $1
        "#,
    )
    .bind(subscription_id)
    .bind(at)
    .execute(pool)
    .await
    .context("failed to record trigger time")?;
    Ok(())
}

/// Backfill import. Each row lands as a report and is folded into the
/// matching baseline bucket so imported history seeds the predictor.
pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        venue: String,
        status: i16,
        line_outside: bool,
        device_id: String,
        submitted_at: DateTime<Utc>,
    }

    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut inserted = 0usize;

    for result in reader.deserialize::<CsvRow>() {
        let row = result?;
        guardrail::validate_status(row.status)?;
        let venue_id = upsert_venue(pool, &row.venue).await?;
        let report = Report {
            venue_id,
            status: row.status,
            line_outside: row.line_outside,
            device_id: row.device_id,
            submitted_at: row.submitted_at,
        };
        insert_report(pool, &report).await?;
        let (dow, hour) =
            baseline::bucket_for(report.submitted_at, baseline::LOCAL_UTC_OFFSET_HOURS);
        record_baseline_sample(pool, venue_id, dow, hour, report.status).await?;
        inserted += 1;
    }

    Ok(inserted)
}
