use std::path::PathBuf;

use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

mod alerts;
mod baseline;
mod db;
mod guardrail;
mod models;
mod score;

use guardrail::SubmitError;
use models::{CrowdSnapshot, Forecast};

#[derive(Parser)]
#[command(name = "crowdpulse")]
#[command(about = "Live crowd levels, forecasts, and alerts for venues", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Backfill historical reports from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Submit a crowd report for a venue
    Submit {
        #[arg(long)]
        venue: String,
        /// Crowd status: 1 low, 2 medium, 3 high, 4 insane
        #[arg(long)]
        status: i16,
        #[arg(long, default_value_t = false)]
        line_outside: bool,
        #[arg(long)]
        device: String,
    },
    /// Show the current crowd estimate for a venue
    Status {
        #[arg(long)]
        venue: String,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Project the crowd level forward from historical patterns
    Forecast {
        #[arg(long)]
        venue: String,
    },
    /// Subscribe a device to crowd-level alerts for a venue
    Subscribe {
        #[arg(long)]
        venue: String,
        #[arg(long)]
        device: String,
        /// 1 fires only on low, 2 fires on medium or lower
        #[arg(long, default_value_t = 2)]
        threshold: i16,
    },
    /// Deactivate an alert subscription
    Unsubscribe {
        #[arg(long)]
        venue: String,
        #[arg(long)]
        device: String,
        #[arg(long, default_value_t = 2)]
        threshold: i16,
    },
    /// Evaluate all active subscriptions and send due alerts
    RunAlerts,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a production Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { csv } => {
            let inserted = db::import_csv(&pool, &csv).await?;
            println!("Imported {inserted} reports from {}.", csv.display());
        }
        Commands::Submit {
            venue,
            status,
            line_outside,
            device,
        } => {
            submit(&pool, &venue, status, line_outside, &device).await?;
        }
        Commands::Status { venue, json } => {
            let snapshot = snapshot(&pool, &venue).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            } else {
                print_snapshot(&snapshot);
            }
        }
        Commands::Forecast { venue } => {
            let forecasts = forecast(&pool, &venue).await?;
            println!("Forecast for {venue}:");
            for entry in forecasts {
                println!(
                    "- in {} min: {} (signal {:.2})",
                    entry.minutes_ahead, entry.label, entry.signal
                );
            }
        }
        Commands::Subscribe {
            venue,
            device,
            threshold,
        } => {
            guardrail::validate_threshold(threshold)?;
            let venue_id = resolve_venue(&pool, &venue).await?;
            db::upsert_subscription(&pool, venue_id, &device, threshold).await?;
            println!("Subscribed {device} to {venue} at threshold {threshold}.");
        }
        Commands::Unsubscribe {
            venue,
            device,
            threshold,
        } => {
            guardrail::validate_threshold(threshold)?;
            let venue_id = resolve_venue(&pool, &venue).await?;
            if db::deactivate_subscription(&pool, venue_id, &device, threshold).await? {
                println!("Unsubscribed {device} from {venue}.");
            } else {
                println!("No matching subscription for {device} at {venue}.");
            }
        }
        Commands::RunAlerts => {
            let summary = run_alerts(&pool).await?;
            println!(
                "Processed {} subscriptions, triggered {}.",
                summary.processed, summary.triggered
            );
        }
    }

    Ok(())
}

async fn resolve_venue(pool: &PgPool, name: &str) -> anyhow::Result<Uuid> {
    db::venue_id_by_name(pool, name)
        .await?
        .ok_or_else(|| SubmitError::UnknownVenue(name.to_string()).into())
}

fn report_window_start(now: DateTime<Utc>) -> DateTime<Utc> {
    now - Duration::minutes(score::REPORT_WINDOW_MINUTES)
}

async fn submit(
    pool: &PgPool,
    venue: &str,
    status: i16,
    line_outside: bool,
    device: &str,
) -> anyhow::Result<()> {
    guardrail::validate_status(status)?;
    let venue_id = resolve_venue(pool, venue).await?;
    let now = Utc::now();

    let last_at = db::last_device_report_at(pool, device, venue_id).await?;
    let midnight = baseline::local_midnight(now, baseline::LOCAL_UTC_OFFSET_HOURS);
    let today_count = db::device_report_count_since(pool, device, midnight).await?;

    // The rate-limit checks only ever reject with a rate limit; the hint
    // goes to the caller and is not an error.
    if let Err(err) = guardrail::check_rate_limits(last_at, today_count, now) {
        debug_assert!(err.is_rate_limit());
        println!("{err}");
        return Ok(());
    }

    let report = models::Report {
        venue_id,
        status,
        line_outside,
        device_id: device.to_string(),
        submitted_at: now,
    };
    db::insert_report(pool, &report).await?;

    let (dow, hour) = baseline::bucket_for(now, baseline::LOCAL_UTC_OFFSET_HOURS);
    db::record_baseline_sample(pool, venue_id, dow, hour, status).await?;

    println!("Report accepted for {venue}.");
    Ok(())
}

async fn snapshot(pool: &PgPool, venue: &str) -> anyhow::Result<CrowdSnapshot> {
    let venue_id = resolve_venue(pool, venue).await?;
    let now = Utc::now();
    let reports = db::fetch_reports(pool, &[venue_id], report_window_start(now)).await?;

    let signal = score::consensus_signal(&reports, now);
    let line_outside = reports.iter().any(|report| {
        report.line_outside
            && now - report.submitted_at <= Duration::minutes(score::CONSENSUS_WINDOW_MINUTES as i64)
    });

    Ok(CrowdSnapshot {
        venue: venue.to_string(),
        signal,
        label: score::classify(signal),
        confidence: score::confidence(&reports, now),
        trend: score::trend(&reports, now),
        report_count: reports.len(),
        line_outside,
    })
}

fn print_snapshot(snapshot: &CrowdSnapshot) {
    println!(
        "{}: {} (signal {:.2}, confidence {}, trend {})",
        snapshot.venue, snapshot.label, snapshot.signal, snapshot.confidence, snapshot.trend
    );
    println!("Based on {} reports in the last 3 hours.", snapshot.report_count);
    if snapshot.line_outside {
        println!("A line outside was reported in the last 30 minutes.");
    }
}

async fn forecast(pool: &PgPool, venue: &str) -> anyhow::Result<Vec<Forecast>> {
    let venue_id = resolve_venue(pool, venue).await?;
    let now = Utc::now();
    let reports = db::fetch_reports(pool, &[venue_id], report_window_start(now)).await?;
    let current = score::consensus_signal(&reports, now);

    let mut forecasts = Vec::with_capacity(baseline::FORECAST_HORIZONS_MINUTES.len());
    for minutes_ahead in baseline::FORECAST_HORIZONS_MINUTES {
        let (dow, hour) = baseline::bucket_for(
            now + Duration::minutes(minutes_ahead),
            baseline::LOCAL_UTC_OFFSET_HOURS,
        );
        // A baseline read failure degrades to the live signal instead of
        // failing the whole forecast.
        let baseline_mean = match db::get_baseline(pool, venue_id, dow, hour).await {
            Ok(bucket) => bucket.map(|b| b.mean_status),
            Err(err) => {
                tracing::warn!(venue = venue, error = %err, "baseline lookup failed");
                None
            }
        };
        forecasts.push(baseline::forecast_entry(minutes_ahead, current, baseline_mean));
    }
    Ok(forecasts)
}

async fn run_alerts(pool: &PgPool) -> anyhow::Result<alerts::RunSummary> {
    let now = Utc::now();
    let subscriptions = db::list_active_subscriptions(pool).await?;
    if subscriptions.is_empty() {
        return Ok(alerts::RunSummary::default());
    }

    let mut venue_ids: Vec<Uuid> = subscriptions.iter().map(|s| s.venue_id).collect();
    venue_ids.sort_unstable();
    venue_ids.dedup();

    let venue_names = db::venue_names(pool, &venue_ids).await?;
    let reports = db::fetch_reports(pool, &venue_ids, report_window_start(now)).await?;
    let reports_by_venue = alerts::group_by_venue(reports);

    let notifier = alerts::ConsoleNotifier;
    let (summary, delivered) = alerts::evaluate(
        &subscriptions,
        &reports_by_venue,
        &venue_names,
        now,
        &notifier,
    );

    for (subscription_id, at) in delivered {
        db::set_last_triggered(pool, subscription_id, at).await?;
    }

    Ok(summary)
}
