//! MentorSub Background Worker
//!
//! Handles scheduled jobs:
//! - Stripe reconciliation sweep (hourly) — repairs drift from lost webhooks
//! - Expiry warning sweep (daily at 08:00 UTC)
//! - Webhook audit cleanup (daily at 03:00 UTC)
//! - Health check heartbeat (every 5 minutes)
//!
//! Jobs never overlap themselves: each holds a run lock and a tick that
//! fires while the previous run is still executing is skipped.

mod expiry;
mod reconcile;

use std::sync::Arc;
use std::time::Duration;

use mentorsub_billing::StripeClient;
use sqlx::PgPool;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

use crate::expiry::ExpiryNotifier;
use crate::reconcile::Reconciler;

/// Create a database connection pool
async fn create_db_pool() -> anyhow::Result<PgPool> {
    #[allow(clippy::expect_used)] // Fail-fast on startup if required config is missing
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = mentorsub_shared::create_pool(&database_url).await?;

    info!("Database pool created");
    Ok(pool)
}

/// Delete old processed webhook audit rows.
async fn cleanup_old_webhook_events(pool: &PgPool, retention_days: i32) {
    let result = sqlx::query(
        r#"
        DELETE FROM stripe_webhook_events
        WHERE created_at < NOW() - make_interval(days => $1)
          AND processing_result IN ('success', 'error')
        "#,
    )
    .bind(retention_days)
    .execute(pool)
    .await;

    match result {
        Ok(rows) => {
            if rows.rows_affected() > 0 {
                info!(
                    deleted = rows.rows_affected(),
                    retention_days = retention_days,
                    "Cleaned up old webhook audit rows"
                );
            }
        }
        Err(e) => {
            error!(error = %e, "Failed to clean up webhook audit rows");
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    info!("Starting MentorSub Worker");

    let pool = create_db_pool().await?;

    let stripe = match StripeClient::from_env() {
        Ok(client) => client,
        Err(e) => {
            // Without Stripe there is nothing to reconcile against; run in
            // minimal mode so deploys without billing config stay up.
            warn!(error = %e, "Stripe not configured - running in minimal mode");
            loop {
                tokio::time::sleep(Duration::from_secs(60)).await;
                info!("Worker heartbeat (minimal mode)");
            }
        }
    };

    let reconciler = Reconciler::new(stripe.clone(), pool.clone());
    let expiry_notifier = ExpiryNotifier::new(
        stripe,
        pool.clone(),
        ExpiryNotifier::warning_days_from_env(),
    );

    let scheduler = JobScheduler::new().await?;

    // Job 1: Stripe reconciliation sweep (hourly)
    // A new run must not start while the previous one is still executing.
    let reconcile_lock = Arc::new(Mutex::new(()));
    let reconcile_job = reconciler.clone();
    scheduler
        .add(Job::new_async("0 0 * * * *", move |_uuid, _l| {
            let reconciler = reconcile_job.clone();
            let lock = reconcile_lock.clone();
            Box::pin(async move {
                let Ok(_guard) = lock.try_lock() else {
                    warn!("Previous reconciliation run still active - skipping tick");
                    return;
                };
                info!("Running Stripe reconciliation sweep");
                reconciler.run().await;
            })
        })?)
        .await?;
    info!("Scheduled: Stripe reconciliation sweep (hourly)");

    // Job 2: Expiry warning sweep (daily at 08:00 UTC)
    let expiry_lock = Arc::new(Mutex::new(()));
    let expiry_job = expiry_notifier.clone();
    scheduler
        .add(Job::new_async("0 0 8 * * *", move |_uuid, _l| {
            let notifier = expiry_job.clone();
            let lock = expiry_lock.clone();
            Box::pin(async move {
                let Ok(_guard) = lock.try_lock() else {
                    warn!("Previous expiry sweep still active - skipping tick");
                    return;
                };
                info!("Running expiry warning sweep");
                notifier.run().await;
            })
        })?)
        .await?;
    info!("Scheduled: Expiry warning sweep (daily at 08:00 UTC)");

    // Job 3: Webhook audit cleanup (daily at 03:00 UTC, keep 30 days)
    let cleanup_pool = pool.clone();
    scheduler
        .add(Job::new_async("0 0 3 * * *", move |_uuid, _l| {
            let pool = cleanup_pool.clone();
            Box::pin(async move {
                info!("Running webhook audit cleanup");
                cleanup_old_webhook_events(&pool, 30).await;
            })
        })?)
        .await?;
    info!("Scheduled: Webhook audit cleanup (daily at 03:00 UTC)");

    // Job 4: Health check heartbeat (every 5 minutes)
    scheduler
        .add(Job::new_async("0 */5 * * * *", |_uuid, _l| {
            Box::pin(async move {
                info!("Worker heartbeat - all systems operational");
            })
        })?)
        .await?;
    info!("Scheduled: Health check heartbeat (every 5 minutes)");

    info!("Starting job scheduler");
    scheduler.start().await?;

    info!("MentorSub Worker started successfully with 4 scheduled jobs");

    // Keep the main task running; the scheduler runs jobs in background
    // tasks.
    loop {
        tokio::time::sleep(Duration::from_secs(3600)).await;
    }
}
