//! Expiry warning sweep
//!
//! Runs daily. For each configured threshold (days before expiry) it
//! selects the active cycles whose period ends inside the one-day window
//! `[now + threshold, now + threshold + 1 day)` and sends the mentor a
//! renewal reminder. The `sent_notifications` UNIQUE key guarantees at
//! most one reminder per (cycle, threshold), even across overlapping or
//! retried runs.

use mentorsub_billing::{
    Ledger, NotificationLog, Notifier, StripeClient, NOTIFICATION_TYPE_EXPIRY,
};
use sqlx::PgPool;
use time::{Duration, OffsetDateTime};
use tracing::{error, info};

/// Default reminder thresholds in days before period end.
pub const DEFAULT_WARNING_DAYS: [i32; 3] = [7, 3, 1];

/// Totals for one sweep run.
#[derive(Debug, Default, Clone)]
pub struct ExpirySummary {
    pub candidates: usize,
    pub sent: usize,
    pub already_sent: usize,
    pub failed: usize,
}

/// Daily expiry reminder sweep.
#[derive(Clone)]
pub struct ExpiryNotifier {
    ledger: Ledger,
    notifier: Notifier,
    log: NotificationLog,
    warning_days: Vec<i32>,
}

impl ExpiryNotifier {
    pub fn new(stripe: StripeClient, pool: PgPool, warning_days: Vec<i32>) -> Self {
        let ledger = Ledger::new(stripe, pool.clone());
        let notifier = Notifier::from_env();
        let log = NotificationLog::new(pool);
        Self {
            ledger,
            notifier,
            log,
            warning_days,
        }
    }

    /// Thresholds from the `EXPIRY_WARNING_DAYS` env var (comma-separated),
    /// falling back to 7/3/1.
    pub fn warning_days_from_env() -> Vec<i32> {
        std::env::var("EXPIRY_WARNING_DAYS")
            .ok()
            .map(|raw| {
                raw.split(',')
                    .filter_map(|s| s.trim().parse().ok())
                    .collect::<Vec<i32>>()
            })
            .filter(|days| !days.is_empty())
            .unwrap_or_else(|| DEFAULT_WARNING_DAYS.to_vec())
    }

    /// Sweep all thresholds once.
    pub async fn run(&self) -> ExpirySummary {
        let mut summary = ExpirySummary::default();
        let now = OffsetDateTime::now_utc();

        for &days in &self.warning_days {
            let (window_start, window_end) = warning_window(now, days);

            let cycles = match self
                .ledger
                .active_cycles_ending_in(window_start, window_end)
                .await
            {
                Ok(cycles) => cycles,
                Err(e) => {
                    error!(days_before = days, error = %e, "Failed to load expiring cycles");
                    continue;
                }
            };

            summary.candidates += cycles.len();

            for cycle in cycles {
                match self.remind(cycle.id, cycle.mentor_id, days).await {
                    Ok(true) => summary.sent += 1,
                    Ok(false) => summary.already_sent += 1,
                    Err(e) => {
                        error!(
                            cycle_id = %cycle.id,
                            days_before = days,
                            error = %e,
                            "Failed to send expiry reminder"
                        );
                        summary.failed += 1;
                    }
                }
            }
        }

        info!(
            candidates = summary.candidates,
            sent = summary.sent,
            already_sent = summary.already_sent,
            failed = summary.failed,
            "Expiry warning sweep complete"
        );

        summary
    }

    /// Send one reminder unless the (cycle, threshold) pair was already
    /// served. Delivery failures are not recorded, so the next run
    /// retries them.
    async fn remind(
        &self,
        cycle_id: uuid::Uuid,
        mentor_id: uuid::Uuid,
        days_before: i32,
    ) -> mentorsub_billing::BillingResult<bool> {
        if self
            .log
            .already_sent(cycle_id, NOTIFICATION_TYPE_EXPIRY, days_before)
            .await?
        {
            return Ok(false);
        }

        let delivered = self
            .notifier
            .send_expiry_warning(mentor_id, days_before)
            .await?;

        if !delivered {
            return Err(mentorsub_billing::BillingError::NotificationFailed(format!(
                "expiry reminder for cycle {cycle_id}"
            )));
        }

        self.log
            .record_sent(cycle_id, NOTIFICATION_TYPE_EXPIRY, days_before)
            .await?;

        Ok(true)
    }
}

/// The one-day window `[now + days, now + days + 1 day)`.
fn warning_window(now: OffsetDateTime, days_before: i32) -> (OffsetDateTime, OffsetDateTime) {
    let start = now + Duration::days(days_before as i64);
    (start, start + Duration::days(1))
}
