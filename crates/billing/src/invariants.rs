//! Billing Invariants Module
//!
//! Provides runnable consistency checks for the subscription ledger.
//! These invariants can be run after any mutation or webhook replay to
//! ensure the system is in a valid state.
//!
//! ## Design Principles
//!
//! 1. **Executable**: Each invariant is a real SQL query that can be run
//! 2. **Explanatory**: Violations include enough context to debug
//! 3. **Non-destructive**: Checks only read, never write

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;

/// Result of running a single invariant check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantViolation {
    /// Which invariant was violated
    pub invariant: String,
    /// Mentor(s) affected
    pub mentor_ids: Vec<Uuid>,
    /// Human-readable description of the violation
    pub description: String,
    /// Additional context for debugging
    pub context: serde_json::Value,
    /// Severity level
    pub severity: ViolationSeverity,
}

/// Severity of an invariant violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationSeverity {
    /// Critical - mentors may be billed or granted access incorrectly
    Critical,
    /// High - data inconsistency that needs attention
    High,
    /// Medium - potential issue, should investigate
    Medium,
    /// Low - minor inconsistency, informational
    Low,
}

impl std::fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViolationSeverity::Critical => write!(f, "CRITICAL"),
            ViolationSeverity::High => write!(f, "HIGH"),
            ViolationSeverity::Medium => write!(f, "MEDIUM"),
            ViolationSeverity::Low => write!(f, "LOW"),
        }
    }
}

/// Summary of all invariant checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantCheckSummary {
    pub checked_at: OffsetDateTime,
    pub checks_run: usize,
    pub checks_passed: usize,
    pub checks_failed: usize,
    pub violations: Vec<InvariantViolation>,
    pub healthy: bool,
}

#[derive(Debug, sqlx::FromRow)]
struct MultipleLiveRow {
    mentor_id: Uuid,
    live_count: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct OverCapacityRow {
    mentor_id: Uuid,
    cycle_id: Uuid,
    billed_seat_limit: i32,
    active_seats: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct CancelledNoTimestampRow {
    cycle_id: Uuid,
    mentor_id: Uuid,
}

#[derive(Debug, sqlx::FromRow)]
struct StaleActiveSeatRow {
    mentor_id: Uuid,
    seat_count: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct MissingStripeSubRow {
    cycle_id: Uuid,
    mentor_id: Uuid,
    status: String,
}

/// Service for running billing invariant checks
pub struct InvariantChecker {
    pool: PgPool,
}

impl InvariantChecker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run all invariant checks and return summary
    pub async fn run_all_checks(&self) -> BillingResult<InvariantCheckSummary> {
        let now = OffsetDateTime::now_utc();
        let mut violations = Vec::new();

        violations.extend(self.check_single_live_cycle().await?);
        violations.extend(self.check_seats_within_limit().await?);
        violations.extend(self.check_cancelled_has_timestamp().await?);
        violations.extend(self.check_no_active_seats_without_live_cycle().await?);
        violations.extend(self.check_live_cycle_has_stripe_subscription().await?);

        let checks_run = 5;
        let checks_failed = violations
            .iter()
            .map(|v| &v.invariant)
            .collect::<std::collections::HashSet<_>>()
            .len();
        let checks_passed = checks_run - checks_failed;

        Ok(InvariantCheckSummary {
            checked_at: now,
            checks_run,
            checks_passed,
            checks_failed,
            healthy: violations.is_empty(),
            violations,
        })
    }

    /// Invariant 1: At most one live cycle per mentor
    ///
    /// Two live cycles would double-bill the mentor and make the seat
    /// limit ambiguous.
    async fn check_single_live_cycle(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<MultipleLiveRow> = sqlx::query_as(
            r#"
            SELECT mentor_id, COUNT(*) as live_count
            FROM subscription_cycles
            WHERE status IN ('active', 'past_due', 'paused')
            GROUP BY mentor_id
            HAVING COUNT(*) > 1
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "single_live_cycle".to_string(),
                mentor_ids: vec![row.mentor_id],
                description: format!(
                    "Mentor has {} live cycles (expected at most 1)",
                    row.live_count
                ),
                context: serde_json::json!({ "live_count": row.live_count }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Invariant 2: Active seats never exceed the live cycle's limit
    async fn check_seats_within_limit(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<OverCapacityRow> = sqlx::query_as(
            r#"
            SELECT c.mentor_id,
                   c.id as cycle_id,
                   c.billed_seat_limit,
                   COUNT(m.id) as active_seats
            FROM subscription_cycles c
            JOIN mentees m ON m.mentor_id = c.mentor_id AND m.is_active
            WHERE c.status IN ('active', 'paused')
            GROUP BY c.mentor_id, c.id, c.billed_seat_limit
            HAVING COUNT(m.id) > c.billed_seat_limit
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "seats_within_limit".to_string(),
                mentor_ids: vec![row.mentor_id],
                description: format!(
                    "Mentor has {} active seats but the live cycle allows {}",
                    row.active_seats, row.billed_seat_limit
                ),
                context: serde_json::json!({
                    "cycle_id": row.cycle_id,
                    "billed_seat_limit": row.billed_seat_limit,
                    "active_seats": row.active_seats,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Invariant 3: Cancelled cycles carry a cancellation timestamp
    async fn check_cancelled_has_timestamp(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<CancelledNoTimestampRow> = sqlx::query_as(
            r#"
            SELECT id as cycle_id, mentor_id
            FROM subscription_cycles
            WHERE status = 'cancelled' AND cancelled_at IS NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "cancelled_has_timestamp".to_string(),
                mentor_ids: vec![row.mentor_id],
                description: "Cancelled cycle has no cancelled_at timestamp".to_string(),
                context: serde_json::json!({ "cycle_id": row.cycle_id }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// Invariant 4: No active seats for mentors without a live cycle
    ///
    /// Expiry deactivates every seat in the same transaction that flips
    /// the cycle; an active seat with no live cycle means that transaction
    /// was bypassed.
    async fn check_no_active_seats_without_live_cycle(
        &self,
    ) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<StaleActiveSeatRow> = sqlx::query_as(
            r#"
            SELECT m.mentor_id, COUNT(*) as seat_count
            FROM mentees m
            WHERE m.is_active
              AND NOT EXISTS (
                  SELECT 1 FROM subscription_cycles c
                  WHERE c.mentor_id = m.mentor_id
                    AND c.status IN ('active', 'past_due', 'paused')
              )
            GROUP BY m.mentor_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "no_active_seats_without_live_cycle".to_string(),
                mentor_ids: vec![row.mentor_id],
                description: format!(
                    "Mentor has {} active seats but no live cycle",
                    row.seat_count
                ),
                context: serde_json::json!({ "seat_count": row.seat_count }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// Invariant 5: Live cycles reference a Stripe subscription
    ///
    /// The reconciler can only repair drift for cycles it can look up at
    /// the processor.
    async fn check_live_cycle_has_stripe_subscription(
        &self,
    ) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<MissingStripeSubRow> = sqlx::query_as(
            r#"
            SELECT id as cycle_id, mentor_id, status
            FROM subscription_cycles
            WHERE status IN ('active', 'past_due', 'paused')
              AND stripe_subscription_id = ''
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "live_cycle_has_stripe_subscription".to_string(),
                mentor_ids: vec![row.mentor_id],
                description: format!(
                    "Live cycle in status '{}' has no Stripe subscription id",
                    row.status
                ),
                context: serde_json::json!({ "cycle_id": row.cycle_id }),
                severity: ViolationSeverity::Medium,
            })
            .collect())
    }

    /// Run a single invariant check by name
    pub async fn run_check(&self, name: &str) -> BillingResult<Vec<InvariantViolation>> {
        match name {
            "single_live_cycle" => self.check_single_live_cycle().await,
            "seats_within_limit" => self.check_seats_within_limit().await,
            "cancelled_has_timestamp" => self.check_cancelled_has_timestamp().await,
            "no_active_seats_without_live_cycle" => {
                self.check_no_active_seats_without_live_cycle().await
            }
            "live_cycle_has_stripe_subscription" => {
                self.check_live_cycle_has_stripe_subscription().await
            }
            _ => Ok(vec![]),
        }
    }

    /// Get list of all available invariant checks
    pub fn available_checks() -> Vec<&'static str> {
        vec![
            "single_live_cycle",
            "seats_within_limit",
            "cancelled_has_timestamp",
            "no_active_seats_without_live_cycle",
            "live_cycle_has_stripe_subscription",
        ]
    }
}
