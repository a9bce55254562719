//! Mentee seat management
//!
//! Enforces the capacity invariant: a mentor's active seats never exceed
//! the seat-limit snapshot of their current live cycle. The count-then-act
//! check runs inside a transaction holding a row lock on the live cycle,
//! so concurrent activations for the same mentor serialize instead of
//! racing past the limit.
//!
//! Capacity denials are expected business outcomes, returned as typed
//! values — never as errors.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::enrolment::EnrolmentSync;
use crate::error::BillingResult;
use crate::events::{ActorType, BillingEventBuilder, BillingEventLogger, BillingEventType};
use crate::ledger::Cycle;
use crate::notify::Notifier;

/// One seat record. Seats are deactivated, never deleted — a mentee row
/// outlives the cycle that authorized it.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct MenteeRecord {
    pub id: Uuid,
    pub mentor_id: Uuid,
    pub mentee_id: Uuid,
    pub cycle_id: Uuid,
    pub is_active: bool,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// A seat joined with directory data for listing.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct MenteeWithUser {
    pub id: Uuid,
    pub mentee_id: Uuid,
    pub is_active: bool,
    pub full_name: String,
    pub email: String,
    pub created_at: OffsetDateTime,
}

/// Why a seat operation was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeatDenial {
    /// Mentor has no qualifying subscription cycle.
    NoSubscription,
    /// Active seat count already at the cycle's limit.
    LimitReached,
    /// Mentee user does not exist in the directory.
    MenteeNotFound,
    /// Mentee is already sponsored by a mentor (system-wide exclusivity).
    AlreadyMentored,
    /// No seat record exists to toggle.
    SeatNotFound,
}

impl SeatDenial {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeatDenial::NoSubscription => "no_subscription",
            SeatDenial::LimitReached => "limit_reached",
            SeatDenial::MenteeNotFound => "mentee_not_found",
            SeatDenial::AlreadyMentored => "already_mentored",
            SeatDenial::SeatNotFound => "seat_not_found",
        }
    }
}

/// Result of adding a mentee.
#[derive(Debug)]
pub enum AddMenteeOutcome {
    Added(MenteeRecord),
    Denied(SeatDenial),
}

/// Result of a seat toggle.
#[derive(Debug, Clone, Serialize)]
pub struct ToggleOutcome {
    pub success: bool,
    pub reason: Option<SeatDenial>,
    /// Seat limit of the live cycle (0 when there is none).
    pub limit: i32,
    /// Active seat count after the operation.
    pub active: i64,
}

impl ToggleOutcome {
    fn ok(limit: i32, active: i64) -> Self {
        Self {
            success: true,
            reason: None,
            limit,
            active,
        }
    }

    fn denied(reason: SeatDenial, limit: i32, active: i64) -> Self {
        Self {
            success: false,
            reason: Some(reason),
            limit,
            active,
        }
    }
}

/// Seat manager enforcing the capacity invariant.
#[derive(Clone)]
pub struct CapacityGuard {
    pool: PgPool,
    enrolment: EnrolmentSync,
    notifier: Notifier,
    event_logger: BillingEventLogger,
}

impl CapacityGuard {
    pub fn new(pool: PgPool, notifier: Notifier) -> Self {
        let enrolment = EnrolmentSync::new(pool.clone());
        let event_logger = BillingEventLogger::new(pool.clone());
        Self {
            pool,
            enrolment,
            notifier,
            event_logger,
        }
    }

    /// Count of currently active mentees for a mentor.
    pub async fn count_active(&self, mentor_id: Uuid) -> BillingResult<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM mentees WHERE mentor_id = $1 AND is_active")
                .bind(mentor_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(count)
    }

    /// All mentees (active and inactive) for a mentor, joined with
    /// directory data, ordered by name.
    pub async fn mentees_of(&self, mentor_id: Uuid) -> BillingResult<Vec<MenteeWithUser>> {
        let mentees: Vec<MenteeWithUser> = sqlx::query_as(
            r#"
            SELECT m.id, m.mentee_id, m.is_active, u.full_name, u.email, m.created_at
            FROM mentees m
            JOIN users u ON u.id = m.mentee_id
            WHERE m.mentor_id = $1
            ORDER BY u.full_name ASC
            "#,
        )
        .bind(mentor_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(mentees)
    }

    /// Add a mentee under a mentor's subscription.
    ///
    /// Validation chain, short-circuiting on the first failure:
    ///   1. mentor has a strictly `active` cycle (paused/past_due mentors
    ///      can toggle existing seats but not create new ones),
    ///   2. active seat count < the cycle's seat-limit snapshot,
    ///   3. mentee exists in the directory,
    ///   4. mentee is not already sponsored by any mentor.
    ///
    /// The seat insert commits before the role/course grants run; those
    /// are best-effort with logged failure, since seat attribution is the
    /// source of truth.
    pub async fn add_mentee(
        &self,
        mentor_id: Uuid,
        mentee_id: Uuid,
    ) -> BillingResult<AddMenteeOutcome> {
        let mut tx = self.pool.begin().await?;

        // Row lock on the live cycle serializes capacity checks per mentor.
        let cycle: Option<Cycle> = sqlx::query_as(
            r#"
            SELECT * FROM subscription_cycles
            WHERE mentor_id = $1 AND status = 'active'
            FOR UPDATE
            "#,
        )
        .bind(mentor_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(cycle) = cycle else {
            return Ok(AddMenteeOutcome::Denied(SeatDenial::NoSubscription));
        };

        let (active,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM mentees WHERE mentor_id = $1 AND is_active")
                .bind(mentor_id)
                .fetch_one(&mut *tx)
                .await?;

        if active >= cycle.billed_seat_limit as i64 {
            return Ok(AddMenteeOutcome::Denied(SeatDenial::LimitReached));
        }

        let mentee_exists: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM users WHERE id = $1")
            .bind(mentee_id)
            .fetch_optional(&mut *tx)
            .await?;
        if mentee_exists.is_none() {
            return Ok(AddMenteeOutcome::Denied(SeatDenial::MenteeNotFound));
        }

        let already: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM mentees WHERE mentee_id = $1")
            .bind(mentee_id)
            .fetch_optional(&mut *tx)
            .await?;
        if already.is_some() {
            return Ok(AddMenteeOutcome::Denied(SeatDenial::AlreadyMentored));
        }

        let inserted = sqlx::query_as::<_, MenteeRecord>(
            r#"
            INSERT INTO mentees (mentor_id, mentee_id, cycle_id, is_active)
            VALUES ($1, $2, $3, TRUE)
            RETURNING *
            "#,
        )
        .bind(mentor_id)
        .bind(mentee_id)
        .bind(cycle.id)
        .fetch_one(&mut *tx)
        .await;

        let record = match inserted {
            Ok(record) => record,
            // The UNIQUE(mentee_id) constraint still backstops a race with
            // a different mentor's concurrent add, which our per-mentor
            // row lock does not cover.
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                return Ok(AddMenteeOutcome::Denied(SeatDenial::AlreadyMentored));
            }
            Err(e) => return Err(e.into()),
        };

        tx.commit().await?;

        // Role relationship first, then course access, mirroring the order
        // access is checked downstream.
        if let Err(e) = self
            .enrolment
            .grant_role(mentee_id, crate::enrolment::MENTEE_ROLE_SCOPE)
            .await
        {
            tracing::error!(mentee_id = %mentee_id, error = %e, "Failed to grant mentee role");
        }
        if let Err(e) = self.enrolment.grant_memberships(mentee_id).await {
            tracing::error!(mentee_id = %mentee_id, error = %e, "Failed to enrol mentee");
        }
        if let Err(e) = self.notifier.send_mentee_activated(mentee_id).await {
            tracing::error!(mentee_id = %mentee_id, error = %e, "Failed to notify mentee");
        }

        if let Err(e) = self
            .event_logger
            .log_event(
                BillingEventBuilder::new(mentor_id, BillingEventType::MenteeAdded)
                    .data(serde_json::json!({
                        "mentee_id": mentee_id,
                        "cycle_id": cycle.id,
                        "active_after": active + 1,
                        "limit": cycle.billed_seat_limit,
                    }))
                    .actor(mentor_id, ActorType::User),
            )
            .await
        {
            tracing::warn!(error = %e, "Failed to log mentee added event");
        }

        tracing::info!(
            mentor_id = %mentor_id,
            mentee_id = %mentee_id,
            active = active + 1,
            limit = cycle.billed_seat_limit,
            "Mentee added"
        );

        Ok(AddMenteeOutcome::Added(record))
    }

    /// Toggle a seat active or inactive.
    ///
    /// Deactivation is unconditional: the seat flips, course access is
    /// revoked, done. Activation re-checks capacity against the mentor's
    /// live cycle BEFORE mutating — a seat is never provisionally
    /// activated and rolled back.
    pub async fn set_mentee_status(
        &self,
        mentor_id: Uuid,
        mentee_id: Uuid,
        activate: bool,
    ) -> BillingResult<ToggleOutcome> {
        if activate {
            self.activate_seat(mentor_id, mentee_id).await
        } else {
            self.deactivate_seat(mentor_id, mentee_id).await
        }
    }

    async fn activate_seat(&self, mentor_id: Uuid, mentee_id: Uuid) -> BillingResult<ToggleOutcome> {
        let mut tx = self.pool.begin().await?;

        let cycle: Option<Cycle> = sqlx::query_as(
            r#"
            SELECT * FROM subscription_cycles
            WHERE mentor_id = $1 AND status IN ('active', 'paused')
            ORDER BY created_at DESC
            LIMIT 1
            FOR UPDATE
            "#,
        )
        .bind(mentor_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(cycle) = cycle else {
            return Ok(ToggleOutcome::denied(SeatDenial::NoSubscription, 0, 0));
        };
        debug_assert!(cycle.status.is_live());

        let (active,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM mentees WHERE mentor_id = $1 AND is_active")
                .bind(mentor_id)
                .fetch_one(&mut *tx)
                .await?;

        if active >= cycle.billed_seat_limit as i64 {
            return Ok(ToggleOutcome::denied(
                SeatDenial::LimitReached,
                cycle.billed_seat_limit,
                active,
            ));
        }

        let updated = sqlx::query(
            r#"
            UPDATE mentees
            SET is_active = TRUE, cycle_id = $3, updated_at = NOW()
            WHERE mentor_id = $1 AND mentee_id = $2 AND is_active = FALSE
            "#,
        )
        .bind(mentor_id)
        .bind(mentee_id)
        .bind(cycle.id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            // No inactive seat to flip: either no record at all, or it is
            // already active (idempotent success).
            let existing: Option<(bool,)> = sqlx::query_as(
                "SELECT is_active FROM mentees WHERE mentor_id = $1 AND mentee_id = $2",
            )
            .bind(mentor_id)
            .bind(mentee_id)
            .fetch_optional(&mut *tx)
            .await?;

            return Ok(match existing {
                Some((true,)) => ToggleOutcome::ok(cycle.billed_seat_limit, active),
                _ => ToggleOutcome::denied(
                    SeatDenial::SeatNotFound,
                    cycle.billed_seat_limit,
                    active,
                ),
            });
        }

        tx.commit().await?;

        if let Err(e) = self.enrolment.grant_memberships(mentee_id).await {
            tracing::error!(mentee_id = %mentee_id, error = %e, "Failed to re-enrol mentee");
        }
        if let Err(e) = self.notifier.send_mentee_activated(mentee_id).await {
            tracing::error!(mentee_id = %mentee_id, error = %e, "Failed to notify mentee");
        }

        if let Err(e) = self
            .event_logger
            .log_event(
                BillingEventBuilder::new(mentor_id, BillingEventType::MenteeActivated)
                    .data(serde_json::json!({ "mentee_id": mentee_id, "cycle_id": cycle.id }))
                    .actor(mentor_id, ActorType::User),
            )
            .await
        {
            tracing::warn!(error = %e, "Failed to log mentee activated event");
        }

        Ok(ToggleOutcome::ok(cycle.billed_seat_limit, active + 1))
    }

    async fn deactivate_seat(
        &self,
        mentor_id: Uuid,
        mentee_id: Uuid,
    ) -> BillingResult<ToggleOutcome> {
        let updated = sqlx::query(
            r#"
            UPDATE mentees
            SET is_active = FALSE, updated_at = NOW()
            WHERE mentor_id = $1 AND mentee_id = $2
            "#,
        )
        .bind(mentor_id)
        .bind(mentee_id)
        .execute(&self.pool)
        .await?;

        let limit = self
            .live_cycle_limit(mentor_id)
            .await
            .unwrap_or_default()
            .unwrap_or(0);
        let active = self.count_active(mentor_id).await?;

        if updated.rows_affected() == 0 {
            return Ok(ToggleOutcome::denied(SeatDenial::SeatNotFound, limit, active));
        }

        if let Err(e) = self.enrolment.revoke_memberships(mentee_id).await {
            tracing::error!(mentee_id = %mentee_id, error = %e, "Failed to unenrol mentee");
        }
        if let Err(e) = self.notifier.send_mentee_deactivated(mentee_id).await {
            tracing::error!(mentee_id = %mentee_id, error = %e, "Failed to notify mentee");
        }

        if let Err(e) = self
            .event_logger
            .log_event(
                BillingEventBuilder::new(mentor_id, BillingEventType::MenteeDeactivated)
                    .data(serde_json::json!({ "mentee_id": mentee_id }))
                    .actor(mentor_id, ActorType::User),
            )
            .await
        {
            tracing::warn!(error = %e, "Failed to log mentee deactivated event");
        }

        tracing::info!(mentor_id = %mentor_id, mentee_id = %mentee_id, "Mentee deactivated");

        Ok(ToggleOutcome::ok(limit, active))
    }

    async fn live_cycle_limit(&self, mentor_id: Uuid) -> BillingResult<Option<i32>> {
        let row: Option<(i32,)> = sqlx::query_as(
            r#"
            SELECT billed_seat_limit FROM subscription_cycles
            WHERE mentor_id = $1 AND status IN ('active', 'paused')
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(mentor_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(limit,)| limit))
    }
}
