//! Subscription cycle ledger
//!
//! One immutable record per billing cycle. A cycle's price and seat-limit
//! snapshots never change after insert; only `status`,
//! `cancel_at_period_end`, `cancelled_at`, `stripe_invoice_id` and
//! `updated_at` may move. Renewal supersedes the previous cycle and
//! inserts the next one in a single transaction; expiry flips the cycle
//! and deactivates every seat in a single transaction, with course
//! unenrolment running after commit.

use mentorsub_shared::{BillingPeriod, CycleStatus};
use sqlx::PgPool;
use stripe::{CancelSubscription, Subscription, SubscriptionId, UpdateSubscription};
use time::OffsetDateTime;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;
use uuid::Uuid;

use crate::client::StripeClient;
use crate::enrolment::EnrolmentSync;
use crate::error::{BillingError, BillingResult};
use crate::events::{ActorType, BillingEventBuilder, BillingEventLogger, BillingEventType};

/// One billing-cycle row from the ledger.
#[derive(Debug, Clone, serde::Serialize, sqlx::FromRow)]
pub struct Cycle {
    pub id: Uuid,
    pub mentor_id: Uuid,
    pub plan_id: Uuid,
    pub override_id: Option<Uuid>,
    pub billed_price_cents: i64,
    pub billed_seat_limit: i32,
    #[sqlx(try_from = "String")]
    pub billing_period: BillingPeriod,
    #[sqlx(try_from = "String")]
    pub status: CycleStatus,
    pub stripe_subscription_id: String,
    pub stripe_customer_id: String,
    pub stripe_invoice_id: Option<String>,
    pub stripe_price_id: String,
    pub period_start: OffsetDateTime,
    pub period_end: OffsetDateTime,
    pub cancel_at_period_end: bool,
    pub cancelled_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Snapshot data for a new cycle row, produced at checkout completion or
/// renewal from resolved pricing plus the Stripe objects.
#[derive(Debug, Clone)]
pub struct NewCycle {
    pub mentor_id: Uuid,
    pub plan_id: Uuid,
    pub override_id: Option<Uuid>,
    pub billed_price_cents: i64,
    pub billed_seat_limit: i32,
    pub billing_period: BillingPeriod,
    pub stripe_subscription_id: String,
    pub stripe_customer_id: String,
    pub stripe_invoice_id: Option<String>,
    pub stripe_price_id: String,
    pub period_start: OffsetDateTime,
    pub period_end: OffsetDateTime,
}

/// The subscription cycle store.
#[derive(Clone)]
pub struct Ledger {
    pool: PgPool,
    stripe: StripeClient,
    enrolment: EnrolmentSync,
    event_logger: BillingEventLogger,
}

impl Ledger {
    pub fn new(stripe: StripeClient, pool: PgPool) -> Self {
        let enrolment = EnrolmentSync::new(pool.clone());
        let event_logger = BillingEventLogger::new(pool.clone());
        Self {
            pool,
            stripe,
            enrolment,
            event_logger,
        }
    }

    // =========================================================================
    // Queries (read-only)
    // =========================================================================

    /// The mentor's cycle with status `active`, strictly. Returns nothing
    /// for paused or past_due mentors.
    pub async fn active_of(&self, mentor_id: Uuid) -> BillingResult<Option<Cycle>> {
        let cycle: Option<Cycle> = sqlx::query_as(
            "SELECT * FROM subscription_cycles WHERE mentor_id = $1 AND status = 'active'",
        )
        .bind(mentor_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(cycle)
    }

    /// The mentor's current cycle including paused ones, newest first.
    /// The dashboard uses this so paused mentors still see their panel.
    pub async fn live_of(&self, mentor_id: Uuid) -> BillingResult<Option<Cycle>> {
        let cycle: Option<Cycle> = sqlx::query_as(
            r#"
            SELECT * FROM subscription_cycles
            WHERE mentor_id = $1 AND status IN ('active', 'paused')
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(mentor_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(cycle)
    }

    /// Full billing history for a mentor, newest first. Never mutates.
    pub async fn history_of(&self, mentor_id: Uuid) -> BillingResult<Vec<Cycle>> {
        let cycles: Vec<Cycle> = sqlx::query_as(
            "SELECT * FROM subscription_cycles WHERE mentor_id = $1 ORDER BY created_at DESC",
        )
        .bind(mentor_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(cycles)
    }

    pub async fn by_id(&self, cycle_id: Uuid) -> BillingResult<Cycle> {
        let cycle: Option<Cycle> =
            sqlx::query_as("SELECT * FROM subscription_cycles WHERE id = $1")
                .bind(cycle_id)
                .fetch_optional(&self.pool)
                .await?;

        cycle.ok_or(BillingError::CycleNotFound(cycle_id))
    }

    /// Any cycle referencing this Stripe subscription id, newest first.
    /// Used by the checkout handler's idempotency check.
    pub async fn find_by_stripe_subscription(
        &self,
        stripe_subscription_id: &str,
    ) -> BillingResult<Option<Cycle>> {
        let cycle: Option<Cycle> = sqlx::query_as(
            r#"
            SELECT * FROM subscription_cycles
            WHERE stripe_subscription_id = $1
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(stripe_subscription_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(cycle)
    }

    /// The strictly-active cycle for a Stripe subscription id, if any.
    pub async fn find_active_by_stripe_subscription(
        &self,
        stripe_subscription_id: &str,
    ) -> BillingResult<Option<Cycle>> {
        let cycle: Option<Cycle> = sqlx::query_as(
            r#"
            SELECT * FROM subscription_cycles
            WHERE stripe_subscription_id = $1 AND status = 'active'
            "#,
        )
        .bind(stripe_subscription_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(cycle)
    }

    /// The live (active/past_due/paused) cycle for a Stripe subscription.
    pub async fn find_live_by_stripe_subscription(
        &self,
        stripe_subscription_id: &str,
    ) -> BillingResult<Option<Cycle>> {
        let cycle: Option<Cycle> = sqlx::query_as(
            r#"
            SELECT * FROM subscription_cycles
            WHERE stripe_subscription_id = $1
              AND status IN ('active', 'past_due', 'paused')
            "#,
        )
        .bind(stripe_subscription_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(cycle)
    }

    /// Whether a Stripe invoice id has already produced a cycle row.
    /// Duplicate `invoice.paid` deliveries stop here.
    pub async fn invoice_already_processed(&self, stripe_invoice_id: &str) -> BillingResult<bool> {
        let row: Option<(Uuid,)> =
            sqlx::query_as("SELECT id FROM subscription_cycles WHERE stripe_invoice_id = $1")
                .bind(stripe_invoice_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.is_some())
    }

    /// Every live cycle with a Stripe subscription id — the reconciler's
    /// sweep set.
    pub async fn live_cycles(&self) -> BillingResult<Vec<Cycle>> {
        let cycles: Vec<Cycle> = sqlx::query_as(
            r#"
            SELECT * FROM subscription_cycles
            WHERE status IN ('active', 'past_due', 'paused')
              AND stripe_subscription_id <> ''
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(cycles)
    }

    /// Active cycles whose period ends inside `[window_start, window_end)`.
    pub async fn active_cycles_ending_in(
        &self,
        window_start: OffsetDateTime,
        window_end: OffsetDateTime,
    ) -> BillingResult<Vec<Cycle>> {
        let cycles: Vec<Cycle> = sqlx::query_as(
            r#"
            SELECT * FROM subscription_cycles
            WHERE status = 'active'
              AND period_end >= $1
              AND period_end < $2
            "#,
        )
        .bind(window_start)
        .bind(window_end)
        .fetch_all(&self.pool)
        .await?;

        Ok(cycles)
    }

    // =========================================================================
    // Structural mutations
    // =========================================================================

    /// Insert the initial cycle after checkout completion.
    ///
    /// Callers enforce at-most-once per Stripe subscription id before
    /// calling. After insert the mentor gets the capability role and
    /// course memberships; both grants are best-effort.
    pub async fn create_cycle(&self, new: NewCycle) -> BillingResult<Cycle> {
        let cycle = self.insert_cycle(&self.pool, &new).await?;

        if let Err(e) = self.enrolment.grant_mentor_role(new.mentor_id).await {
            tracing::error!(mentor_id = %new.mentor_id, error = %e, "Failed to grant mentor role");
        }
        if let Err(e) = self.enrolment.grant_memberships(new.mentor_id).await {
            tracing::error!(mentor_id = %new.mentor_id, error = %e, "Failed to enrol mentor");
        }

        if let Err(e) = self
            .event_logger
            .log_event(
                BillingEventBuilder::new(cycle.mentor_id, BillingEventType::CycleCreated)
                    .data(serde_json::json!({
                        "cycle_id": cycle.id,
                        "billed_price_cents": cycle.billed_price_cents,
                        "billed_seat_limit": cycle.billed_seat_limit,
                    }))
                    .stripe_subscription(&cycle.stripe_subscription_id)
                    .actor_type(ActorType::Stripe),
            )
            .await
        {
            tracing::warn!(error = %e, "Failed to log cycle created event");
        }

        tracing::info!(
            mentor_id = %cycle.mentor_id,
            cycle_id = %cycle.id,
            stripe_subscription_id = %cycle.stripe_subscription_id,
            "Subscription cycle created"
        );

        Ok(cycle)
    }

    /// Process a renewal: supersede the previous cycle and insert the next
    /// one atomically. A partial result is a correctness failure, so both
    /// writes share one transaction.
    pub async fn renew(&self, previous_id: Uuid, new: NewCycle) -> BillingResult<Cycle> {
        let mut tx = self.pool.begin().await?;

        let superseded = sqlx::query(
            r#"
            UPDATE subscription_cycles
            SET status = 'superseded', updated_at = NOW()
            WHERE id = $1 AND status IN ('active', 'past_due')
            "#,
        )
        .bind(previous_id)
        .execute(&mut *tx)
        .await?;

        if superseded.rows_affected() == 0 {
            // Previous cycle vanished or already terminal; the transaction
            // rolls back on drop.
            return Err(BillingError::InvalidInput(format!(
                "cycle {previous_id} is not live, cannot renew"
            )));
        }

        let cycle = self.insert_cycle(&mut *tx, &new).await?;

        tx.commit().await?;

        if let Err(e) = self
            .event_logger
            .log_event(
                BillingEventBuilder::new(cycle.mentor_id, BillingEventType::CycleRenewed)
                    .data(serde_json::json!({
                        "previous_cycle_id": previous_id,
                        "cycle_id": cycle.id,
                        "billed_price_cents": cycle.billed_price_cents,
                        "billed_seat_limit": cycle.billed_seat_limit,
                    }))
                    .stripe_subscription(&cycle.stripe_subscription_id)
                    .actor_type(ActorType::Stripe),
            )
            .await
        {
            tracing::warn!(error = %e, "Failed to log cycle renewed event");
        }

        tracing::info!(
            mentor_id = %cycle.mentor_id,
            previous_cycle_id = %previous_id,
            cycle_id = %cycle.id,
            "Subscription cycle renewed"
        );

        Ok(cycle)
    }

    /// Mark a cycle expired and deactivate every active seat of its
    /// mentor, in one transaction. Course revocation happens after commit
    /// and is retried independently — a revocation failure must not roll
    /// back the ledger.
    ///
    /// Calling expire on an already-terminal cycle is a no-op.
    pub async fn expire(&self, cycle_id: Uuid) -> BillingResult<()> {
        let cycle = self.by_id(cycle_id).await?;

        let mut tx = self.pool.begin().await?;

        let expired = sqlx::query(
            r#"
            UPDATE subscription_cycles
            SET status = 'expired', updated_at = NOW()
            WHERE id = $1 AND status IN ('active', 'past_due', 'paused')
            "#,
        )
        .bind(cycle_id)
        .execute(&mut *tx)
        .await?;

        if expired.rows_affected() == 0 {
            tracing::debug!(cycle_id = %cycle_id, "Cycle already terminal, expire is a no-op");
            return Ok(());
        }

        let deactivated: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            UPDATE mentees
            SET is_active = FALSE, updated_at = NOW()
            WHERE mentor_id = $1 AND is_active = TRUE
            RETURNING mentee_id
            "#,
        )
        .bind(cycle.mentor_id)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        // Revocation runs after commit, retried with backoff. Failures are
        // logged, never surfaced as ledger errors.
        for (mentee_id,) in &deactivated {
            self.revoke_with_retry(*mentee_id).await;
        }
        self.revoke_with_retry(cycle.mentor_id).await;
        if let Err(e) = self.enrolment.revoke_mentor_role(cycle.mentor_id).await {
            tracing::error!(mentor_id = %cycle.mentor_id, error = %e, "Failed to revoke mentor role");
        }

        if let Err(e) = self
            .event_logger
            .log_event(
                BillingEventBuilder::new(cycle.mentor_id, BillingEventType::CycleExpired)
                    .data(serde_json::json!({
                        "cycle_id": cycle.id,
                        "seats_deactivated": deactivated.len(),
                    }))
                    .stripe_subscription(&cycle.stripe_subscription_id)
                    .actor_type(ActorType::System),
            )
            .await
        {
            tracing::warn!(error = %e, "Failed to log cycle expired event");
        }

        tracing::info!(
            mentor_id = %cycle.mentor_id,
            cycle_id = %cycle.id,
            seats_deactivated = deactivated.len(),
            "Subscription cycle expired"
        );

        Ok(())
    }

    /// Request cancellation at Stripe, then reflect it locally.
    ///
    /// `immediate = false` only flags `cancel_at_period_end`; the status
    /// changes when Stripe later reports termination. `immediate = true`
    /// pre-sets the local status to `cancelled` so the admin panel shows
    /// the outcome without waiting for the webhook round-trip — the
    /// confirmation event then finds no live cycle and no-ops.
    pub async fn request_cancellation(
        &self,
        cycle_id: Uuid,
        immediate: bool,
        actor_id: Uuid,
    ) -> BillingResult<()> {
        let cycle = self.by_id(cycle_id).await?;

        if cycle.stripe_subscription_id.is_empty() {
            return Err(BillingError::NoStripeSubscription(cycle_id));
        }

        let sub_id = self.parse_subscription_id(&cycle.stripe_subscription_id)?;

        if immediate {
            let params = CancelSubscription {
                cancellation_details: None,
                invoice_now: None,
                prorate: None,
            };
            Subscription::cancel(self.stripe.inner(), &sub_id, params).await?;

            sqlx::query(
                r#"
                UPDATE subscription_cycles
                SET status = 'cancelled', cancelled_at = NOW(), updated_at = NOW()
                WHERE id = $1 AND status IN ('active', 'past_due', 'paused')
                "#,
            )
            .bind(cycle_id)
            .execute(&self.pool)
            .await?;
        } else {
            let params = UpdateSubscription {
                cancel_at_period_end: Some(true),
                ..Default::default()
            };
            Subscription::update(self.stripe.inner(), &sub_id, params).await?;

            sqlx::query(
                r#"
                UPDATE subscription_cycles
                SET cancel_at_period_end = TRUE, updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(cycle_id)
            .execute(&self.pool)
            .await?;
        }

        let event_type = if immediate {
            BillingEventType::CycleCancelled
        } else {
            BillingEventType::CycleCancelScheduled
        };
        if let Err(e) = self
            .event_logger
            .log_event(
                BillingEventBuilder::new(cycle.mentor_id, event_type)
                    .data(serde_json::json!({ "cycle_id": cycle_id, "immediate": immediate }))
                    .stripe_subscription(&cycle.stripe_subscription_id)
                    .actor(actor_id, ActorType::Admin),
            )
            .await
        {
            tracing::warn!(error = %e, "Failed to log cancellation event");
        }

        tracing::info!(
            cycle_id = %cycle_id,
            immediate = immediate,
            "Cancellation requested"
        );

        Ok(())
    }

    /// Pause payment collection. Mentee access is retained while paused.
    pub async fn pause(&self, cycle_id: Uuid, actor_id: Uuid) -> BillingResult<()> {
        let cycle = self.by_id(cycle_id).await?;

        if cycle.stripe_subscription_id.is_empty() {
            return Err(BillingError::NoStripeSubscription(cycle_id));
        }
        if cycle.status != CycleStatus::Active {
            return Err(BillingError::InvalidInput(format!(
                "cycle {cycle_id} is {}, only active cycles can pause",
                cycle.status
            )));
        }

        let sub_id = self.parse_subscription_id(&cycle.stripe_subscription_id)?;
        let current = Subscription::retrieve(self.stripe.inner(), &sub_id, &[]).await?;

        let mut metadata = current.metadata.clone();
        metadata.insert("paused_at".to_string(), OffsetDateTime::now_utc().to_string());
        metadata.insert("paused_by".to_string(), actor_id.to_string());
        let mut update = UpdateSubscription::new();
        update.metadata = Some(metadata);
        Subscription::update(self.stripe.inner(), &sub_id, update).await?;

        sqlx::query(
            r#"
            UPDATE subscription_cycles
            SET status = 'paused', updated_at = NOW()
            WHERE id = $1 AND status = 'active'
            "#,
        )
        .bind(cycle_id)
        .execute(&self.pool)
        .await?;

        if let Err(e) = self
            .event_logger
            .log_event(
                BillingEventBuilder::new(cycle.mentor_id, BillingEventType::CyclePaused)
                    .data(serde_json::json!({ "cycle_id": cycle_id }))
                    .actor(actor_id, ActorType::Admin),
            )
            .await
        {
            tracing::warn!(error = %e, "Failed to log pause event");
        }

        tracing::info!(cycle_id = %cycle_id, "Subscription paused");
        Ok(())
    }

    /// Resume a paused subscription: payment collection restarts on the
    /// next billing date and the local status returns to `active`.
    pub async fn resume(&self, cycle_id: Uuid, actor_id: Uuid) -> BillingResult<()> {
        let cycle = self.by_id(cycle_id).await?;

        if cycle.stripe_subscription_id.is_empty() {
            return Err(BillingError::NoStripeSubscription(cycle_id));
        }
        if cycle.status != CycleStatus::Paused {
            return Err(BillingError::NotPaused(cycle_id));
        }

        let sub_id = self.parse_subscription_id(&cycle.stripe_subscription_id)?;
        let current = Subscription::retrieve(self.stripe.inner(), &sub_id, &[]).await?;

        let mut metadata = current.metadata.clone();
        metadata.remove("paused_at");
        metadata.remove("paused_by");
        metadata.insert("resumed_at".to_string(), OffsetDateTime::now_utc().to_string());
        let mut update = UpdateSubscription::new();
        update.metadata = Some(metadata);
        if current.cancel_at_period_end {
            update.cancel_at_period_end = Some(false);
        }
        Subscription::update(self.stripe.inner(), &sub_id, update).await?;

        sqlx::query(
            r#"
            UPDATE subscription_cycles
            SET status = 'active', updated_at = NOW()
            WHERE id = $1 AND status = 'paused'
            "#,
        )
        .bind(cycle_id)
        .execute(&self.pool)
        .await?;

        if let Err(e) = self
            .event_logger
            .log_event(
                BillingEventBuilder::new(cycle.mentor_id, BillingEventType::CycleResumed)
                    .data(serde_json::json!({ "cycle_id": cycle_id }))
                    .actor(actor_id, ActorType::Admin),
            )
            .await
        {
            tracing::warn!(error = %e, "Failed to log resume event");
        }

        tracing::info!(cycle_id = %cycle_id, "Subscription resumed");
        Ok(())
    }

    // =========================================================================
    // Payment-state transitions (webhook / reconciler driven)
    // =========================================================================

    /// Conditionally transition `active -> past_due` for a Stripe
    /// subscription id. Always touches `updated_at` on the live cycle.
    /// Returns whether the transition happened; a missing live cycle is a
    /// benign no-op.
    pub async fn mark_past_due(&self, stripe_subscription_id: &str) -> BillingResult<bool> {
        let transitioned: Option<(Uuid, Uuid)> = sqlx::query_as(
            r#"
            UPDATE subscription_cycles
            SET status = 'past_due', updated_at = NOW()
            WHERE stripe_subscription_id = $1 AND status = 'active'
            RETURNING id, mentor_id
            "#,
        )
        .bind(stripe_subscription_id)
        .fetch_optional(&self.pool)
        .await?;

        match transitioned {
            Some((cycle_id, mentor_id)) => {
                if let Err(e) = self
                    .event_logger
                    .log_event(
                        BillingEventBuilder::new(mentor_id, BillingEventType::CyclePastDue)
                            .data(serde_json::json!({ "cycle_id": cycle_id }))
                            .stripe_subscription(stripe_subscription_id)
                            .actor_type(ActorType::Stripe),
                    )
                    .await
                {
                    tracing::warn!(error = %e, "Failed to log past_due event");
                }
                tracing::warn!(
                    cycle_id = %cycle_id,
                    stripe_subscription_id = %stripe_subscription_id,
                    "Cycle marked past_due"
                );
                Ok(true)
            }
            None => {
                sqlx::query(
                    r#"
                    UPDATE subscription_cycles
                    SET updated_at = NOW()
                    WHERE stripe_subscription_id = $1
                      AND status IN ('active', 'past_due', 'paused')
                    "#,
                )
                .bind(stripe_subscription_id)
                .execute(&self.pool)
                .await?;
                Ok(false)
            }
        }
    }

    /// Conditionally transition `past_due -> active` after the processor
    /// reports the payment recovered. Returns whether anything changed.
    pub async fn mark_recovered(&self, stripe_subscription_id: &str) -> BillingResult<bool> {
        let recovered: Option<(Uuid, Uuid)> = sqlx::query_as(
            r#"
            UPDATE subscription_cycles
            SET status = 'active', updated_at = NOW()
            WHERE stripe_subscription_id = $1 AND status = 'past_due'
            RETURNING id, mentor_id
            "#,
        )
        .bind(stripe_subscription_id)
        .fetch_optional(&self.pool)
        .await?;

        match recovered {
            Some((cycle_id, mentor_id)) => {
                if let Err(e) = self
                    .event_logger
                    .log_event(
                        BillingEventBuilder::new(
                            mentor_id,
                            BillingEventType::CyclePaymentRecovered,
                        )
                        .data(serde_json::json!({ "cycle_id": cycle_id }))
                        .stripe_subscription(stripe_subscription_id)
                        .actor_type(ActorType::System),
                    )
                    .await
                {
                    tracing::warn!(error = %e, "Failed to log recovery event");
                }
                tracing::info!(
                    cycle_id = %cycle_id,
                    stripe_subscription_id = %stripe_subscription_id,
                    "Cycle payment recovered"
                );
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn insert_cycle<'e, E>(&self, executor: E, new: &NewCycle) -> BillingResult<Cycle>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let cycle: Cycle = sqlx::query_as(
            r#"
            INSERT INTO subscription_cycles
                (mentor_id, plan_id, override_id, billed_price_cents, billed_seat_limit,
                 billing_period, status, stripe_subscription_id, stripe_customer_id,
                 stripe_invoice_id, stripe_price_id, period_start, period_end)
            VALUES ($1, $2, $3, $4, $5, $6, 'active', $7, $8, $9, $10, $11, $12)
            RETURNING *
            "#,
        )
        .bind(new.mentor_id)
        .bind(new.plan_id)
        .bind(new.override_id)
        .bind(new.billed_price_cents)
        .bind(new.billed_seat_limit)
        .bind(new.billing_period.as_str())
        .bind(&new.stripe_subscription_id)
        .bind(&new.stripe_customer_id)
        .bind(&new.stripe_invoice_id)
        .bind(&new.stripe_price_id)
        .bind(new.period_start)
        .bind(new.period_end)
        .fetch_one(executor)
        .await?;

        Ok(cycle)
    }

    async fn revoke_with_retry(&self, user_id: Uuid) {
        let strategy = ExponentialBackoff::from_millis(200).map(jitter).take(3);
        let result = Retry::spawn(strategy, || async {
            self.enrolment.revoke_memberships(user_id).await
        })
        .await;

        if let Err(e) = result {
            tracing::error!(
                user_id = %user_id,
                error = %e,
                "Failed to revoke course memberships after retries"
            );
        }
    }

    fn parse_subscription_id(&self, raw: &str) -> BillingResult<SubscriptionId> {
        raw.parse::<SubscriptionId>().map_err(|e| {
            BillingError::InvalidInput(format!("invalid Stripe subscription id {raw}: {e}"))
        })
    }
}
