//! Billing audit events
//!
//! Append-only event logging for every billing operation. Events answer
//! "why is this mentor on these terms?" questions and let the webhook
//! history be reconstructed after the fact. Logging failures are reported
//! to callers as warnings, never as operation failures.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;

/// Types of billing events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BillingEventType {
    // Cycle lifecycle
    CycleCreated,
    CycleRenewed,
    CyclePastDue,
    CyclePaymentRecovered,
    CycleExpired,
    CycleCancelled,
    CycleCancelScheduled,
    CyclePaused,
    CycleResumed,

    // Seats
    MenteeAdded,
    MenteeActivated,
    MenteeDeactivated,

    // Background repair
    ReconcilerRepair,
}

impl std::fmt::Display for BillingEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BillingEventType::CycleCreated => "CYCLE_CREATED",
            BillingEventType::CycleRenewed => "CYCLE_RENEWED",
            BillingEventType::CyclePastDue => "CYCLE_PAST_DUE",
            BillingEventType::CyclePaymentRecovered => "CYCLE_PAYMENT_RECOVERED",
            BillingEventType::CycleExpired => "CYCLE_EXPIRED",
            BillingEventType::CycleCancelled => "CYCLE_CANCELLED",
            BillingEventType::CycleCancelScheduled => "CYCLE_CANCEL_SCHEDULED",
            BillingEventType::CyclePaused => "CYCLE_PAUSED",
            BillingEventType::CycleResumed => "CYCLE_RESUMED",
            BillingEventType::MenteeAdded => "MENTEE_ADDED",
            BillingEventType::MenteeActivated => "MENTEE_ACTIVATED",
            BillingEventType::MenteeDeactivated => "MENTEE_DEACTIVATED",
            BillingEventType::ReconcilerRepair => "RECONCILER_REPAIR",
        };
        write!(f, "{}", s)
    }
}

/// Who triggered the event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActorType {
    /// Mentor through the dashboard
    User,
    /// Admin user
    Admin,
    /// System automation (reconciler, notifier)
    System,
    /// Stripe webhook
    Stripe,
}

impl std::fmt::Display for ActorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActorType::User => write!(f, "user"),
            ActorType::Admin => write!(f, "admin"),
            ActorType::System => write!(f, "system"),
            ActorType::Stripe => write!(f, "stripe"),
        }
    }
}

/// A stored billing event record
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct BillingEvent {
    pub id: Uuid,
    pub mentor_id: Uuid,
    pub event_type: String,
    pub event_data: serde_json::Value,
    pub stripe_event_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub stripe_invoice_id: Option<String>,
    pub actor_id: Option<Uuid>,
    pub actor_type: String,
    pub created_at: OffsetDateTime,
}

/// Builder for creating billing events
pub struct BillingEventBuilder {
    mentor_id: Uuid,
    event_type: BillingEventType,
    event_data: serde_json::Value,
    stripe_event_id: Option<String>,
    stripe_subscription_id: Option<String>,
    stripe_invoice_id: Option<String>,
    actor_id: Option<Uuid>,
    actor_type: ActorType,
}

impl BillingEventBuilder {
    pub fn new(mentor_id: Uuid, event_type: BillingEventType) -> Self {
        Self {
            mentor_id,
            event_type,
            event_data: serde_json::json!({}),
            stripe_event_id: None,
            stripe_subscription_id: None,
            stripe_invoice_id: None,
            actor_id: None,
            actor_type: ActorType::System,
        }
    }

    pub fn data(mut self, data: serde_json::Value) -> Self {
        self.event_data = data;
        self
    }

    pub fn stripe_event(mut self, event_id: impl Into<String>) -> Self {
        self.stripe_event_id = Some(event_id.into());
        self
    }

    pub fn stripe_subscription(mut self, subscription_id: impl Into<String>) -> Self {
        self.stripe_subscription_id = Some(subscription_id.into());
        self
    }

    pub fn stripe_invoice(mut self, invoice_id: impl Into<String>) -> Self {
        self.stripe_invoice_id = Some(invoice_id.into());
        self
    }

    pub fn actor(mut self, actor_id: Uuid, actor_type: ActorType) -> Self {
        self.actor_id = Some(actor_id);
        self.actor_type = actor_type;
        self
    }

    pub fn actor_type(mut self, actor_type: ActorType) -> Self {
        self.actor_type = actor_type;
        self
    }
}

/// Append-only billing event logger
#[derive(Clone)]
pub struct BillingEventLogger {
    pool: PgPool,
}

impl BillingEventLogger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert an event row. Never updates or deletes.
    pub async fn log_event(&self, builder: BillingEventBuilder) -> BillingResult<Uuid> {
        let id = Uuid::new_v4();

        sqlx::query(
            r#"
            INSERT INTO billing_events
                (id, mentor_id, event_type, event_data, stripe_event_id,
                 stripe_subscription_id, stripe_invoice_id, actor_id, actor_type)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(id)
        .bind(builder.mentor_id)
        .bind(builder.event_type.to_string())
        .bind(&builder.event_data)
        .bind(&builder.stripe_event_id)
        .bind(&builder.stripe_subscription_id)
        .bind(&builder.stripe_invoice_id)
        .bind(builder.actor_id)
        .bind(builder.actor_type.to_string())
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    /// Recent events for a mentor, newest first.
    pub async fn events_for_mentor(
        &self,
        mentor_id: Uuid,
        limit: i64,
    ) -> BillingResult<Vec<BillingEvent>> {
        let events: Vec<BillingEvent> = sqlx::query_as(
            r#"
            SELECT id, mentor_id, event_type, event_data, stripe_event_id,
                   stripe_subscription_id, stripe_invoice_id, actor_id, actor_type,
                   created_at
            FROM billing_events
            WHERE mentor_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(mentor_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_display_is_screaming_snake() {
        assert_eq!(BillingEventType::CycleCreated.to_string(), "CYCLE_CREATED");
        assert_eq!(
            BillingEventType::CyclePaymentRecovered.to_string(),
            "CYCLE_PAYMENT_RECOVERED"
        );
        assert_eq!(
            BillingEventType::ReconcilerRepair.to_string(),
            "RECONCILER_REPAIR"
        );
    }

    #[test]
    fn actor_type_display_is_lowercase() {
        assert_eq!(ActorType::Stripe.to_string(), "stripe");
        assert_eq!(ActorType::System.to_string(), "system");
    }

    #[test]
    fn builder_defaults_to_system_actor() {
        let builder = BillingEventBuilder::new(Uuid::new_v4(), BillingEventType::CycleCreated);
        assert_eq!(builder.actor_type, ActorType::System);
        assert!(builder.actor_id.is_none());
    }
}
