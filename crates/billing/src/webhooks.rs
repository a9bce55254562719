//! Stripe webhook handling
//!
//! Verifies, deduplicates and dispatches Stripe lifecycle events onto the
//! cycle ledger. Every handler is idempotent against redelivery: each one
//! is a conditional update or an existence check against current local
//! state, never a blind overwrite, so duplicate delivery, short-window
//! reordering and concurrent redelivery cannot corrupt the ledger.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use sqlx::PgPool;
use stripe::{
    CheckoutSession, Event, EventObject, EventType, Invoice, Subscription, SubscriptionId, Webhook,
};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::client::StripeClient;
use crate::error::{BillingError, BillingResult};
use crate::ledger::{Ledger, NewCycle};
use crate::pricing::PricingResolver;

type HmacSha256 = Hmac<Sha256>;

/// Webhook handler for Stripe events
pub struct WebhookHandler {
    stripe: StripeClient,
    pool: PgPool,
    ledger: Ledger,
    pricing: PricingResolver,
}

impl WebhookHandler {
    pub fn new(stripe: StripeClient, pool: PgPool) -> Self {
        let ledger = Ledger::new(stripe.clone(), pool.clone());
        let pricing = PricingResolver::new(pool.clone());
        Self {
            stripe,
            pool,
            ledger,
            pricing,
        }
    }

    /// Verify and parse a Stripe webhook event
    ///
    /// Tries the library verification first, then falls back to manual
    /// HMAC-SHA256 verification for payloads the pinned library version
    /// cannot parse through `construct_event`.
    pub fn verify_event(&self, payload: &str, signature: &str) -> BillingResult<Event> {
        let webhook_secret = &self.stripe.config().webhook_secret;

        match Webhook::construct_event(payload, signature, webhook_secret) {
            Ok(event) => return Ok(event),
            Err(e) => {
                tracing::warn!(
                    stripe_error = %e,
                    "Standard webhook parsing failed, trying manual verification"
                );
            }
        }

        verify_signature(payload, signature, webhook_secret, unix_now())?;

        // Signature checked out; parse the payload ourselves.
        let event: Event = serde_json::from_str(payload).map_err(|e| {
            tracing::error!(parse_error = %e, "Failed to parse webhook event JSON");
            BillingError::WebhookSignatureInvalid
        })?;

        tracing::info!(
            event_type = %event.type_,
            event_id = %event.id,
            "Manual webhook verification succeeded"
        );

        Ok(event)
    }

    /// Handle a verified Stripe event
    ///
    /// Uses INSERT...ON CONFLICT...RETURNING to atomically claim exclusive
    /// processing rights for this event id. Two concurrent deliveries of
    /// the same event cannot both pass — the loser sees no returned row
    /// and returns early. Events stuck in `processing` for over 30 minutes
    /// may be re-claimed (crash recovery).
    pub async fn handle_event(&self, event: Event) -> BillingResult<()> {
        let event_id = event.id.to_string();
        let event_type_str = event.type_.to_string();

        let event_timestamp = OffsetDateTime::from_unix_timestamp(event.created)
            .unwrap_or_else(|_| OffsetDateTime::now_utc());

        const PROCESSING_TIMEOUT_MINUTES: i32 = 30;

        let claimed: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO stripe_webhook_events
                (stripe_event_id, event_type, event_timestamp, processing_result, processing_started_at)
            VALUES ($1, $2, $3, 'processing', NOW())
            ON CONFLICT (stripe_event_id) DO UPDATE SET
                processing_result = 'processing',
                processing_started_at = NOW(),
                error_message = CONCAT('Recovered from stuck state at ', NOW()::TEXT)
            WHERE stripe_webhook_events.processing_result = 'processing'
              AND stripe_webhook_events.processing_started_at < NOW() - make_interval(mins => $4)
            RETURNING id
            "#,
        )
        .bind(&event_id)
        .bind(&event_type_str)
        .bind(event_timestamp)
        .bind(PROCESSING_TIMEOUT_MINUTES)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(
                event_id = %event_id,
                error = %e,
                "Failed to claim webhook event for processing"
            );
            BillingError::Database(e.to_string())
        })?;

        if claimed.is_none() {
            tracing::info!(
                event_id = %event_id,
                event_type = %event_type_str,
                "Duplicate webhook event - atomic idempotency check"
            );
            return Ok(());
        }

        tracing::info!(
            event_type = %event.type_,
            event_id = %event.id,
            "Processing Stripe webhook event"
        );

        let result = self.process_event_internal(&event).await;

        let (processing_result, error_message) = match &result {
            Ok(()) => ("success".to_string(), None),
            Err(e) => ("error".to_string(), Some(e.to_string())),
        };

        if let Err(e) = sqlx::query(
            r#"
            UPDATE stripe_webhook_events
            SET processing_result = $1, error_message = $2
            WHERE stripe_event_id = $3
            "#,
        )
        .bind(&processing_result)
        .bind(&error_message)
        .bind(&event_id)
        .execute(&self.pool)
        .await
        {
            tracing::error!(
                event_id = %event_id,
                error = %e,
                "Failed to update webhook audit record - event may appear stuck in 'processing'"
            );
        }

        result
    }

    /// Internal event dispatch. Unrecognized types are logged and ignored
    /// for forward compatibility.
    async fn process_event_internal(&self, event: &Event) -> BillingResult<()> {
        let event_owned = event.clone();

        match event.type_ {
            EventType::CheckoutSessionCompleted => {
                self.handle_checkout_completed(event_owned).await?;
            }
            EventType::InvoicePaid => {
                self.handle_invoice_paid(event_owned).await?;
            }
            EventType::InvoicePaymentFailed => {
                self.handle_invoice_payment_failed(event_owned).await?;
            }
            EventType::CustomerSubscriptionDeleted => {
                self.handle_subscription_deleted(event_owned).await?;
            }
            _ => {
                tracing::info!(
                    event_type = %event.type_,
                    event_id = %event.id,
                    "Received unhandled Stripe event type - no handler configured"
                );
            }
        }

        Ok(())
    }

    /// checkout.session.completed → create the initial cycle.
    ///
    /// Missing correlation metadata is a logged no-op, not an error — the
    /// session may belong to another product sharing the Stripe account.
    async fn handle_checkout_completed(&self, event: Event) -> BillingResult<()> {
        let session = self.extract_session(event)?;

        let Some((mentor_id, plan_id)) = self.correlation_from_metadata(&session) else {
            tracing::warn!(
                session_id = %session.id,
                "Checkout session has no mentor/plan metadata - skipping"
            );
            return Ok(());
        };

        let Some(stripe_subscription_id) = expandable_id(&session.subscription) else {
            tracing::warn!(
                session_id = %session.id,
                "Checkout session completed without a subscription - skipping"
            );
            return Ok(());
        };

        // Idempotency: a cycle for this subscription already exists when
        // the event is redelivered.
        if self
            .ledger
            .find_by_stripe_subscription(&stripe_subscription_id)
            .await?
            .is_some()
        {
            tracing::info!(
                stripe_subscription_id = %stripe_subscription_id,
                "Cycle already exists for subscription - duplicate checkout event"
            );
            return Ok(());
        }

        // Canonical period bounds come from the subscription object, not
        // the session.
        let sub_id = stripe_subscription_id
            .parse::<SubscriptionId>()
            .map_err(|e| BillingError::InvalidInput(format!("invalid subscription id: {e}")))?;
        let subscription = Subscription::retrieve(self.stripe.inner(), &sub_id, &[]).await?;

        let resolved = self
            .pricing
            .resolve(mentor_id, plan_id, OffsetDateTime::now_utc())
            .await?;

        let stripe_customer_id = match &subscription.customer {
            stripe::Expandable::Id(id) => id.to_string(),
            stripe::Expandable::Object(c) => c.id.to_string(),
        };

        let new = NewCycle {
            mentor_id,
            plan_id,
            override_id: resolved.override_id,
            billed_price_cents: resolved.price_cents,
            billed_seat_limit: resolved.seat_limit,
            billing_period: resolved.billing_period,
            stripe_subscription_id: stripe_subscription_id.clone(),
            stripe_customer_id,
            stripe_invoice_id: expandable_id(&subscription.latest_invoice),
            stripe_price_id: resolved.stripe_price_id,
            period_start: timestamp(subscription.current_period_start),
            period_end: timestamp(subscription.current_period_end),
        };

        let cycle = self.ledger.create_cycle(new).await?;

        tracing::info!(
            mentor_id = %mentor_id,
            cycle_id = %cycle.id,
            stripe_subscription_id = %stripe_subscription_id,
            "Checkout completed"
        );

        Ok(())
    }

    /// invoice.paid → process a renewal.
    ///
    /// Two idempotency gates: the invoice id must not already have
    /// produced a cycle (duplicate delivery), and an active local cycle
    /// must exist for the subscription (otherwise this is the first
    /// invoice, already covered by checkout completion, or an event that
    /// arrived before checkout completion — both benign no-ops).
    async fn handle_invoice_paid(&self, event: Event) -> BillingResult<()> {
        let invoice = self.extract_invoice(event)?;
        let invoice_id = invoice.id.to_string();

        let Some(stripe_subscription_id) = expandable_id(&invoice.subscription) else {
            tracing::debug!(invoice_id = %invoice_id, "Invoice not tied to a subscription - skipping");
            return Ok(());
        };

        if self.ledger.invoice_already_processed(&invoice_id).await? {
            tracing::info!(invoice_id = %invoice_id, "Invoice already produced a cycle - duplicate");
            return Ok(());
        }

        let Some(current) = self
            .ledger
            .find_active_by_stripe_subscription(&stripe_subscription_id)
            .await?
        else {
            tracing::info!(
                invoice_id = %invoice_id,
                stripe_subscription_id = %stripe_subscription_id,
                "No active local cycle for invoice - treating as first invoice"
            );
            return Ok(());
        };

        // Overrides may have changed since the previous cycle; resolve
        // again so the new snapshot carries current terms.
        let resolved = self
            .pricing
            .resolve(current.mentor_id, current.plan_id, OffsetDateTime::now_utc())
            .await?;

        // The snapshot price is what the invoice actually charged; the
        // line item period bounds the new cycle.
        let line = invoice.lines.as_ref().and_then(|l| l.data.first());
        let billed_price_cents = line.map(|l| l.amount).unwrap_or(resolved.price_cents);
        let period_start = line
            .and_then(|l| l.period.as_ref())
            .and_then(|p| p.start)
            .or(invoice.period_start)
            .map(timestamp)
            .unwrap_or(current.period_end);
        let period_end = line
            .and_then(|l| l.period.as_ref())
            .and_then(|p| p.end)
            .or(invoice.period_end)
            .map(timestamp)
            .unwrap_or(current.period_end);

        let new = NewCycle {
            mentor_id: current.mentor_id,
            plan_id: current.plan_id,
            override_id: resolved.override_id,
            billed_price_cents,
            billed_seat_limit: resolved.seat_limit,
            billing_period: resolved.billing_period,
            stripe_subscription_id: stripe_subscription_id.clone(),
            stripe_customer_id: current.stripe_customer_id.clone(),
            stripe_invoice_id: Some(invoice_id.clone()),
            stripe_price_id: resolved.stripe_price_id,
            period_start,
            period_end,
        };

        let cycle = self.ledger.renew(current.id, new).await?;

        tracing::info!(
            mentor_id = %cycle.mentor_id,
            previous_cycle_id = %current.id,
            cycle_id = %cycle.id,
            invoice_id = %invoice_id,
            "Renewal processed"
        );

        Ok(())
    }

    /// invoice.payment_failed → conditionally mark the cycle past_due.
    async fn handle_invoice_payment_failed(&self, event: Event) -> BillingResult<()> {
        let invoice = self.extract_invoice(event)?;
        let invoice_id = invoice.id.to_string();

        let Some(stripe_subscription_id) = expandable_id(&invoice.subscription) else {
            tracing::debug!(invoice_id = %invoice_id, "Failed invoice not tied to a subscription");
            return Ok(());
        };

        let transitioned = self.ledger.mark_past_due(&stripe_subscription_id).await?;

        tracing::warn!(
            invoice_id = %invoice_id,
            stripe_subscription_id = %stripe_subscription_id,
            transitioned = transitioned,
            "Invoice payment failed"
        );

        Ok(())
    }

    /// customer.subscription.deleted → expire the live cycle.
    ///
    /// When an admin already cancelled immediately, the local cycle is
    /// terminal and there is nothing to expire — benign no-op.
    async fn handle_subscription_deleted(&self, event: Event) -> BillingResult<()> {
        let subscription = self.extract_subscription(event)?;
        let stripe_subscription_id = subscription.id.to_string();

        match self
            .ledger
            .find_live_by_stripe_subscription(&stripe_subscription_id)
            .await?
        {
            Some(cycle) => {
                self.ledger.expire(cycle.id).await?;
                tracing::info!(
                    cycle_id = %cycle.id,
                    stripe_subscription_id = %stripe_subscription_id,
                    "Subscription terminated, cycle expired"
                );
            }
            None => {
                tracing::info!(
                    stripe_subscription_id = %stripe_subscription_id,
                    "Subscription deleted but no live local cycle - already handled"
                );
            }
        }

        Ok(())
    }

    // =========================================================================
    // Extraction helpers
    // =========================================================================

    fn extract_session(&self, event: Event) -> BillingResult<CheckoutSession> {
        match event.data.object {
            EventObject::CheckoutSession(session) => Ok(session),
            _ => Err(BillingError::WebhookEventNotSupported(
                "Expected CheckoutSession".to_string(),
            )),
        }
    }

    fn extract_subscription(&self, event: Event) -> BillingResult<Subscription> {
        match event.data.object {
            EventObject::Subscription(subscription) => Ok(subscription),
            _ => Err(BillingError::WebhookEventNotSupported(
                "Expected Subscription".to_string(),
            )),
        }
    }

    fn extract_invoice(&self, event: Event) -> BillingResult<Invoice> {
        match event.data.object {
            EventObject::Invoice(invoice) => Ok(invoice),
            _ => Err(BillingError::WebhookEventNotSupported(
                "Expected Invoice".to_string(),
            )),
        }
    }

    fn correlation_from_metadata(&self, session: &CheckoutSession) -> Option<(Uuid, Uuid)> {
        let metadata = session.metadata.as_ref()?;
        let mentor_id = metadata
            .get("mentor_id")
            .and_then(|s| Uuid::parse_str(s).ok())?;
        let plan_id = metadata
            .get("plan_id")
            .and_then(|s| Uuid::parse_str(s).ok())?;
        Some((mentor_id, plan_id))
    }
}

/// Extract the id from an optional expandable reference.
fn expandable_id<T: stripe::Object>(value: &Option<stripe::Expandable<T>>) -> Option<String>
where
    T::Id: ToString,
{
    match value {
        Some(stripe::Expandable::Id(id)) => Some(id.to_string()),
        Some(stripe::Expandable::Object(obj)) => Some(obj.id().to_string()),
        None => None,
    }
}

fn timestamp(unix: i64) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp(unix).unwrap_or_else(|_| OffsetDateTime::now_utc())
}

fn unix_now() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

/// Manually verify a `Stripe-Signature` header against the raw payload.
///
/// Header format: `t=<timestamp>,v1=<signature>[,v0=...]`. The signed
/// payload is `"{timestamp}.{payload}"` HMAC-SHA256'd with the webhook
/// secret (minus its `whsec_` prefix). Timestamps older than 5 minutes
/// are rejected to bound replay.
fn verify_signature(
    payload: &str,
    signature: &str,
    webhook_secret: &str,
    now: i64,
) -> BillingResult<()> {
    let mut timestamp: Option<i64> = None;
    let mut v1_signature: Option<String> = None;

    for part in signature.split(',') {
        let kv: Vec<&str> = part.splitn(2, '=').collect();
        if kv.len() == 2 {
            match kv[0] {
                "t" => timestamp = kv[1].parse().ok(),
                "v1" => v1_signature = Some(kv[1].to_string()),
                _ => {}
            }
        }
    }

    let timestamp = timestamp.ok_or_else(|| {
        tracing::error!("Missing timestamp in signature header");
        BillingError::WebhookSignatureInvalid
    })?;

    let v1_signature = v1_signature.ok_or_else(|| {
        tracing::error!("Missing v1 signature in signature header");
        BillingError::WebhookSignatureInvalid
    })?;

    const TOLERANCE_SECONDS: i64 = 300;
    if (now - timestamp).abs() > TOLERANCE_SECONDS {
        tracing::error!(
            timestamp = timestamp,
            now = now,
            "Webhook timestamp outside tolerance"
        );
        return Err(BillingError::WebhookSignatureInvalid);
    }

    let secret_key = webhook_secret
        .strip_prefix("whsec_")
        .unwrap_or(webhook_secret);
    let signed_payload = format!("{}.{}", timestamp, payload);

    let mut mac = HmacSha256::new_from_slice(secret_key.as_bytes())
        .map_err(|_| BillingError::WebhookSignatureInvalid)?;
    mac.update(signed_payload.as_bytes());
    let computed = hex::encode(mac.finalize().into_bytes());

    if computed != v1_signature {
        tracing::error!("Webhook signature mismatch");
        return Err(BillingError::WebhookSignatureInvalid);
    }

    Ok(())
}
