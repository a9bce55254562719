//! Stripe Checkout sessions

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use stripe::{CheckoutSession, CheckoutSessionMode, CreateCheckoutSession,
    CreateCheckoutSessionLineItems};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::client::StripeClient;
use crate::error::{BillingError, BillingResult};
use crate::pricing::PricingResolver;

/// What the API returns to redirect the mentor into payment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutResponse {
    pub session_id: String,
    pub checkout_url: String,
}

/// Checkout service for creating Stripe checkout sessions
pub struct CheckoutService {
    stripe: StripeClient,
    pricing: PricingResolver,
}

impl CheckoutService {
    pub fn new(stripe: StripeClient, pool: PgPool) -> Self {
        let pricing = PricingResolver::new(pool);
        Self { stripe, pricing }
    }

    /// Create a checkout session for a mentor subscribing to a plan.
    ///
    /// Pricing is resolved here so the session carries the
    /// override-resolved Stripe price; the webhook handler re-resolves at
    /// completion time for the snapshot, since an override can change
    /// while the mentor sits on the payment page.
    pub async fn create_subscription_checkout(
        &self,
        mentor_id: Uuid,
        plan_id: Uuid,
    ) -> BillingResult<CheckoutResponse> {
        let resolved = self
            .pricing
            .resolve(mentor_id, plan_id, OffsetDateTime::now_utc())
            .await?;

        let base_url = &self.stripe.config().app_base_url;
        let success_url = format!(
            "{}/subscribe/success?session_id={{CHECKOUT_SESSION_ID}}",
            base_url
        );
        let cancel_url = format!("{}/subscribe/cancel", base_url);

        // The webhook handler correlates the completed session back to the
        // mentor and plan through this metadata.
        let mut metadata = std::collections::HashMap::new();
        metadata.insert("mentor_id".to_string(), mentor_id.to_string());
        metadata.insert("plan_id".to_string(), plan_id.to_string());

        let line_items = vec![CreateCheckoutSessionLineItems {
            price: Some(resolved.stripe_price_id.clone()),
            quantity: Some(1),
            ..Default::default()
        }];

        let params = CreateCheckoutSession {
            mode: Some(CheckoutSessionMode::Subscription),
            line_items: Some(line_items),
            success_url: Some(&success_url),
            cancel_url: Some(&cancel_url),
            metadata: Some(metadata),
            ..Default::default()
        };

        let session = CheckoutSession::create(self.stripe.inner(), params).await?;

        let checkout_url = session
            .url
            .clone()
            .ok_or_else(|| BillingError::StripeApi("checkout session has no URL".to_string()))?;

        tracing::info!(
            mentor_id = %mentor_id,
            plan_id = %plan_id,
            session_id = %session.id,
            stripe_price_id = %resolved.stripe_price_id,
            "Created checkout session"
        );

        Ok(CheckoutResponse {
            session_id: session.id.to_string(),
            checkout_url,
        })
    }
}
