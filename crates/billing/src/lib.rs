// Billing crate clippy configuration
// These are intentional patterns in this crate:
#![allow(clippy::too_many_arguments)] // Some Stripe operations require many parameters
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! MentorSub Billing Module
//!
//! Handles Stripe integration for mentor subscriptions: the billing-cycle
//! ledger, override-aware pricing resolution, seat capacity enforcement,
//! webhook processing and the audit event log.
//!
//! ## Features
//!
//! - **Cycle Ledger**: One immutable record per billing cycle; renewal,
//!   expiry and cancellation as ledger transitions
//! - **Pricing Overrides**: Per-mentor, time-windowed price/limit overrides
//!   resolved at checkout and every renewal
//! - **Seat Management**: Mentee seats gated by the live cycle's limit
//! - **Webhooks**: Verified, deduplicated Stripe event processing
//! - **Notifications**: Expiry reminders and mentee access messages
//! - **Invariants**: Runnable consistency checks over the ledger

pub mod checkout;
pub mod client;
pub mod enrolment;
pub mod error;
pub mod events;
pub mod invariants;
pub mod ledger;
pub mod notify;
pub mod pricing;
pub mod seats;
pub mod webhooks;

#[cfg(test)]
mod edge_case_tests;

// Checkout
pub use checkout::{CheckoutResponse, CheckoutService};

// Client
pub use client::{StripeClient, StripeConfig};

// Enrolment
pub use enrolment::{EnrolmentSync, MENTEE_ROLE_SCOPE, MENTOR_ROLE_SCOPE};

// Error
pub use error::{BillingError, BillingResult};

// Events
pub use events::{ActorType, BillingEvent, BillingEventBuilder, BillingEventLogger, BillingEventType};

// Invariants
pub use invariants::{
    InvariantCheckSummary, InvariantChecker, InvariantViolation, ViolationSeverity,
};

// Ledger
pub use ledger::{Cycle, Ledger, NewCycle};

// Notifications
pub use notify::{NotificationLog, Notifier, NotifyConfig, NOTIFICATION_TYPE_EXPIRY};

// Pricing
pub use pricing::{Plan, PlanOverride, PricingResolver, ResolvedPricing};

// Seats
pub use seats::{
    AddMenteeOutcome, CapacityGuard, MenteeRecord, MenteeWithUser, SeatDenial, ToggleOutcome,
};

// Webhooks
pub use webhooks::WebhookHandler;

use sqlx::PgPool;

/// Main billing service that combines all billing functionality
pub struct BillingService {
    pub checkout: CheckoutService,
    pub events: BillingEventLogger,
    pub ledger: Ledger,
    pub notifier: Notifier,
    pub pricing: PricingResolver,
    pub seats: CapacityGuard,
    pub webhooks: WebhookHandler,
}

impl BillingService {
    /// Create a new billing service from environment variables
    pub fn from_env(pool: PgPool) -> BillingResult<Self> {
        let stripe = StripeClient::from_env()?;
        Ok(Self::with_client(stripe, pool))
    }

    /// Create a new billing service with explicit config
    pub fn new(config: StripeConfig, pool: PgPool) -> Self {
        Self::with_client(StripeClient::new(config), pool)
    }

    fn with_client(stripe: StripeClient, pool: PgPool) -> Self {
        let notifier = Notifier::from_env();

        Self {
            checkout: CheckoutService::new(stripe.clone(), pool.clone()),
            events: BillingEventLogger::new(pool.clone()),
            ledger: Ledger::new(stripe.clone(), pool.clone()),
            notifier: notifier.clone(),
            pricing: PricingResolver::new(pool.clone()),
            seats: CapacityGuard::new(pool.clone(), notifier),
            webhooks: WebhookHandler::new(stripe, pool),
        }
    }
}
