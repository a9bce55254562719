//! Billing error types

use thiserror::Error;
use uuid::Uuid;

/// Billing-specific errors
///
/// Capacity denials are deliberately NOT errors: they are expected
/// business outcomes returned as typed values from the seat manager.
#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Stripe API error: {0}")]
    StripeApi(String),

    #[error("Plan not found: {0}")]
    PlanNotFound(Uuid),

    #[error("Subscription cycle not found: {0}")]
    CycleNotFound(Uuid),

    #[error("No subscription cycle for Stripe subscription: {0}")]
    UnknownStripeSubscription(String),

    #[error("Cycle {0} has no Stripe subscription id")]
    NoStripeSubscription(Uuid),

    #[error("Cycle {0} is not paused")]
    NotPaused(Uuid),

    #[error("Webhook signature verification failed")]
    WebhookSignatureInvalid,

    #[error("Webhook event type not supported: {0}")]
    WebhookEventNotSupported(String),

    #[error("Missing required metadata: {0}")]
    MissingMetadata(String),

    #[error("Notification delivery failed: {0}")]
    NotificationFailed(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<stripe::StripeError> for BillingError {
    fn from(err: stripe::StripeError) -> Self {
        BillingError::StripeApi(err.to_string())
    }
}

impl From<sqlx::Error> for BillingError {
    fn from(err: sqlx::Error) -> Self {
        BillingError::Database(err.to_string())
    }
}

pub type BillingResult<T> = Result<T, BillingError>;
