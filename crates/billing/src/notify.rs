//! User notifications
//!
//! Delivers messages through the host platform's messaging endpoint.
//! Delivery follows the same non-fatal contract as the rest of the
//! external side effects: `Ok(true)` on delivery, `Ok(false)` when the
//! endpoint rejects or is unreachable. Callers log the miss and move on;
//! a failed notification never fails a ledger operation.

use std::time::Duration;

use sqlx::PgPool;
use uuid::Uuid;

use crate::error::BillingResult;

/// Notification configuration
#[derive(Debug, Clone)]
pub struct NotifyConfig {
    /// Base URL of the host messaging endpoint
    pub messaging_url: String,
    /// Bearer token for the messaging endpoint
    pub messaging_token: String,
    /// App name used in message subjects
    pub app_name: String,
}

impl NotifyConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        Self {
            messaging_url: std::env::var("MESSAGING_URL").unwrap_or_default(),
            messaging_token: std::env::var("MESSAGING_TOKEN").unwrap_or_default(),
            app_name: std::env::var("APP_NAME").unwrap_or_else(|_| "MentorSub".to_string()),
        }
    }

    /// Check if delivery is enabled
    pub fn is_enabled(&self) -> bool {
        !self.messaging_url.is_empty()
    }
}

/// Notification delivery service
#[derive(Clone)]
pub struct Notifier {
    config: NotifyConfig,
    client: reqwest::Client,
}

impl Notifier {
    pub fn new(config: NotifyConfig) -> Self {
        // Bounded timeout: a slow messaging endpoint must not stall a
        // webhook or a sweep iteration.
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        Self { config, client }
    }

    pub fn from_env() -> Self {
        Self::new(NotifyConfig::from_env())
    }

    /// Deliver a message to a user.
    ///
    /// Returns `Ok(true)` on delivery, `Ok(false)` on a rejected or failed
    /// send (non-fatal — the caller decides whether to record or retry).
    pub async fn send(&self, recipient_id: Uuid, subject: &str, body: &str) -> BillingResult<bool> {
        if !self.config.is_enabled() {
            tracing::warn!(
                recipient_id = %recipient_id,
                subject = %subject,
                "Messaging not configured, skipping notification"
            );
            return Ok(false);
        }

        let payload = serde_json::json!({
            "recipient_id": recipient_id,
            "subject": subject,
            "body": body,
        });

        let response = self
            .client
            .post(format!("{}/messages", self.config.messaging_url))
            .header(
                "Authorization",
                format!("Bearer {}", self.config.messaging_token),
            )
            .json(&payload)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => {
                tracing::info!(recipient_id = %recipient_id, subject = %subject, "Notification sent");
                Ok(true)
            }
            Ok(resp) => {
                let status = resp.status();
                tracing::error!(
                    recipient_id = %recipient_id,
                    subject = %subject,
                    status = %status,
                    "Notification rejected - non-fatal"
                );
                Ok(false)
            }
            Err(e) => {
                tracing::error!(
                    recipient_id = %recipient_id,
                    subject = %subject,
                    error = %e,
                    "Notification delivery failed - non-fatal"
                );
                Ok(false)
            }
        }
    }

    /// Renewal reminder for a cycle expiring in `days_before` days.
    pub async fn send_expiry_warning(
        &self,
        mentor_id: Uuid,
        days_before: i32,
    ) -> BillingResult<bool> {
        let subject = format!("{}: subscription renews soon", self.config.app_name);
        let body = format!(
            "Your mentor subscription reaches the end of its billing period in {} day(s). \
             If payment collection is active it will renew automatically; otherwise your \
             mentees will lose access at the period end.",
            days_before
        );
        self.send(mentor_id, &subject, &body).await
    }

    /// Welcome message after a mentee is added or reactivated.
    pub async fn send_mentee_activated(&self, mentee_id: Uuid) -> BillingResult<bool> {
        let subject = format!("{}: access granted", self.config.app_name);
        let body = "Your mentor has granted you access to the mentorship courses.".to_string();
        self.send(mentee_id, &subject, &body).await
    }

    /// Access-removed message after a mentee is deactivated.
    pub async fn send_mentee_deactivated(&self, mentee_id: Uuid) -> BillingResult<bool> {
        let subject = format!("{}: access suspended", self.config.app_name);
        let body = "Your access to the mentorship courses has been suspended by your mentor."
            .to_string();
        self.send(mentee_id, &subject, &body).await
    }
}

/// Notification type key for expiry reminders in `sent_notifications`.
pub const NOTIFICATION_TYPE_EXPIRY: &str = "expiry";

/// Dedup record store for outbound notifications.
///
/// A row keyed `(cycle_id, notification_type, days_before)` means "never
/// resend". The UNIQUE constraint makes recording race-safe: of two
/// concurrent sweep runs, only one insert wins.
#[derive(Clone)]
pub struct NotificationLog {
    pool: PgPool,
}

impl NotificationLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Whether a reminder was already sent for this (cycle, threshold).
    pub async fn already_sent(
        &self,
        cycle_id: Uuid,
        notification_type: &str,
        days_before: i32,
    ) -> BillingResult<bool> {
        let row: Option<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT id FROM sent_notifications
            WHERE cycle_id = $1 AND notification_type = $2 AND days_before = $3
            "#,
        )
        .bind(cycle_id)
        .bind(notification_type)
        .bind(days_before)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.is_some())
    }

    /// Record a sent reminder. Returns false when another run recorded it
    /// first (the UNIQUE key absorbed the insert).
    pub async fn record_sent(
        &self,
        cycle_id: Uuid,
        notification_type: &str,
        days_before: i32,
    ) -> BillingResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO sent_notifications (cycle_id, notification_type, days_before)
            VALUES ($1, $2, $3)
            ON CONFLICT (cycle_id, notification_type, days_before) DO NOTHING
            "#,
        )
        .bind(cycle_id)
        .bind(notification_type)
        .bind(days_before)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
