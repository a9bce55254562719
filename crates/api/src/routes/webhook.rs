//! Stripe webhook endpoint
//!
//! Public by necessity — Stripe cannot authenticate with sessions.
//! Security rests entirely on HMAC signature verification of the raw
//! body. An invalid or missing signature is rejected with a client error
//! before any business logic runs. A verified event that fails internal
//! processing is still acknowledged with 200: Stripe's retry policy
//! cannot distinguish transient from permanent failures, so failing
//! loudly would only cause infinite redelivery of a permanently-failing
//! payload. The failure is recorded on the event's audit row instead.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;

use crate::state::AppState;

pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> (StatusCode, Json<serde_json::Value>) {
    let signature = headers
        .get("Stripe-Signature")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if body.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "Empty payload" })),
        );
    }

    let event = match state.billing.webhooks.verify_event(&body, signature) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(error = %e, "Rejected webhook with invalid signature");
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": "Invalid signature" })),
            );
        }
    };

    match state.billing.webhooks.handle_event(event).await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({ "received": true })),
        ),
        Err(e) => {
            tracing::error!(error = %e, "Webhook processing failed - acknowledging anyway");
            (
                StatusCode::OK,
                Json(serde_json::json!({
                    "received": true,
                    "warning": "Internal processing error logged"
                })),
            )
        }
    }
}
