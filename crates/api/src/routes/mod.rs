//! HTTP route definitions

pub mod mentees;
pub mod subscriptions;
pub mod webhook;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        // Stripe webhook endpoint (signed, unauthenticated)
        .route("/webhooks/stripe", post(webhook::stripe_webhook))
        // Subscription lifecycle
        .route(
            "/api/subscriptions/checkout",
            post(subscriptions::create_checkout),
        )
        .route(
            "/api/subscriptions/summary",
            get(subscriptions::subscription_summary),
        )
        .route(
            "/api/subscriptions/history",
            get(subscriptions::subscription_history),
        )
        .route(
            "/api/subscriptions/{cycle_id}/cancel",
            post(subscriptions::cancel_subscription),
        )
        .route(
            "/api/subscriptions/{cycle_id}/pause",
            post(subscriptions::pause_subscription),
        )
        .route(
            "/api/subscriptions/{cycle_id}/resume",
            post(subscriptions::resume_subscription),
        )
        // Mentee seats
        .route(
            "/api/mentees",
            post(mentees::add_mentee).get(mentees::list_mentees),
        )
        .route("/api/mentees/{mentee_id}/status", post(mentees::toggle_mentee))
        // Ledger consistency checks (admin)
        .route("/api/admin/invariants", get(subscriptions::run_invariants))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}
