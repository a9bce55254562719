//! Subscription lifecycle routes

use axum::extract::{Path, Query, State};
use axum::Json;
use mentorsub_billing::{CheckoutResponse, Cycle, InvariantCheckSummary};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub mentor_id: Uuid,
    pub plan_id: Uuid,
}

/// Start a checkout session for a mentor subscribing to a plan.
pub async fn create_checkout(
    State(state): State<AppState>,
    Json(req): Json<CheckoutRequest>,
) -> ApiResult<Json<CheckoutResponse>> {
    let response = state
        .billing
        .checkout
        .create_subscription_checkout(req.mentor_id, req.plan_id)
        .await?;

    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
pub struct MentorQuery {
    pub mentor_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct SubscriptionSummary {
    pub cycle: Option<Cycle>,
    pub active_seats: i64,
    pub seat_limit: i32,
}

/// Current live cycle plus seat usage for the mentor dashboard. Paused
/// mentors still see their cycle (with a banner driven by its status).
pub async fn subscription_summary(
    State(state): State<AppState>,
    Query(query): Query<MentorQuery>,
) -> ApiResult<Json<SubscriptionSummary>> {
    let cycle = state.billing.ledger.live_of(query.mentor_id).await?;
    let active_seats = state.billing.seats.count_active(query.mentor_id).await?;
    let seat_limit = cycle.as_ref().map(|c| c.billed_seat_limit).unwrap_or(0);

    Ok(Json(SubscriptionSummary {
        cycle,
        active_seats,
        seat_limit,
    }))
}

/// Full billing history, newest first.
pub async fn subscription_history(
    State(state): State<AppState>,
    Query(query): Query<MentorQuery>,
) -> ApiResult<Json<Vec<Cycle>>> {
    let history = state.billing.ledger.history_of(query.mentor_id).await?;
    Ok(Json(history))
}

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    pub actor_id: Uuid,
    /// true: terminate now (local status pre-set to cancelled);
    /// false: cancel at period end (flag only).
    #[serde(default)]
    pub immediate: bool,
}

pub async fn cancel_subscription(
    State(state): State<AppState>,
    Path(cycle_id): Path<Uuid>,
    Json(req): Json<CancelRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    state
        .billing
        .ledger
        .request_cancellation(cycle_id, req.immediate, req.actor_id)
        .await?;

    Ok(Json(serde_json::json!({
        "cycle_id": cycle_id,
        "immediate": req.immediate,
    })))
}

#[derive(Debug, Deserialize)]
pub struct ActorRequest {
    pub actor_id: Uuid,
}

pub async fn pause_subscription(
    State(state): State<AppState>,
    Path(cycle_id): Path<Uuid>,
    Json(req): Json<ActorRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    state.billing.ledger.pause(cycle_id, req.actor_id).await?;
    Ok(Json(serde_json::json!({ "cycle_id": cycle_id, "status": "paused" })))
}

pub async fn resume_subscription(
    State(state): State<AppState>,
    Path(cycle_id): Path<Uuid>,
    Json(req): Json<ActorRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    state.billing.ledger.resume(cycle_id, req.actor_id).await?;
    Ok(Json(serde_json::json!({ "cycle_id": cycle_id, "status": "active" })))
}

/// Run the ledger consistency checks (admin surface).
pub async fn run_invariants(
    State(state): State<AppState>,
) -> ApiResult<Json<InvariantCheckSummary>> {
    let checker = mentorsub_billing::InvariantChecker::new(state.pool.clone());
    let summary = checker.run_all_checks().await?;
    Ok(Json(summary))
}
