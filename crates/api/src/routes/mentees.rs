//! Mentee seat routes
//!
//! Capacity denials are expected outcomes and come back as 200 responses
//! with a typed reason, not as errors.

use axum::extract::{Path, Query, State};
use axum::Json;
use mentorsub_billing::{AddMenteeOutcome, MenteeRecord, MenteeWithUser, SeatDenial, ToggleOutcome};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiResult;
use crate::routes::subscriptions::MentorQuery;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AddMenteeRequest {
    pub mentor_id: Uuid,
    pub mentee_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct AddMenteeResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mentee: Option<MenteeRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<SeatDenial>,
}

pub async fn add_mentee(
    State(state): State<AppState>,
    Json(req): Json<AddMenteeRequest>,
) -> ApiResult<Json<AddMenteeResponse>> {
    let outcome = state
        .billing
        .seats
        .add_mentee(req.mentor_id, req.mentee_id)
        .await?;

    let response = match outcome {
        AddMenteeOutcome::Added(record) => AddMenteeResponse {
            success: true,
            mentee: Some(record),
            reason: None,
        },
        AddMenteeOutcome::Denied(reason) => AddMenteeResponse {
            success: false,
            mentee: None,
            reason: Some(reason),
        },
    };

    Ok(Json(response))
}

pub async fn list_mentees(
    State(state): State<AppState>,
    Query(query): Query<MentorQuery>,
) -> ApiResult<Json<Vec<MenteeWithUser>>> {
    let mentees = state.billing.seats.mentees_of(query.mentor_id).await?;
    Ok(Json(mentees))
}

#[derive(Debug, Deserialize)]
pub struct ToggleRequest {
    pub mentor_id: Uuid,
    pub active: bool,
}

pub async fn toggle_mentee(
    State(state): State<AppState>,
    Path(mentee_id): Path<Uuid>,
    Json(req): Json<ToggleRequest>,
) -> ApiResult<Json<ToggleOutcome>> {
    let outcome = state
        .billing
        .seats
        .set_mentee_status(req.mentor_id, mentee_id, req.active)
        .await?;

    Ok(Json(outcome))
}
