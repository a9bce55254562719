//! HTTP error mapping
//!
//! Admin- and mentor-initiated paths surface billing errors with enough
//! detail to act on. Capacity denials never pass through here — the seat
//! manager returns them as typed values, not errors.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use mentorsub_billing::BillingError;

/// API-level error that renders as a JSON problem response
#[derive(Debug)]
pub struct ApiError(pub BillingError);

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            BillingError::PlanNotFound(_)
            | BillingError::CycleNotFound(_)
            | BillingError::UnknownStripeSubscription(_) => StatusCode::NOT_FOUND,
            BillingError::WebhookSignatureInvalid => StatusCode::BAD_REQUEST,
            BillingError::InvalidInput(_) | BillingError::MissingMetadata(_) => {
                StatusCode::BAD_REQUEST
            }
            BillingError::NoStripeSubscription(_) | BillingError::NotPaused(_) => {
                StatusCode::CONFLICT
            }
            BillingError::StripeApi(_) => StatusCode::BAD_GATEWAY,
            BillingError::WebhookEventNotSupported(_)
            | BillingError::NotificationFailed(_)
            | BillingError::Database(_)
            | BillingError::Config(_)
            | BillingError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed with internal error");
        }

        let body = Json(serde_json::json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
