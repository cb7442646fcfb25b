use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::aggregate::Summary;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Missing course code")]
    MissingCourseCode,

    #[error("Score must be an integer between 0 and 100")]
    InvalidScore,

    /// The voter is still inside the cooldown window. Carries the current
    /// unmodified summary so the caller can refresh its display without a
    /// second request.
    #[error("Cooldown active")]
    CooldownActive {
        retry_after_s: u64,
        summary: Summary,
    },

    #[error("Too many concurrent updates, try again")]
    Busy,

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),
}

impl From<StoreError> for AppError {
    fn from(error: StoreError) -> Self {
        match error {
            // Conflicts are retried inside the service; one that escapes
            // means the retry budget is gone.
            StoreError::Conflict => AppError::Busy,
            StoreError::Unavailable(reason) => AppError::StoreUnavailable(reason),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::CooldownActive {
                retry_after_s,
                summary,
            } => (
                StatusCode::TOO_MANY_REQUESTS,
                Json(json!({
                    "error": "Cooldown active",
                    "retry_after_s": retry_after_s,
                    "avg": summary.avg,
                    "count": summary.count,
                })),
            )
                .into_response(),

            AppError::Busy => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error": self.to_string() })),
            )
                .into_response(),

            AppError::StoreUnavailable(reason) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Store unavailable", "reason": reason })),
            )
                .into_response(),

            AppError::MissingCourseCode | AppError::InvalidScore => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": self.to_string() })),
            )
                .into_response(),
        }
    }
}
