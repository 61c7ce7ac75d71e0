use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use portal_infra::AllocationError;

use crate::app::services::ServiceError;

pub fn service_error_to_response(err: ServiceError) -> axum::response::Response {
    match err {
        ServiceError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        ServiceError::EmailTaken => json_error(
            StatusCode::CONFLICT,
            "email_taken",
            "email address is already registered",
        ),
        ServiceError::InvalidCredentials => json_error(
            StatusCode::UNAUTHORIZED,
            "invalid_credentials",
            "invalid credentials",
        ),
        ServiceError::Forbidden => json_error(
            StatusCode::FORBIDDEN,
            "forbidden",
            "you may only view your own activity",
        ),
        ServiceError::NotFound => json_error(StatusCode::NOT_FOUND, "not_found", "student not found"),
        ServiceError::Allocation(e @ AllocationError::RetryExhausted { .. }) => {
            tracing::warn!(error = %e, "student number allocation exhausted its retry budget");
            json_error(
                StatusCode::SERVICE_UNAVAILABLE,
                "allocation_contention",
                "registration is busy, please try again",
            )
        }
        ServiceError::Allocation(e) => {
            tracing::error!(error = %e, "student number allocation failed");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "allocation_failed", e.to_string())
        }
        ServiceError::StoreUnavailable(msg) => {
            tracing::error!(error = %msg, "store unavailable");
            json_error(
                StatusCode::SERVICE_UNAVAILABLE,
                "store_unavailable",
                "service temporarily unavailable, please try again later",
            )
        }
        ServiceError::Internal(msg) => {
            tracing::error!(error = %msg, "internal error");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", "internal server error")
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "success": false,
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
