//! API error types and responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use z_credits_core::{CreditError, IdError, ValidationError};
use z_credits_store::StoreError;

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Unauthorized - missing or invalid credentials.
    #[error("unauthorized")]
    Unauthorized,

    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Bad request - malformed input.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Input failed validation.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// A versioned write lost a race.
    #[error("version conflict: expected {expected:?}, found {actual:?}")]
    VersionConflict {
        /// Version the client sent.
        expected: Option<u64>,
        /// Version currently stored.
        actual: Option<u64>,
    },

    /// Insufficient credits.
    #[error("insufficient credits: balance={balance}, required={required}")]
    InsufficientCredits {
        /// Current balance.
        balance: i64,
        /// Required amount.
        required: i64,
    },

    /// A collaborator the request needs is not configured.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),

    /// External service error.
    #[error("external service error: {0}")]
    ExternalService(String),
}

/// JSON error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match &self {
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                self.to_string(),
                None,
            ),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone(), None),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone(), None),
            Self::Validation(err) => (
                StatusCode::BAD_REQUEST,
                "validation_error",
                err.to_string(),
                None,
            ),
            Self::VersionConflict { expected, actual } => (
                StatusCode::CONFLICT,
                "version_conflict",
                "Setting was modified concurrently; reload and retry".to_string(),
                Some(serde_json::json!({
                    "expected_version": expected,
                    "current_version": actual
                })),
            ),
            Self::InsufficientCredits { balance, required } => (
                StatusCode::PAYMENT_REQUIRED,
                "insufficient_credits",
                self.to_string(),
                Some(serde_json::json!({
                    "balance": balance,
                    "required": required
                })),
            ),
            Self::Unavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "unavailable",
                msg.clone(),
                None,
            ),
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                    None,
                )
            }
            Self::ExternalService(msg) => (
                StatusCode::BAD_GATEWAY,
                "external_service_error",
                msg.clone(),
                None,
            ),
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message,
                details,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => Self::NotFound(format!("{entity} not found: {id}")),
            StoreError::VersionConflict {
                expected, actual, ..
            } => Self::VersionConflict { expected, actual },
            StoreError::InsufficientCredits { balance, required } => {
                Self::InsufficientCredits { balance, required }
            }
            StoreError::Invalid(err) => Self::Validation(err),
            StoreError::Database(msg) | StoreError::Serialization(msg) => Self::Internal(msg),
        }
    }
}

impl From<CreditError> for ApiError {
    fn from(err: CreditError) -> Self {
        match err {
            CreditError::Validation(err) => Self::Validation(err),
            CreditError::InvalidId(err) => Self::from(err),
            CreditError::InsufficientCredits { balance, required } => {
                Self::InsufficientCredits { balance, required }
            }
            CreditError::NotFound { entity, id } => Self::NotFound(format!("{entity} not found: {id}")),
            CreditError::Storage(msg) => Self::Internal(msg),
            CreditError::ExternalService { service, message } => {
                Self::ExternalService(format!("{service}: {message}"))
            }
        }
    }
}

impl From<IdError> for ApiError {
    fn from(err: IdError) -> Self {
        Self::BadRequest(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_map_to_api_errors() {
        let conflict = StoreError::VersionConflict {
            entity: "topup_setting",
            id: "u".into(),
            expected: Some(1),
            actual: Some(2),
        };
        assert!(matches!(
            ApiError::from(conflict),
            ApiError::VersionConflict {
                expected: Some(1),
                actual: Some(2)
            }
        ));
        assert!(matches!(
            ApiError::from(StoreError::InsufficientCredits {
                balance: 1,
                required: 5
            }),
            ApiError::InsufficientCredits { .. }
        ));
        assert!(matches!(
            ApiError::from(StoreError::Invalid(ValidationError::SelfTransfer)),
            ApiError::Validation(_)
        ));
    }

    #[test]
    fn status_codes() {
        let cases = [
            (ApiError::Unauthorized, StatusCode::UNAUTHORIZED),
            (
                ApiError::Validation(ValidationError::SelfTransfer),
                StatusCode::BAD_REQUEST,
            ),
            (
                ApiError::VersionConflict {
                    expected: None,
                    actual: Some(1),
                },
                StatusCode::CONFLICT,
            ),
            (
                ApiError::InsufficientCredits {
                    balance: 0,
                    required: 1,
                },
                StatusCode::PAYMENT_REQUIRED,
            ),
            (
                ApiError::Unavailable("payments".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }
}
