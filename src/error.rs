// src/error.rs

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// Global Application Error Enum.
/// Centralizes error handling and mapping to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    // 500 Internal Server Error
    InternalServerError(String),

    // 400 Bad Request
    BadRequest(String),

    // 401 Unauthorized
    AuthError(String),

    // 403 Forbidden (e.g., no access to a paid series)
    Forbidden(String),

    // 404 Not Found. Also used for attempts owned by someone else.
    NotFound(String),

    // 409 Conflict
    Conflict(String),

    /// The user has used every attempt the test allows.
    AttemptLimitExceeded { max_attempts: i32 },

    /// Test inactive or outside its availability window.
    TestUnavailable(String),

    /// The test does not allow answer review.
    ReviewNotAllowed,

    /// The attempt has not been graded yet, or results are withheld.
    NotReady(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::AttemptLimitExceeded { max_attempts } => write!(
                f,
                "You have already used all {} attempts for this test.",
                max_attempts
            ),
            AppError::ReviewNotAllowed => {
                write!(f, "Answer review is not available for this test.")
            }
            other => write!(f, "{:?}", other),
        }
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::AuthError(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::AttemptLimitExceeded { .. } => StatusCode::CONFLICT,
            AppError::TestUnavailable(_) => StatusCode::FORBIDDEN,
            AppError::ReviewNotAllowed => StatusCode::FORBIDDEN,
            AppError::NotReady(_) => StatusCode::CONFLICT,
        }
    }

    /// Stable machine-readable tag for clients.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::InternalServerError(_) => "internal_error",
            AppError::BadRequest(_) => "bad_request",
            AppError::AuthError(_) => "unauthorized",
            AppError::Forbidden(_) => "forbidden",
            AppError::NotFound(_) => "not_found",
            AppError::Conflict(_) => "conflict",
            AppError::AttemptLimitExceeded { .. } => "attempt_limit_exceeded",
            AppError::TestUnavailable(_) => "test_unavailable",
            AppError::ReviewNotAllowed => "review_not_allowed",
            AppError::NotReady(_) => "not_ready",
        }
    }
}

/// Implements `IntoResponse` for `AppError`.
/// Converts the error into a JSON response with appropriate HTTP status code.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let error_message = match self {
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                "Internal Server Error".to_string()
            }
            AppError::BadRequest(msg)
            | AppError::AuthError(msg)
            | AppError::Forbidden(msg)
            | AppError::NotFound(msg)
            | AppError::Conflict(msg)
            | AppError::TestUnavailable(msg)
            | AppError::NotReady(msg) => msg,
            other => other.to_string(),
        };
        let body = Json(json!({
            "error": error_message,
            "code": code,
        }));

        (status, body).into_response()
    }
}

/// Converts `sqlx::Error` into `AppError::InternalServerError`.
/// Allows using `?` operator on database queries.
impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::InternalServerError(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(err.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::BadRequest(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::InternalServerError(format!("collaborator request failed: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_errors_map_to_client_statuses() {
        assert_eq!(
            AppError::AttemptLimitExceeded { max_attempts: 1 }.status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::TestUnavailable("closed".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(AppError::ReviewNotAllowed.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(
            AppError::NotFound("attempt".into()).status_code(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn attempt_limit_message_names_the_limit() {
        let err = AppError::AttemptLimitExceeded { max_attempts: 3 };
        assert_eq!(
            err.to_string(),
            "You have already used all 3 attempts for this test."
        );
        assert_eq!(err.code(), "attempt_limit_exceeded");
    }
}
