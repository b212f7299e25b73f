//! Application error type mapping to HTTP status codes and the JSON
//! error envelope.
//!
//! Expected failures inside the conversation flow never reach this layer;
//! the master agent converts them into friendly chat responses. What maps
//! here is the request-level surface: bad payloads, unknown sessions, and
//! genuinely unexpected failures (a fixed `INTERNAL_ERROR` envelope).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use lendcore_types::error::SessionError;

/// Request-level error mapped to an HTTP response.
#[derive(Debug)]
pub enum ApiError {
    /// Malformed or incomplete request payload.
    BadRequest { code: &'static str, message: String },
    /// Session id does not resolve to a live conversation.
    SessionNotFound,
    /// Requested file does not exist.
    FileNotFound,
    /// Anything unexpected.
    Internal(String),
}

impl ApiError {
    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        ApiError::BadRequest {
            code,
            message: message.into(),
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::NotFound => ApiError::SessionNotFound,
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::BadRequest { code, message } => (StatusCode::BAD_REQUEST, code, message),
            ApiError::SessionNotFound => (
                StatusCode::NOT_FOUND,
                "SESSION_NOT_FOUND",
                "Session not found or expired".to_string(),
            ),
            ApiError::FileNotFound => (
                StatusCode::NOT_FOUND,
                "FILE_NOT_FOUND",
                "Requested file not found".to_string(),
            ),
            ApiError::Internal(detail) => {
                tracing::error!("internal error: {detail}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "Internal server error".to_string(),
                )
            }
        };

        let body = json!({
            "success": false,
            "error": message,
            "error_code": code,
        });
        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_error_maps_to_404() {
        let response = ApiError::from(SessionError::NotFound).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_internal_hides_detail() {
        let response = ApiError::Internal("secret stack trace".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
