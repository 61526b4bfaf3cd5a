//! API error handling.
//!
//! Provides consistent error responses for the API.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::error::Error;

/// API error response body.
#[derive(Debug, Serialize)]
pub struct ApiErrorResponse {
    /// Error code for programmatic handling
    pub code: String,
    /// Human-readable error message
    pub message: String,
    /// Additional error details (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// API error type that can be converted to HTTP responses.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error.
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    /// Add details to the error.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Create a 400 Bad Request error.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    /// Create a 404 Not Found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    /// Create a 500 Internal Server Error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }

    /// Create a 502 Bad Gateway error.
    pub fn bad_gateway(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, code, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorResponse {
            code: self.code,
            message: self.message,
            details: self.details,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::Validation(msg) => ApiError::bad_request(msg),
            Error::Cancelled => ApiError::new(StatusCode::BAD_REQUEST, "CANCELLED", err.to_string()),
            Error::NoSuitableFormat(_) => {
                ApiError::new(StatusCode::NOT_FOUND, "NO_SUITABLE_FORMAT", err.to_string())
            }
            Error::ToolStart { .. } => {
                tracing::error!("Tool start failure: {}", err);
                ApiError::bad_gateway("TOOL_START_FAILED", err.to_string())
            }
            Error::ToolRuntime(ref pipeline) => {
                let details = serde_json::json!(
                    pipeline
                        .failures()
                        .iter()
                        .map(|f| serde_json::json!({
                            "stage": f.stage,
                            "code": f.code,
                            "diagnostics": f.diagnostics,
                        }))
                        .collect::<Vec<_>>()
                );
                tracing::warn!("Tool failure: {}", err);
                ApiError::bad_gateway("TOOL_FAILED", err.to_string()).with_details(details)
            }
            Error::OutputParse(_) => ApiError::bad_gateway("OUTPUT_PARSE_FAILED", err.to_string()),
            Error::ProxyUpstream(_) => ApiError::bad_gateway("BAD_GATEWAY", err.to_string()),
            Error::Configuration(msg) => {
                tracing::error!("Configuration error: {}", msg);
                ApiError::internal(msg)
            }
            Error::Io(ref e) => {
                tracing::error!("IO error: {}", e);
                ApiError::internal("IO error occurred")
            }
            Error::IoPath { .. } => {
                tracing::error!("IO error: {}", err);
                ApiError::internal("IO error occurred")
            }
            _ => {
                tracing::error!("Unexpected error: {}", err);
                ApiError::internal("An unexpected error occurred")
            }
        }
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use process_utils::{PipelineError, StageFailure};

    #[test]
    fn test_api_error_creation() {
        let err = ApiError::not_found("Nothing here");
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert_eq!(err.code, "NOT_FOUND");
        assert_eq!(err.message, "Nothing here");
    }

    #[test]
    fn test_status_mapping() {
        let cases = [
            (Error::validation("bad"), StatusCode::BAD_REQUEST),
            (Error::Cancelled, StatusCode::BAD_REQUEST),
            (Error::NoSuitableFormat("abc".into()), StatusCode::NOT_FOUND),
            (
                Error::ToolStart {
                    stage: "fetch".into(),
                    message: "not found".into(),
                },
                StatusCode::BAD_GATEWAY,
            ),
            (Error::output_parse("junk"), StatusCode::BAD_GATEWAY),
            (Error::ProxyUpstream("reset".into()), StatusCode::BAD_GATEWAY),
            (Error::config("bad agent"), StatusCode::INTERNAL_SERVER_ERROR),
            (Error::Other("boom".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            let label = err.to_string();
            assert_eq!(ApiError::from(err).status, status, "{label}");
        }
    }

    #[test]
    fn test_tool_failure_carries_stage_details() {
        let err = Error::ToolRuntime(PipelineError::StageFailed(vec![StageFailure {
            stage: "transcode".into(),
            code: Some(1),
            diagnostics: "Invalid data found".into(),
        }]));
        let api_err = ApiError::from(err);

        assert_eq!(api_err.code, "TOOL_FAILED");
        let details = api_err.details.unwrap();
        assert_eq!(details[0]["stage"], "transcode");
        assert_eq!(details[0]["code"], 1);
    }
}
