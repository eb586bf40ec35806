use serde::{Deserialize, Serialize};

/// Standard error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error information
    pub error: ErrorInfo,
}

/// Error information returned to API callers.
///
/// Format: `{"error": {"type": "...", "message": "...", "code": ...}}`
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Error type classification (e.g., "invalid_request_error", "authentication_error")
    #[serde(rename = "type")]
    pub error_type: String,
    /// Human-readable error message
    pub message: String,
    /// Machine-readable error code (null if not applicable)
    pub code: Option<String>,
}

impl ErrorResponse {
    /// Create a new error response with the default "invalid_request_error" type.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorInfo {
                error_type: "invalid_request_error".to_string(),
                message: message.into(),
                code: Some(code.into()),
            },
        }
    }

    /// Create a new error response with an explicit error type.
    pub fn with_type(
        error_type: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            error: ErrorInfo {
                error_type: error_type.into(),
                message: message.into(),
                code: Some(code.into()),
            },
        }
    }
}
