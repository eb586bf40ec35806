use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::api_types::ErrorResponse;
use crate::db::DbError;
use crate::services::{ChangeRequestError, FileStorageError};

/// Error response for API requests.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    /// Create a new API error
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let error_type = match self.status {
            StatusCode::UNAUTHORIZED => "authentication_error",
            StatusCode::FORBIDDEN => "permission_error",
            status if status.is_server_error() => "internal_error",
            _ => "invalid_request_error",
        };
        let body = ErrorResponse::with_type(error_type, self.code, self.message);
        (self.status, Json(body)).into_response()
    }
}

impl From<DbError> for ApiError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotConfigured => Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "database_required",
                "Database not configured",
            ),
            _ => {
                tracing::error!(error = %err, "Database error");
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "database_error",
                    "An internal database error occurred",
                )
            }
        }
    }
}

impl From<FileStorageError> for ApiError {
    fn from(err: FileStorageError) -> Self {
        match err {
            // Metadata row exists but the blob is gone
            FileStorageError::NotFound(key) => {
                tracing::error!(storage_key = %key, "Attachment content missing from storage");
                Self::new(
                    StatusCode::NOT_FOUND,
                    "not_found",
                    "Attachment content not found",
                )
            }
            _ => {
                tracing::error!(error = %err, "File storage error");
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "storage_error",
                    "An internal storage error occurred",
                )
            }
        }
    }
}

impl From<ChangeRequestError> for ApiError {
    fn from(err: ChangeRequestError) -> Self {
        match err {
            ChangeRequestError::Validation(msg) => {
                Self::new(StatusCode::BAD_REQUEST, "validation_error", msg)
            }
            ChangeRequestError::NotFound => {
                Self::new(StatusCode::NOT_FOUND, "not_found", "Resource not found")
            }
            ChangeRequestError::Database(db_err) => db_err.into(),
            ChangeRequestError::Storage(storage_err) => storage_err.into(),
        }
    }
}
