use std::fmt;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::api_types::ErrorResponse;

#[derive(Debug)]
pub enum AuthError {
    /// No identity headers or claims document on the request
    MissingIdentity,

    /// Claims document header present but undecodable
    InvalidPrincipal(String),

    /// Authenticated but not allowed to use the service
    Forbidden(String),

    /// Internal error during authentication
    Internal(String),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, error_type, code, message) = match &self {
            AuthError::MissingIdentity => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                "missing_identity",
                "Authentication required".to_string(),
            ),
            AuthError::InvalidPrincipal(detail) => {
                tracing::warn!(detail = %detail, "Rejected malformed claims principal");
                (
                    StatusCode::UNAUTHORIZED,
                    "authentication_error",
                    "invalid_principal",
                    "Invalid authentication principal".to_string(),
                )
            }
            AuthError::Forbidden(msg) => (
                StatusCode::FORBIDDEN,
                "permission_error",
                "forbidden",
                msg.clone(),
            ),
            AuthError::Internal(msg) => {
                tracing::error!(error = %msg, "Authentication internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal_error",
                    "Internal authentication error".to_string(),
                )
            }
        };

        let body = ErrorResponse::with_type(error_type, code, message);
        (status, Json(body)).into_response()
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::MissingIdentity => write!(f, "Authentication required"),
            AuthError::InvalidPrincipal(detail) => {
                write!(f, "Invalid authentication principal: {}", detail)
            }
            AuthError::Forbidden(msg) => write!(f, "Access forbidden: {}", msg),
            AuthError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for AuthError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_identity_is_401() {
        let response = AuthError::MissingIdentity.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn forbidden_is_403() {
        let response = AuthError::Forbidden("not in an allowed group".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn invalid_principal_hides_detail() {
        let display = format!(
            "{}",
            AuthError::InvalidPrincipal("invalid base64: bad".to_string())
        );
        assert!(display.contains("invalid base64"));
        let response =
            AuthError::InvalidPrincipal("invalid base64: bad".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
