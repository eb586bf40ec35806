//! Identity echo endpoint.

use axum::{Extension, Json};
use serde::Serialize;

use crate::auth::AuthContext;

/// The caller's resolved identity and role decision.
#[derive(Debug, Serialize)]
pub struct MeResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub is_approver: bool,
}

/// Who the identity middleware resolved the caller to be. Front ends use
/// this to decide which actions to offer; it also makes proxy header
/// misconfiguration visible.
pub async fn me(Extension(ctx): Extension<AuthContext>) -> Json<MeResponse> {
    Json(MeResponse {
        display_name: ctx.identity.display_name,
        email: ctx.identity.email,
        is_approver: ctx.is_approver,
    })
}
