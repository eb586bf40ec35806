//! Change request intake and workflow endpoints.
//!
//! Every handler here runs behind the identity middleware and reads the
//! caller's [`AuthContext`] from request extensions. Role gates (approver
//! only, owner or approver) live in the handlers; status-machine legality
//! and the New-only edit window are enforced by the service layer.

use axum::{
    Extension, Json,
    body::Bytes,
    extract::{Multipart, Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use uuid::Uuid;
use validator::Validate;

use super::ApiError;
use crate::{
    AppState,
    auth::AuthContext,
    models::{
        AuditEntry, ChangeRequest, ChangeRequestDetail, ChangeStatus, CreateChangeRequest,
        RejectRequest, TransitionRequest, UpdateChangeRequest,
    },
    services::AttachmentUpload,
};

fn require_approver(ctx: &AuthContext) -> Result<(), ApiError> {
    if ctx.is_approver {
        return Ok(());
    }
    Err(ApiError::new(
        StatusCode::FORBIDDEN,
        "approver_required",
        "This operation requires the approver role",
    ))
}

fn require_owner_or_approver(ctx: &AuthContext, requestor_email: &str) -> Result<(), ApiError> {
    if ctx.is_approver || ctx.identity.owns(requestor_email) {
        return Ok(());
    }
    Err(ApiError::new(
        StatusCode::FORBIDDEN,
        "not_request_owner",
        "Only the requestor or an approver can access this change request",
    ))
}

fn validate_payload<T: Validate>(payload: &T) -> Result<(), ApiError> {
    payload
        .validate()
        .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, "validation_error", e.to_string()))
}

/// `POST /api/change-requests`
///
/// Multipart form: one `payload` part carrying the JSON fields plus zero or
/// more `attachment` file parts. Requestor name and email always come from
/// the authenticated identity.
#[tracing::instrument(name = "api.change_requests.create", skip(state, ctx, multipart))]
pub async fn create(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let mut payload: Option<CreateChangeRequest> = None;
    let mut uploads: Vec<AttachmentUpload> = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        ApiError::new(
            StatusCode::BAD_REQUEST,
            "multipart_error",
            format!("Failed to read multipart field: {}", e),
        )
    })? {
        let field_name = field.name().unwrap_or_default().to_string();

        match field_name.as_str() {
            "payload" => {
                let text = field.text().await.map_err(|e| {
                    ApiError::new(
                        StatusCode::BAD_REQUEST,
                        "payload_read_error",
                        format!("Failed to read payload: {}", e),
                    )
                })?;
                payload = Some(serde_json::from_str(&text).map_err(|e| {
                    ApiError::new(
                        StatusCode::BAD_REQUEST,
                        "invalid_payload",
                        format!("Invalid payload JSON: {}", e),
                    )
                })?);
            }
            "attachment" => {
                let file_name = field
                    .file_name()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "attachment".to_string());
                let content_type = field
                    .content_type()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "application/octet-stream".to_string());
                let content = field.bytes().await.map_err(|e| {
                    ApiError::new(
                        StatusCode::BAD_REQUEST,
                        "file_read_error",
                        format!("Failed to read attachment: {}", e),
                    )
                })?;
                uploads.push(AttachmentUpload {
                    file_name,
                    content_type,
                    content: content.to_vec(),
                });
            }
            // Unknown parts are ignored so form quirks don't break intake
            _ => {}
        }
    }

    let payload = payload.ok_or_else(|| {
        ApiError::new(
            StatusCode::BAD_REQUEST,
            "missing_payload",
            "Multipart form must include a 'payload' JSON part",
        )
    })?;

    let detail = state.change_requests.create(&ctx, payload, uploads).await?;
    Ok((StatusCode::CREATED, Json(detail)).into_response())
}

/// `GET /api/change-requests`: every request, newest first. Approver only.
pub async fn list_all(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Json<Vec<ChangeRequest>>, ApiError> {
    require_approver(&ctx)?;
    Ok(Json(state.change_requests.list_all().await?))
}

/// `GET /api/change-requests/mine`: requests submitted by the caller.
pub async fn list_mine(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Json<Vec<ChangeRequest>>, ApiError> {
    Ok(Json(state.change_requests.list_mine(&ctx).await?))
}

/// `GET /api/change-requests/pending`: requests awaiting approval.
/// Approver only.
pub async fn list_pending(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Json<Vec<ChangeRequest>>, ApiError> {
    require_approver(&ctx)?;
    Ok(Json(state.change_requests.list_pending().await?))
}

/// `GET /api/change-requests/{id}`: one request with attachment metadata.
/// Owner or approver.
pub async fn get_one(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<ChangeRequestDetail>, ApiError> {
    let detail = state.change_requests.get(id).await?;
    require_owner_or_approver(&ctx, &detail.request.requestor_email)?;
    Ok(Json(detail))
}

/// `PUT /api/change-requests/{id}`: edit descriptive fields. Owner or
/// approver, and only while the request is still in New.
#[tracing::instrument(name = "api.change_requests.update", skip(state, ctx, payload))]
pub async fn update(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateChangeRequest>,
) -> Result<Json<ChangeRequestDetail>, ApiError> {
    let current = state.change_requests.get(id).await?;
    require_owner_or_approver(&ctx, &current.request.requestor_email)?;

    let detail = state.change_requests.update_details(&ctx, id, payload).await?;
    Ok(Json(detail))
}

/// `GET /api/change-requests/{id}/available-statuses`: the transitions the
/// state machine offers this caller. Empty for callers with neither role.
pub async fn available_statuses(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<ChangeStatus>>, ApiError> {
    let statuses = state.change_requests.available_statuses(&ctx, id).await?;
    Ok(Json(statuses))
}

/// `POST /api/change-requests/{id}/status`: generic transition. The state
/// machine decides legality from the caller's roles.
#[tracing::instrument(name = "api.change_requests.transition", skip(state, ctx, payload))]
pub async fn transition(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(payload): Json<TransitionRequest>,
) -> Result<Json<ChangeRequestDetail>, ApiError> {
    validate_payload(&payload)?;
    let detail = state
        .change_requests
        .transition(&ctx, id, payload.status, payload.comment)
        .await?;
    Ok(Json(detail))
}

/// `POST /api/change-requests/{id}/approve`: approve a request in New,
/// stamping the approver fields. Approver only.
#[tracing::instrument(name = "api.change_requests.approve", skip(state, ctx))]
pub async fn approve(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<ChangeRequestDetail>, ApiError> {
    require_approver(&ctx)?;
    Ok(Json(state.change_requests.approve(&ctx, id).await?))
}

/// `POST /api/change-requests/{id}/reject`: cancel a request in New with a
/// mandatory reason. Approver only.
#[tracing::instrument(name = "api.change_requests.reject", skip(state, ctx, payload))]
pub async fn reject(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(payload): Json<RejectRequest>,
) -> Result<Json<ChangeRequestDetail>, ApiError> {
    require_approver(&ctx)?;
    validate_payload(&payload)?;
    let detail = state
        .change_requests
        .reject(&ctx, id, &payload.reason)
        .await?;
    Ok(Json(detail))
}

/// `DELETE /api/change-requests/{id}`: remove a request, its attachments,
/// and its audit trail. Approver only.
#[tracing::instrument(name = "api.change_requests.delete", skip(state, ctx))]
pub async fn delete(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    require_approver(&ctx)?;
    state.change_requests.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/change-requests/{id}/audit`: the audit trail, oldest first.
/// Owner or approver.
pub async fn audit_trail(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<AuditEntry>>, ApiError> {
    let detail = state.change_requests.get(id).await?;
    require_owner_or_approver(&ctx, &detail.request.requestor_email)?;
    Ok(Json(state.change_requests.audit_trail(id).await?))
}

/// `GET /api/change-requests/{id}/attachments/{attachment_id}`: download
/// one attachment. Owner or approver.
pub async fn download_attachment(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path((id, attachment_id)): Path<(Uuid, Uuid)>,
) -> Result<Response, ApiError> {
    let detail = state.change_requests.get(id).await?;
    require_owner_or_approver(&ctx, &detail.request.requestor_email)?;

    let (attachment, content) = state
        .change_requests
        .download_attachment(id, attachment_id)
        .await?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, attachment.content_type),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", attachment.file_name),
            ),
        ],
        Bytes::from(content),
    )
        .into_response())
}

/// `DELETE /api/change-requests/{id}/attachments/{attachment_id}`: remove
/// one attachment. Owner or approver, only while the request is in New.
#[tracing::instrument(name = "api.change_requests.delete_attachment", skip(state, ctx))]
pub async fn delete_attachment(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path((id, attachment_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, ApiError> {
    let detail = state.change_requests.get(id).await?;
    require_owner_or_approver(&ctx, &detail.request.requestor_email)?;

    state
        .change_requests
        .delete_attachment(id, attachment_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(all(test, feature = "database-sqlite"))]
mod tests {
    use axum::{Router, body::Body};
    use http::{Request, StatusCode, header};
    use serde_json::{Value, json};
    use tempfile::TempDir;
    use tower::ServiceExt;

    const REQUESTOR_EMAIL: &str = "ada@example.com";
    const APPROVER_EMAIL: &str = "grace@example.com";
    const BOUNDARY: &str = "----TrajanTestBoundary7MA4YWxk";

    /// Build a full application over a fresh shared-memory database and a
    /// throwaway attachment directory. The returned TempDir must stay alive
    /// for the duration of the test.
    async fn test_app() -> (Router, TempDir) {
        use std::sync::atomic::{AtomicU64, Ordering};

        let _ = tracing_subscriber::fmt().with_test_writer().try_init();

        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let db_id = COUNTER.fetch_add(1, Ordering::SeqCst);

        let storage_dir = tempfile::tempdir().expect("create temp storage dir");

        let config_str = format!(
            r#"
[database]
type = "sqlite"
path = "file:test_routes_db_{}?mode=memory&cache=shared"
wal_mode = false

[storage.filesystem]
path = "{}"

[auth.approvers]
group_names = ["Change Approvers"]
"#,
            db_id,
            storage_dir.path().display()
        );

        let config =
            crate::config::ServiceConfig::from_str(&config_str).expect("parse test config");
        let state = crate::AppState::new(config.clone())
            .await
            .expect("create AppState");
        (crate::build_app(&config, state), storage_dir)
    }

    fn payload_json() -> Value {
        json!({
            "title": "Upgrade database server",
            "description": "Move the primary database to the new hardware",
            "service_affected": "Billing",
            "change_type": "normal",
            "priority": "medium",
        })
    }

    /// Hand-rolled multipart body: a `payload` JSON part followed by one
    /// `attachment` part per file.
    fn multipart_body(payload: &Value, files: &[(&str, &str, &[u8])]) -> Vec<u8> {
        let mut body = Vec::new();

        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        body.extend_from_slice(b"Content-Disposition: form-data; name=\"payload\"\r\n");
        body.extend_from_slice(b"Content-Type: application/json\r\n\r\n");
        body.extend_from_slice(payload.to_string().as_bytes());
        body.extend_from_slice(b"\r\n");

        for (file_name, content_type, content) in files {
            body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
            body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"attachment\"; filename=\"{}\"\r\n",
                    file_name
                )
                .as_bytes(),
            );
            body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", content_type).as_bytes());
            body.extend_from_slice(content);
            body.extend_from_slice(b"\r\n");
        }

        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
        body
    }

    fn requestor(builder: http::request::Builder) -> http::request::Builder {
        builder
            .header("X-MS-CLIENT-PRINCIPAL-NAME", REQUESTOR_EMAIL)
            .header("X-Auth-Request-User", "Ada Lovelace")
    }

    fn approver(builder: http::request::Builder) -> http::request::Builder {
        builder
            .header("X-MS-CLIENT-PRINCIPAL-NAME", APPROVER_EMAIL)
            .header("X-Auth-Request-User", "Grace Hopper")
            .header("X-Auth-Request-Groups", "Change Approvers")
    }

    fn outsider(builder: http::request::Builder) -> http::request::Builder {
        builder.header("X-MS-CLIENT-PRINCIPAL-NAME", "mallory@example.com")
    }

    fn json_request(method: &str, uri: &str) -> http::request::Builder {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    async fn send_raw(
        app: &Router,
        request: Request<Body>,
    ) -> (StatusCode, http::HeaderMap, axum::body::Bytes) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, headers, bytes)
    }

    /// Create a request as the requestor, asserting success, and return the
    /// response body.
    async fn create_request(app: &Router, files: &[(&str, &str, &[u8])]) -> Value {
        let body = multipart_body(&payload_json(), files);
        let request = requestor(
            Request::builder()
                .method("POST")
                .uri("/api/change-requests")
                .header(
                    header::CONTENT_TYPE,
                    format!("multipart/form-data; boundary={}", BOUNDARY),
                ),
        )
        .body(Body::from(body))
        .unwrap();

        let (status, json) = send(app, request).await;
        assert_eq!(status, StatusCode::CREATED, "create failed: {json}");
        json
    }

    async fn approve_request(app: &Router, id: &str) -> Value {
        let request = approver(json_request(
            "POST",
            &format!("/api/change-requests/{}/approve", id),
        ))
        .body(Body::empty())
        .unwrap();
        let (status, json) = send(app, request).await;
        assert_eq!(status, StatusCode::OK, "approve failed: {json}");
        json
    }

    #[tokio::test]
    async fn create_records_identity_and_initial_audit() {
        let (app, _storage) = test_app().await;

        let created = create_request(&app, &[("plan.txt", "text/plain", b"rollout plan")]).await;
        assert_eq!(created["status"], "new");
        assert_eq!(created["requestor_email"], REQUESTOR_EMAIL);
        assert_eq!(created["requestor_name"], "Ada Lovelace");
        assert_eq!(created["attachments"][0]["file_name"], "plan.txt");
        assert_eq!(created["attachments"][0]["size_bytes"], 12);

        let id = created["id"].as_str().unwrap();
        let (status, audit) = send(
            &app,
            requestor(json_request(
                "GET",
                &format!("/api/change-requests/{}/audit", id),
            ))
            .body(Body::empty())
            .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(audit.as_array().unwrap().len(), 1);
        assert_eq!(audit[0]["action"], "created");
        assert_eq!(audit[0]["actor"], REQUESTOR_EMAIL);
        assert_eq!(audit[0]["comment"], "Initial change request submission");
    }

    #[tokio::test]
    async fn create_without_payload_part_is_rejected() {
        let (app, _storage) = test_app().await;

        let mut body = Vec::new();
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
        let request = requestor(
            Request::builder()
                .method("POST")
                .uri("/api/change-requests")
                .header(
                    header::CONTENT_TYPE,
                    format!("multipart/form-data; boundary={}", BOUNDARY),
                ),
        )
        .body(Body::from(body))
        .unwrap();

        let (status, json) = send(&app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"]["code"], "missing_payload");
    }

    #[tokio::test]
    async fn create_with_blank_title_is_rejected() {
        let (app, _storage) = test_app().await;

        let mut payload = payload_json();
        payload["title"] = json!("   ");
        let body = multipart_body(&payload, &[]);
        let request = requestor(
            Request::builder()
                .method("POST")
                .uri("/api/change-requests")
                .header(
                    header::CONTENT_TYPE,
                    format!("multipart/form-data; boundary={}", BOUNDARY),
                ),
        )
        .body(Body::from(body))
        .unwrap();

        let (status, json) = send(&app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"]["code"], "validation_error");
    }

    #[tokio::test]
    async fn unauthenticated_requests_get_401() {
        let (app, _storage) = test_app().await;

        let request = Request::builder()
            .method("GET")
            .uri("/api/change-requests/mine")
            .body(Body::empty())
            .unwrap();

        let (status, json) = send(&app, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json["error"]["type"], "authentication_error");
    }

    #[tokio::test]
    async fn me_reports_identity_and_role() {
        let (app, _storage) = test_app().await;

        let (status, json) = send(
            &app,
            approver(json_request("GET", "/api/me"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["email"], APPROVER_EMAIL);
        assert_eq!(json["display_name"], "Grace Hopper");
        assert_eq!(json["is_approver"], true);

        let (_, json) = send(
            &app,
            requestor(json_request("GET", "/api/me"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(json["is_approver"], false);
    }

    #[tokio::test]
    async fn listing_all_requires_approver() {
        let (app, _storage) = test_app().await;
        create_request(&app, &[]).await;

        let (status, json) = send(
            &app,
            requestor(json_request("GET", "/api/change-requests"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(json["error"]["code"], "approver_required");
        assert_eq!(json["error"]["type"], "permission_error");

        let (status, json) = send(
            &app,
            approver(json_request("GET", "/api/change-requests"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn mine_returns_only_the_callers_requests() {
        let (app, _storage) = test_app().await;
        create_request(&app, &[]).await;

        let (status, json) = send(
            &app,
            requestor(json_request("GET", "/api/change-requests/mine"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json.as_array().unwrap().len(), 1);
        assert_eq!(json[0]["requestor_email"], REQUESTOR_EMAIL);

        let (status, json) = send(
            &app,
            outsider(json_request("GET", "/api/change-requests/mine"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(json.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn pending_lists_only_new_requests() {
        let (app, _storage) = test_app().await;
        let first = create_request(&app, &[]).await;
        create_request(&app, &[]).await;
        approve_request(&app, first["id"].as_str().unwrap()).await;

        let (status, json) = send(
            &app,
            approver(json_request("GET", "/api/change-requests/pending"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json.as_array().unwrap().len(), 1);
        assert_eq!(json[0]["status"], "new");

        let (status, _) = send(
            &app,
            requestor(json_request("GET", "/api/change-requests/pending"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn get_one_is_gated_to_owner_or_approver() {
        let (app, _storage) = test_app().await;
        let created = create_request(&app, &[]).await;
        let uri = format!("/api/change-requests/{}", created["id"].as_str().unwrap());

        let (status, _) = send(
            &app,
            requestor(json_request("GET", &uri))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send(
            &app,
            approver(json_request("GET", &uri))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, json) = send(
            &app,
            outsider(json_request("GET", &uri))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(json["error"]["code"], "not_request_owner");

        let (status, _) = send(
            &app,
            approver(json_request(
                "GET",
                &format!("/api/change-requests/{}", uuid::Uuid::new_v4()),
            ))
            .body(Body::empty())
            .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn update_is_limited_to_new_status() {
        let (app, _storage) = test_app().await;
        let created = create_request(&app, &[]).await;
        let id = created["id"].as_str().unwrap();
        let uri = format!("/api/change-requests/{}", id);

        let mut edited = payload_json();
        edited["title"] = json!("Upgrade database server (rescheduled)");
        let (status, json) = send(
            &app,
            requestor(json_request("PUT", &uri))
                .body(Body::from(edited.to_string()))
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["title"], "Upgrade database server (rescheduled)");

        let (_, audit) = send(
            &app,
            requestor(json_request(
                "GET",
                &format!("/api/change-requests/{}/audit", id),
            ))
            .body(Body::empty())
            .unwrap(),
        )
        .await;
        let entries = audit.as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1]["action"], "updated");
        assert_eq!(entries[1]["comment"], "Change request details updated");

        approve_request(&app, id).await;
        let (status, json) = send(
            &app,
            requestor(json_request("PUT", &uri))
                .body(Body::from(payload_json().to_string()))
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(
            json["error"]["message"]
                .as_str()
                .unwrap()
                .contains("New status"),
            "unexpected message: {json}"
        );
    }

    #[tokio::test]
    async fn outsider_cannot_update() {
        let (app, _storage) = test_app().await;
        let created = create_request(&app, &[]).await;
        let uri = format!("/api/change-requests/{}", created["id"].as_str().unwrap());

        let (status, _) = send(
            &app,
            outsider(json_request("PUT", &uri))
                .body(Body::from(payload_json().to_string()))
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn available_statuses_depend_on_role() {
        let (app, _storage) = test_app().await;
        let created = create_request(&app, &[]).await;
        let id = created["id"].as_str().unwrap();
        let uri = format!("/api/change-requests/{}/available-statuses", id);

        let (_, json) = send(
            &app,
            approver(json_request("GET", &uri))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(json, json!(["approved", "cancelled"]));

        let (_, json) = send(
            &app,
            requestor(json_request("GET", &uri))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(json, json!([]));

        approve_request(&app, id).await;
        let (_, json) = send(
            &app,
            requestor(json_request("GET", &uri))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(json, json!(["complete", "on_hold", "abandoned"]));
    }

    #[tokio::test]
    async fn owner_cannot_approve_via_status_endpoint() {
        let (app, _storage) = test_app().await;
        let created = create_request(&app, &[]).await;
        let id = created["id"].as_str().unwrap();

        let (status, json) = send(
            &app,
            requestor(json_request(
                "POST",
                &format!("/api/change-requests/{}/status", id),
            ))
            .body(Body::from(json!({"status": "approved"}).to_string()))
            .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"]["code"], "validation_error");

        let (_, detail) = send(
            &app,
            requestor(json_request(
                "GET",
                &format!("/api/change-requests/{}", id),
            ))
            .body(Body::empty())
            .unwrap(),
        )
        .await;
        assert_eq!(detail["status"], "new");
    }

    #[tokio::test]
    async fn approve_stamps_and_audits() {
        let (app, _storage) = test_app().await;
        let created = create_request(&app, &[]).await;
        let id = created["id"].as_str().unwrap();

        let approved = approve_request(&app, id).await;
        assert_eq!(approved["status"], "approved");
        assert_eq!(approved["approver_name"], "Grace Hopper");
        assert_eq!(approved["approver_email"], APPROVER_EMAIL);
        assert!(approved["approved_at"].is_string());

        let (_, audit) = send(
            &app,
            approver(json_request(
                "GET",
                &format!("/api/change-requests/{}/audit", id),
            ))
            .body(Body::empty())
            .unwrap(),
        )
        .await;
        let entries = audit.as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1]["action"], "approved");
        assert_eq!(entries[1]["old_status"], "new");
        assert_eq!(entries[1]["new_status"], "approved");
        assert_eq!(
            entries[1]["comment"],
            "Approved by Grace Hopper (grace@example.com)"
        );
    }

    #[tokio::test]
    async fn approve_requires_the_approver_role() {
        let (app, _storage) = test_app().await;
        let created = create_request(&app, &[]).await;

        let (status, json) = send(
            &app,
            requestor(json_request(
                "POST",
                &format!(
                    "/api/change-requests/{}/approve",
                    created["id"].as_str().unwrap()
                ),
            ))
            .body(Body::empty())
            .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(json["error"]["code"], "approver_required");
    }

    #[tokio::test]
    async fn reject_requires_a_reason_and_records_it() {
        let (app, _storage) = test_app().await;
        let created = create_request(&app, &[]).await;
        let id = created["id"].as_str().unwrap();
        let uri = format!("/api/change-requests/{}/reject", id);

        let (status, _) = send(
            &app,
            approver(json_request("POST", &uri))
                .body(Body::from(json!({"reason": "   "}).to_string()))
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, json) = send(
            &app,
            approver(json_request("POST", &uri))
                .body(Body::from(json!({"reason": "budget denied"}).to_string()))
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "cancelled");

        let (_, audit) = send(
            &app,
            approver(json_request(
                "GET",
                &format!("/api/change-requests/{}/audit", id),
            ))
            .body(Body::empty())
            .unwrap(),
        )
        .await;
        let entries = audit.as_array().unwrap();
        assert_eq!(entries.last().unwrap()["comment"], "budget denied");
    }

    #[tokio::test]
    async fn owner_completes_after_approval() {
        let (app, _storage) = test_app().await;
        let created = create_request(&app, &[]).await;
        let id = created["id"].as_str().unwrap();
        approve_request(&app, id).await;

        let uri = format!("/api/change-requests/{}/status", id);
        let (status, json) = send(
            &app,
            requestor(json_request("POST", &uri))
                .body(Body::from(
                    json!({"status": "complete", "comment": "Done during the window"}).to_string(),
                ))
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "complete");

        // Complete is terminal
        let (status, _) = send(
            &app,
            requestor(json_request("POST", &uri))
                .body(Body::from(json!({"status": "on_hold"}).to_string()))
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn delete_requires_approver_and_removes_everything() {
        let (app, _storage) = test_app().await;
        let created = create_request(&app, &[("notes.txt", "text/plain", b"scope")]).await;
        let id = created["id"].as_str().unwrap();
        let uri = format!("/api/change-requests/{}", id);

        let (status, _) = send(
            &app,
            requestor(json_request("DELETE", &uri))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = send(
            &app,
            approver(json_request("DELETE", &uri))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = send(
            &app,
            approver(json_request("GET", &uri))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn attachment_download_round_trips() {
        let (app, _storage) = test_app().await;
        let content = b"quarterly capacity report";
        let created = create_request(&app, &[("report.csv", "text/csv", content)]).await;
        let id = created["id"].as_str().unwrap();
        let attachment_id = created["attachments"][0]["id"].as_str().unwrap();
        let uri = format!("/api/change-requests/{}/attachments/{}", id, attachment_id);

        let (status, headers, bytes) = send_raw(
            &app,
            requestor(json_request("GET", &uri))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CONTENT_TYPE.as_str()], "text/csv");
        assert_eq!(
            headers[header::CONTENT_DISPOSITION.as_str()],
            "attachment; filename=\"report.csv\""
        );
        assert_eq!(bytes.as_ref(), content);

        let (status, _, _) = send_raw(
            &app,
            outsider(json_request("GET", &uri))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = send(
            &app,
            requestor(json_request(
                "GET",
                &format!(
                    "/api/change-requests/{}/attachments/{}",
                    id,
                    uuid::Uuid::new_v4()
                ),
            ))
            .body(Body::empty())
            .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn attachment_delete_is_limited_to_new_status() {
        let (app, _storage) = test_app().await;
        let created = create_request(&app, &[("draft.txt", "text/plain", b"v1")]).await;
        let id = created["id"].as_str().unwrap();
        let attachment_id = created["attachments"][0]["id"].as_str().unwrap();
        let uri = format!("/api/change-requests/{}/attachments/{}", id, attachment_id);

        let (status, _) = send(
            &app,
            requestor(json_request("DELETE", &uri))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (_, detail) = send(
            &app,
            requestor(json_request("GET", &format!("/api/change-requests/{}", id)))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert!(detail["attachments"].as_array().unwrap().is_empty());

        // A second attachment survives approval and can no longer be removed
        let created = create_request(&app, &[("final.txt", "text/plain", b"v2")]).await;
        let id = created["id"].as_str().unwrap();
        let attachment_id = created["attachments"][0]["id"].as_str().unwrap();
        approve_request(&app, id).await;

        let (status, json) = send(
            &app,
            requestor(json_request(
                "DELETE",
                &format!("/api/change-requests/{}/attachments/{}", id, attachment_id),
            ))
            .body(Body::empty())
            .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"]["code"], "validation_error");
    }
}
