use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use super::{FileStorage, FileStorageError};
use crate::{
    auth::AuthContext,
    db::{DbError, DbPool},
    models::{
        Attachment, AuditAction, AuditEntry, ChangeRequest, ChangeRequestDetail, ChangeStatus,
        CreateAttachment, CreateAuditEntry, CreateChangeRequest, NewChangeRequest,
        UpdateChangeRequest,
    },
};

/// Errors that can occur in the ChangeRequestService.
///
/// Role failures (approver-only endpoints, owner checks) are decided at the
/// HTTP layer before the service is called; this taxonomy covers everything
/// the service itself can reject.
#[derive(Debug, Error)]
pub enum ChangeRequestError {
    #[error("{0}")]
    Validation(String),

    #[error("Not found")]
    NotFound,

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Storage error: {0}")]
    Storage(#[from] FileStorageError),
}

pub type ChangeRequestResult<T> = Result<T, ChangeRequestError>;

/// An attachment as received from the upload form, before its bytes have
/// been handed to the storage backend.
pub struct AttachmentUpload {
    pub file_name: String,
    pub content_type: String,
    pub content: Vec<u8>,
}

/// Service layer for the change request workflow.
///
/// Orchestrates the repository (entity, attachment metadata, audit trail)
/// and the file storage backend (attachment bytes). Every mutating
/// operation writes its audit entry in the same repository transaction as
/// the entity change.
#[derive(Clone)]
pub struct ChangeRequestService {
    db: Arc<DbPool>,
    storage: Arc<dyn FileStorage>,
}

impl ChangeRequestService {
    pub fn new(db: Arc<DbPool>, storage: Arc<dyn FileStorage>) -> Self {
        Self { db, storage }
    }

    /// Get the storage backend name (for logging/debugging).
    pub fn storage_backend_name(&self) -> &'static str {
        self.storage.backend_name()
    }

    fn actor(ctx: &AuthContext) -> ChangeRequestResult<String> {
        ctx.identity.actor().ok_or_else(|| {
            ChangeRequestError::Validation(
                "Authenticated identity has no usable email or display name".to_string(),
            )
        })
    }

    /// Submit a new change request.
    ///
    /// Requestor name and email come from the authenticated identity, never
    /// from the payload. Attachment bytes are stored before the repository
    /// transaction commits; a blob failure aborts the whole create.
    #[instrument(skip(self, ctx, payload, uploads), fields(
        attachments = uploads.len(),
        backend = %self.storage.backend_name()
    ))]
    pub async fn create(
        &self,
        ctx: &AuthContext,
        payload: CreateChangeRequest,
        uploads: Vec<AttachmentUpload>,
    ) -> ChangeRequestResult<ChangeRequestDetail> {
        payload
            .validate()
            .map_err(|e| ChangeRequestError::Validation(e.to_string()))?;

        let requestor_email = ctx.identity.email.clone().ok_or_else(|| {
            ChangeRequestError::Validation(
                "Authenticated identity has no email; cannot record the requestor".to_string(),
            )
        })?;
        let requestor_name = ctx
            .identity
            .display_name
            .clone()
            .unwrap_or_else(|| requestor_email.clone());

        let mut attachments = Vec::with_capacity(uploads.len());
        for upload in uploads {
            let file_name = sanitize_file_name(&upload.file_name);
            let storage_key = format!("{}_{}", Uuid::new_v4(), file_name);

            debug!(
                storage_key,
                size = upload.content.len(),
                "Storing attachment bytes"
            );
            self.storage.store(&storage_key, &upload.content).await?;

            attachments.push(CreateAttachment {
                file_name,
                storage_key,
                content_type: upload.content_type,
                size_bytes: upload.content.len() as i64,
            });
        }

        let input = NewChangeRequest {
            requestor_name,
            requestor_email: requestor_email.clone(),
            title: payload.title,
            description: payload.description,
            service_affected: payload.service_affected,
            change_type: payload.change_type,
            priority: payload.priority,
            proposed_start: payload.proposed_start,
            risk_assessment: payload.risk_assessment,
            backout_plan: payload.backout_plan,
        };
        let audit = CreateAuditEntry {
            action: AuditAction::Created,
            old_status: None,
            new_status: Some(ChangeStatus::New),
            actor: requestor_email,
            comment: Some("Initial change request submission".to_string()),
        };

        let request = self.db.change_requests().create(input, attachments, audit).await?;
        let attachments = self.db.change_requests().list_attachments(request.id).await?;

        info!(id = %request.id, "Change request created");
        Ok(ChangeRequestDetail {
            request,
            attachments,
        })
    }

    /// Fetch one change request with its attachment metadata.
    pub async fn get(&self, id: Uuid) -> ChangeRequestResult<ChangeRequestDetail> {
        let request = self
            .db
            .change_requests()
            .get_by_id(id)
            .await?
            .ok_or(ChangeRequestError::NotFound)?;
        let attachments = self.db.change_requests().list_attachments(id).await?;

        Ok(ChangeRequestDetail {
            request,
            attachments,
        })
    }

    /// All change requests, newest first.
    pub async fn list_all(&self) -> ChangeRequestResult<Vec<ChangeRequest>> {
        Ok(self.db.change_requests().list().await?)
    }

    /// The caller's own change requests. An identity without an email owns
    /// nothing, so the list is empty.
    pub async fn list_mine(&self, ctx: &AuthContext) -> ChangeRequestResult<Vec<ChangeRequest>> {
        match ctx.identity.email.as_deref() {
            Some(email) => Ok(self.db.change_requests().list_by_email(email).await?),
            None => {
                debug!("Identity has no email; returning empty list");
                Ok(Vec::new())
            }
        }
    }

    /// Requests awaiting an approval decision (status == New).
    pub async fn list_pending(&self) -> ChangeRequestResult<Vec<ChangeRequest>> {
        Ok(self
            .db
            .change_requests()
            .list_by_status(ChangeStatus::New)
            .await?)
    }

    /// Edit the descriptive fields of a request still in New status.
    #[instrument(skip(self, ctx, payload))]
    pub async fn update_details(
        &self,
        ctx: &AuthContext,
        id: Uuid,
        payload: UpdateChangeRequest,
    ) -> ChangeRequestResult<ChangeRequestDetail> {
        payload
            .validate()
            .map_err(|e| ChangeRequestError::Validation(e.to_string()))?;
        let actor = Self::actor(ctx)?;

        let current = self
            .db
            .change_requests()
            .get_by_id(id)
            .await?
            .ok_or(ChangeRequestError::NotFound)?;
        if current.status != ChangeStatus::New {
            return Err(ChangeRequestError::Validation(format!(
                "Only requests in New status can be edited (current status: {})",
                current.status
            )));
        }

        let audit = CreateAuditEntry {
            action: AuditAction::Updated,
            old_status: None,
            new_status: None,
            actor: actor.clone(),
            comment: Some("Change request details updated".to_string()),
        };
        let updated = self
            .db
            .change_requests()
            .update_details(id, payload, &actor, audit)
            .await?;
        if !updated {
            return Err(ChangeRequestError::NotFound);
        }

        info!(%id, "Change request details updated");
        self.get(id).await
    }

    /// The set of statuses this caller is allowed to move the request to.
    pub async fn available_statuses(
        &self,
        ctx: &AuthContext,
        id: Uuid,
    ) -> ChangeRequestResult<Vec<ChangeStatus>> {
        let request = self
            .db
            .change_requests()
            .get_by_id(id)
            .await?
            .ok_or(ChangeRequestError::NotFound)?;
        let is_owner = ctx.identity.owns(&request.requestor_email);

        Ok(request
            .status
            .available_next_states(ctx.is_approver, is_owner))
    }

    /// Move a request to a new status, if the state machine allows it for
    /// this caller.
    #[instrument(skip(self, ctx, comment))]
    pub async fn transition(
        &self,
        ctx: &AuthContext,
        id: Uuid,
        target: ChangeStatus,
        comment: Option<String>,
    ) -> ChangeRequestResult<ChangeRequestDetail> {
        let actor = Self::actor(ctx)?;

        let current = self
            .db
            .change_requests()
            .get_by_id(id)
            .await?
            .ok_or(ChangeRequestError::NotFound)?;
        let is_owner = ctx.identity.owns(&current.requestor_email);

        if !current
            .status
            .can_transition_to(target, ctx.is_approver, is_owner)
        {
            return Err(ChangeRequestError::Validation(format!(
                "Cannot transition from {} to {}",
                current.status, target
            )));
        }

        let audit = CreateAuditEntry {
            action: AuditAction::StatusChanged,
            old_status: Some(current.status),
            new_status: Some(target),
            actor: actor.clone(),
            comment,
        };
        let updated = self
            .db
            .change_requests()
            .update_status(id, target, &actor, audit)
            .await?;
        if !updated {
            return Err(ChangeRequestError::NotFound);
        }

        info!(%id, from = %current.status, to = %target, "Change request status changed");
        self.get(id).await
    }

    /// Approve a request in New status, stamping the approver identity.
    ///
    /// The caller must already have been checked for the approver role.
    #[instrument(skip(self, ctx))]
    pub async fn approve(
        &self,
        ctx: &AuthContext,
        id: Uuid,
    ) -> ChangeRequestResult<ChangeRequestDetail> {
        let actor = Self::actor(ctx)?;
        let approver_name = ctx
            .identity
            .display_name
            .clone()
            .unwrap_or_else(|| actor.clone());
        let approver_email = ctx.identity.email.clone().unwrap_or_else(|| actor.clone());

        let current = self
            .db
            .change_requests()
            .get_by_id(id)
            .await?
            .ok_or(ChangeRequestError::NotFound)?;
        if current.status != ChangeStatus::New {
            return Err(ChangeRequestError::Validation(format!(
                "Only requests in New status can be approved (current status: {})",
                current.status
            )));
        }

        let audit = CreateAuditEntry {
            action: AuditAction::Approved,
            old_status: Some(ChangeStatus::New),
            new_status: Some(ChangeStatus::Approved),
            actor,
            comment: Some(format!(
                "Approved by {} ({})",
                approver_name, approver_email
            )),
        };
        let updated = self
            .db
            .change_requests()
            .set_approval(id, &approver_name, &approver_email, audit)
            .await?;
        if !updated {
            return Err(ChangeRequestError::NotFound);
        }

        info!(%id, approver = %approver_email, "Change request approved");
        self.get(id).await
    }

    /// Reject a request in New status: a transition to Cancelled that
    /// requires a reason, recorded verbatim as the audit comment.
    pub async fn reject(
        &self,
        ctx: &AuthContext,
        id: Uuid,
        reason: &str,
    ) -> ChangeRequestResult<ChangeRequestDetail> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(ChangeRequestError::Validation(
                "Rejection requires a reason".to_string(),
            ));
        }

        self.transition(ctx, id, ChangeStatus::Cancelled, Some(reason.to_string()))
            .await
    }

    /// Delete a request, its attachments, and its audit trail.
    ///
    /// Blob deletions are best-effort: a storage failure is logged and the
    /// database delete still runs, so the entity never outlives an
    /// undeletable blob.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: Uuid) -> ChangeRequestResult<()> {
        let attachments = self.db.change_requests().list_attachments(id).await?;
        for attachment in &attachments {
            if let Err(e) = self.storage.delete(&attachment.storage_key).await {
                warn!(
                    storage_key = %attachment.storage_key,
                    error = %e,
                    "Failed to delete attachment blob"
                );
            }
        }

        let deleted = self.db.change_requests().delete(id).await?;
        if !deleted {
            return Err(ChangeRequestError::NotFound);
        }

        info!(%id, attachments = attachments.len(), "Change request deleted");
        Ok(())
    }

    /// Fetch one attachment's metadata and bytes.
    pub async fn download_attachment(
        &self,
        id: Uuid,
        attachment_id: Uuid,
    ) -> ChangeRequestResult<(Attachment, Vec<u8>)> {
        let attachment = self
            .db
            .change_requests()
            .get_attachment(id, attachment_id)
            .await?
            .ok_or(ChangeRequestError::NotFound)?;

        let content = self.storage.retrieve(&attachment.storage_key).await?;
        Ok((attachment, content))
    }

    /// Remove one attachment (blob and metadata) from a request still in
    /// New status.
    #[instrument(skip(self))]
    pub async fn delete_attachment(
        &self,
        id: Uuid,
        attachment_id: Uuid,
    ) -> ChangeRequestResult<()> {
        let request = self
            .db
            .change_requests()
            .get_by_id(id)
            .await?
            .ok_or(ChangeRequestError::NotFound)?;
        if request.status != ChangeStatus::New {
            return Err(ChangeRequestError::Validation(format!(
                "Attachments can only be removed while the request is in New status \
                 (current status: {})",
                request.status
            )));
        }

        let attachment = self
            .db
            .change_requests()
            .get_attachment(id, attachment_id)
            .await?
            .ok_or(ChangeRequestError::NotFound)?;

        self.storage.delete(&attachment.storage_key).await?;
        let deleted = self
            .db
            .change_requests()
            .delete_attachment(id, attachment_id)
            .await?;
        if !deleted {
            return Err(ChangeRequestError::NotFound);
        }

        info!(%id, %attachment_id, "Attachment deleted");
        Ok(())
    }

    /// The full audit trail for a request, oldest entry first.
    pub async fn audit_trail(&self, id: Uuid) -> ChangeRequestResult<Vec<AuditEntry>> {
        // Distinguish an empty trail from an unknown id
        self.db
            .change_requests()
            .get_by_id(id)
            .await?
            .ok_or(ChangeRequestError::NotFound)?;

        Ok(self.db.change_requests().list_audit(id).await?)
    }
}

/// Strip any path components a browser or client may have sent along with
/// the file name. Storage keys and Content-Disposition values must never
/// contain separators.
fn sanitize_file_name(file_name: &str) -> String {
    let name = file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    if name.is_empty() {
        "attachment".to_string()
    } else {
        name.to_string()
    }
}
