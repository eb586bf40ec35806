use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    db::error::DbResult,
    models::{
        Attachment, AuditEntry, ChangeRequest, ChangeStatus, CreateAttachment, CreateAuditEntry,
        NewChangeRequest, UpdateChangeRequest,
    },
};

/// Storage contract for change requests and their owned collections.
///
/// Every mutating operation that also audits (`create`, `update_details`,
/// `update_status`, `set_approval`) runs the entity write and the audit
/// append in one transaction: both commit or neither does. Methods returning
/// `bool` report whether the targeted row existed; they never invent a
/// not-found error where the caller can decide.
#[async_trait]
pub trait ChangeRequestRepo: Send + Sync {
    /// Persist a new change request with its attachment metadata and the
    /// initial audit entry. Status is always stored as New.
    async fn create(
        &self,
        input: NewChangeRequest,
        attachments: Vec<CreateAttachment>,
        audit: CreateAuditEntry,
    ) -> DbResult<ChangeRequest>;

    /// Fetch one change request by id.
    async fn get_by_id(&self, id: Uuid) -> DbResult<Option<ChangeRequest>>;

    /// All change requests, newest first.
    async fn list(&self) -> DbResult<Vec<ChangeRequest>>;

    /// Change requests owned by the given requestor email, compared
    /// case-insensitively, newest first.
    async fn list_by_email(&self, email: &str) -> DbResult<Vec<ChangeRequest>>;

    /// Change requests currently in the given status, newest first.
    async fn list_by_status(&self, status: ChangeStatus) -> DbResult<Vec<ChangeRequest>>;

    /// Overwrite the descriptive fields and append the audit entry.
    /// Returns false (and writes nothing) when the id does not exist.
    async fn update_details(
        &self,
        id: Uuid,
        input: UpdateChangeRequest,
        updated_by: &str,
        audit: CreateAuditEntry,
    ) -> DbResult<bool>;

    /// Move the request to `status` and append the audit entry.
    /// Returns false (and writes nothing) when the id does not exist.
    async fn update_status(
        &self,
        id: Uuid,
        status: ChangeStatus,
        updated_by: &str,
        audit: CreateAuditEntry,
    ) -> DbResult<bool>;

    /// Stamp the approver fields, force status to Approved, and append the
    /// audit entry. Returns false (and writes nothing) when the id does not
    /// exist.
    async fn set_approval(
        &self,
        id: Uuid,
        approver_name: &str,
        approver_email: &str,
        audit: CreateAuditEntry,
    ) -> DbResult<bool>;

    /// Delete the request; attachments and audit entries cascade.
    /// Returns false when the id does not exist.
    async fn delete(&self, id: Uuid) -> DbResult<bool>;

    /// Attachment metadata for one change request.
    async fn list_attachments(&self, change_request_id: Uuid) -> DbResult<Vec<Attachment>>;

    /// One attachment, scoped to its owning change request.
    async fn get_attachment(
        &self,
        change_request_id: Uuid,
        attachment_id: Uuid,
    ) -> DbResult<Option<Attachment>>;

    /// Remove one attachment metadata row. Returns false when no such
    /// attachment belongs to the request.
    async fn delete_attachment(
        &self,
        change_request_id: Uuid,
        attachment_id: Uuid,
    ) -> DbResult<bool>;

    /// Full audit trail for one change request, oldest first, insertion
    /// order breaking timestamp ties.
    async fn list_audit(&self, change_request_id: Uuid) -> DbResult<Vec<AuditEntry>>;
}
