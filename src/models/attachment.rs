use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A file uploaded alongside a change request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub id: Uuid,
    pub change_request_id: Uuid,
    /// Original filename as uploaded
    pub file_name: String,
    /// Opaque locator resolved only by the file storage backend
    #[serde(skip_serializing)]
    pub storage_key: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub uploaded_at: DateTime<Utc>,
}

/// Input for recording attachment metadata.
///
/// The file bytes go to the storage backend first; this row commits inside
/// the same transaction as the owning change request mutation.
#[derive(Debug, Clone)]
pub struct CreateAttachment {
    pub file_name: String,
    pub storage_key: String,
    pub content_type: String,
    pub size_bytes: i64,
}
