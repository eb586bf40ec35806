use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::status::ChangeStatus;

/// Kind of action recorded in a change request's audit trail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// The request was submitted
    Created,
    /// The request moved between lifecycle statuses
    StatusChanged,
    /// An approver approved the request
    Approved,
    /// Descriptive fields were edited
    Updated,
}

impl AuditAction {
    /// Text form used for database storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Created => "Created",
            AuditAction::StatusChanged => "Status Changed",
            AuditAction::Approved => "Approved",
            AuditAction::Updated => "Updated",
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Created" => Ok(AuditAction::Created),
            "Status Changed" => Ok(AuditAction::StatusChanged),
            "Approved" => Ok(AuditAction::Approved),
            "Updated" => Ok(AuditAction::Updated),
            _ => Err(format!("Invalid audit action: {}", s)),
        }
    }
}

/// One immutable entry in a change request's audit trail.
///
/// Entries are append-only and read back ordered by `recorded_at`, with
/// insertion order breaking ties.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub change_request_id: Uuid,
    pub action: AuditAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_status: Option<ChangeStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_status: Option<ChangeStatus>,
    /// Who performed the action (email or display name)
    pub actor: String,
    pub recorded_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// Input for appending one audit entry
#[derive(Debug, Clone)]
pub struct CreateAuditEntry {
    pub action: AuditAction,
    pub old_status: Option<ChangeStatus>,
    pub new_status: Option<ChangeStatus>,
    pub actor: String,
    pub comment: Option<String>,
}
