use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::attachment::Attachment;
use super::status::ChangeStatus;
use super::validators::validate_not_blank;

/// Category of change being requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    /// Scheduled change following the normal review cycle
    Normal,
    /// Unplanned change required to restore or protect service
    Emergency,
    /// Pre-authorized, low-risk, repeatable change
    Standard,
    /// Change with broad impact requiring extended review
    Major,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Normal => "Normal",
            ChangeType::Emergency => "Emergency",
            ChangeType::Standard => "Standard",
            ChangeType::Major => "Major",
        }
    }
}

impl std::fmt::Display for ChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ChangeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Normal" => Ok(ChangeType::Normal),
            "Emergency" => Ok(ChangeType::Emergency),
            "Standard" => Ok(ChangeType::Standard),
            "Major" => Ok(ChangeType::Major),
            _ => Err(format!("Invalid change type: {}", s)),
        }
    }
}

/// Urgency of a change request
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangePriority {
    Low,
    Medium,
    High,
    Critical,
}

impl ChangePriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangePriority::Low => "Low",
            ChangePriority::Medium => "Medium",
            ChangePriority::High => "High",
            ChangePriority::Critical => "Critical",
        }
    }
}

impl std::fmt::Display for ChangePriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ChangePriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Low" => Ok(ChangePriority::Low),
            "Medium" => Ok(ChangePriority::Medium),
            "High" => Ok(ChangePriority::High),
            "Critical" => Ok(ChangePriority::Critical),
            _ => Err(format!("Invalid change priority: {}", s)),
        }
    }
}

/// A change request tracked from submission through closure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeRequest {
    pub id: Uuid,
    /// Display name of the submitter, captured at creation
    pub requestor_name: String,
    /// Email of the submitter; identifies the owner for role checks
    pub requestor_email: String,
    pub title: String,
    pub description: String,
    /// System or service the change affects
    pub service_affected: String,
    pub change_type: ChangeType,
    pub priority: ChangePriority,
    /// When the requestor proposes to implement the change
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proposed_start: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_assessment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backout_plan: Option<String>,
    pub status: ChangeStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    /// Who last mutated the request (email or display name)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approver_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approver_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,
}

/// Input for submitting a new change request.
///
/// Requestor name and email are taken from the authenticated identity, never
/// from the payload.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateChangeRequest {
    #[validate(length(min = 1, max = 200), custom(function = "validate_not_blank"))]
    pub title: String,
    #[validate(length(min = 1, max = 2000), custom(function = "validate_not_blank"))]
    pub description: String,
    #[validate(length(min = 1, max = 1000), custom(function = "validate_not_blank"))]
    pub service_affected: String,
    pub change_type: ChangeType,
    pub priority: ChangePriority,
    pub proposed_start: Option<DateTime<Utc>>,
    #[validate(length(max = 2000))]
    pub risk_assessment: Option<String>,
    #[validate(length(max = 2000))]
    pub backout_plan: Option<String>,
}

/// Fully-resolved input for persisting a new change request.
///
/// Built by the service layer from the validated payload plus the
/// authenticated requestor identity.
#[derive(Debug, Clone)]
pub struct NewChangeRequest {
    pub requestor_name: String,
    pub requestor_email: String,
    pub title: String,
    pub description: String,
    pub service_affected: String,
    pub change_type: ChangeType,
    pub priority: ChangePriority,
    pub proposed_start: Option<DateTime<Utc>>,
    pub risk_assessment: Option<String>,
    pub backout_plan: Option<String>,
}

/// A change request together with its attachment metadata
#[derive(Debug, Clone, Serialize)]
pub struct ChangeRequestDetail {
    #[serde(flatten)]
    pub request: ChangeRequest,
    pub attachments: Vec<Attachment>,
}

/// Input for editing the descriptive fields of a request still in New.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UpdateChangeRequest {
    #[validate(length(min = 1, max = 200), custom(function = "validate_not_blank"))]
    pub title: String,
    #[validate(length(min = 1, max = 2000), custom(function = "validate_not_blank"))]
    pub description: String,
    #[validate(length(min = 1, max = 1000), custom(function = "validate_not_blank"))]
    pub service_affected: String,
    pub change_type: ChangeType,
    pub priority: ChangePriority,
    pub proposed_start: Option<DateTime<Utc>>,
    #[validate(length(max = 2000))]
    pub risk_assessment: Option<String>,
    #[validate(length(max = 2000))]
    pub backout_plan: Option<String>,
}

/// Input for moving a request to another status
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct TransitionRequest {
    pub status: ChangeStatus,
    #[validate(length(max = 500))]
    pub comment: Option<String>,
}

/// Input for rejecting a request in New
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RejectRequest {
    /// Required; recorded verbatim as the audit comment
    #[validate(length(min = 1, max = 500), custom(function = "validate_not_blank"))]
    pub reason: String,
}
