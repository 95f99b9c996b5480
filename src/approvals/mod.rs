//! Approval requests and the rules for deciding them.
//!
//! A request moves `pending -> approved | rejected` exactly once. The decision
//! write is a compare-and-set on `status`, so racing approvers cannot both win.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::events::{Loggable, Severity};
use crate::gateway::GatewayError;

mod deletion;
mod policy;
mod workflow;

pub use deletion::{NewDeletionRequest, RESERVED_COLLECTIONS};
pub use policy::authorize;
pub use workflow::{ApprovalWorkflow, ListFilter, NewApprovalRequest};

pub const APPROVAL_REQUESTS: &str = "approval_requests";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    Expense,
    Money,
    Deletion,
    Other,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Expense => "expense",
            Self::Money => "money",
            Self::Deletion => "deletion",
            Self::Other => "other",
        }
    }

    pub fn requires_amount(&self) -> bool {
        matches!(self, Self::Expense | Self::Money)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DecisionKind {
    Approve,
    Reject,
}

impl DecisionKind {
    pub fn resulting_status(&self) -> RequestStatus {
        match self {
            Self::Approve => RequestStatus::Approved,
            Self::Reject => RequestStatus::Rejected,
        }
    }
}

/// What a deletion request wants removed, with the record as it was when requested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DeletionTarget {
    pub table: String,
    pub record_id: String,
    #[schema(value_type = Object)]
    pub snapshot: Value,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ApprovalRequest {
    pub id: Uuid,
    pub kind: RequestKind,
    pub requester_id: Uuid,
    pub requester_name: String,
    #[serde(default)]
    pub requester_department: String,
    #[schema(value_type = Option<String>, example = "1250.00")]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion: Option<DeletionTarget>,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    pub decided_by: Option<Uuid>,
    pub decided_at: Option<DateTime<Utc>>,
    pub decision_note: Option<String>,
}

impl ApprovalRequest {
    pub fn is_pending(&self) -> bool {
        self.status == RequestStatus::Pending
    }
}

impl Loggable for ApprovalRequest {
    fn entity_type() -> &'static str {
        "approval_request"
    }

    fn subject_id(&self) -> Uuid {
        self.id
    }

    fn severity(&self) -> Severity {
        match self.kind {
            RequestKind::Deletion => Severity::Critical,
            _ => Severity::Important,
        }
    }
}

/// Why an actor may not act on a request. Terminal and shown to the user as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DenyReason {
    #[error("you must be signed in with an active account")]
    NotAuthenticated,
    #[error("your role does not allow deciding this request")]
    InsufficientRole,
    #[error("you cannot decide a request you submitted")]
    SelfApprovalForbidden,
    #[error("this request has already been decided")]
    AlreadyDecided,
    #[error("the record targeted for deletion no longer exists")]
    TargetMissing,
}

impl DenyReason {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotAuthenticated => "not_authenticated",
            Self::InsufficientRole => "insufficient_role",
            Self::SelfApprovalForbidden => "self_approval_forbidden",
            Self::AlreadyDecided => "already_decided",
            Self::TargetMissing => "target_missing",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Deny(DenyReason),
}

impl Verdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }

    pub fn into_result(self) -> Result<(), DenyReason> {
        match self {
            Self::Allow => Ok(()),
            Self::Deny(reason) => Err(reason),
        }
    }
}

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("{0}")]
    Denied(#[from] DenyReason),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid request: {0}")]
    Invalid(String),
    #[error(transparent)]
    Gateway(GatewayError),
}

impl WorkflowError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }
}

impl From<GatewayError> for WorkflowError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::NotFound(what) => Self::NotFound(what),
            GatewayError::InvalidQuery(message) => Self::Invalid(message),
            other => Self::Gateway(other),
        }
    }
}

pub type WorkflowResult<T> = Result<T, WorkflowError>;
