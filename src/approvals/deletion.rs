use serde::Deserialize;
use utoipa::ToSchema;

use super::{WorkflowError, WorkflowResult, APPROVAL_REQUESTS};
use crate::events::ACTIVITY_LOG;
use crate::identity::{ACCOUNTS, EMPLOYEES};

/// Collections whose records can never be the target of a deletion request.
pub const RESERVED_COLLECTIONS: [&str; 4] = [EMPLOYEES, ACCOUNTS, APPROVAL_REQUESTS, ACTIVITY_LOG];

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewDeletionRequest {
    #[schema(example = "inventory_items")]
    pub table: String,
    pub record_id: String,
    pub reason: String,
}

impl NewDeletionRequest {
    pub(crate) fn validate(&self) -> WorkflowResult<()> {
        if self.table.trim().is_empty() {
            return Err(WorkflowError::invalid("table is required"));
        }
        if !self
            .table
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(WorkflowError::invalid(format!("invalid table name `{}`", self.table)));
        }
        if RESERVED_COLLECTIONS.contains(&self.table.as_str()) {
            return Err(WorkflowError::invalid(format!(
                "records in `{}` cannot be deleted through a request",
                self.table
            )));
        }
        if self.record_id.trim().is_empty() {
            return Err(WorkflowError::invalid("record_id is required"));
        }
        if self.reason.trim().is_empty() {
            return Err(WorkflowError::invalid("a reason is required for deletion requests"));
        }
        Ok(())
    }
}
