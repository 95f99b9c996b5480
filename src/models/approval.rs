use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::approvals::DecisionKind;

#[derive(Debug, Deserialize, ToSchema)]
pub struct DecisionRequest {
    pub decision: DecisionKind,
    #[schema(example = "Receipts checked")]
    pub note: Option<String>,
}

/// Opaque state of the approval queue. Clients poll it and refetch when it differs.
#[derive(Debug, Serialize, ToSchema)]
pub struct FingerprintResponse {
    pub fingerprint: String,
    /// Suggested delay between polls.
    #[schema(example = 10000)]
    pub poll_interval_ms: u64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct NotificationReceipt {
    #[schema(value_type = Object)]
    pub receipt: serde_json::Value,
}
