use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::authz::{resolve, CapabilityFlags, EmployeeStatus, Principal, Role};

/// Employee profile as returned by the API, with the flags derived from it.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct EmployeeProfile {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub department: String,
    pub position: String,
    pub role: Role,
    #[schema(example = json!(["Finance:approve"]))]
    pub permissions: Vec<String>,
    pub status: EmployeeStatus,
    pub capabilities: CapabilityFlags,
}

impl From<&Principal> for EmployeeProfile {
    fn from(principal: &Principal) -> Self {
        Self {
            id: principal.id,
            name: principal.name.clone(),
            email: principal.email.clone(),
            department: principal.department.clone(),
            position: principal.position.clone(),
            role: principal.role,
            permissions: principal.permissions.iter().map(ToString::to_string).collect(),
            status: principal.status,
            capabilities: resolve(Some(principal)),
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RegisterRequest {
    #[schema(example = "Wanjiku Kariuki")]
    pub name: String,
    #[schema(example = "wanjiku@example.com")]
    pub email: String,
    #[schema(example = "S3cureP@ssw0rd")]
    pub password: String,
    #[serde(default)]
    #[schema(example = "Finance")]
    pub department: String,
    #[serde(default)]
    #[schema(example = "Accountant")]
    pub position: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    #[schema(example = "wanjiku@example.com")]
    pub email: String,
    #[schema(example = "S3cureP@ssw0rd")]
    pub password: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AuthResponse {
    pub token: String,
    pub employee: EmployeeProfile,
}

/// Access change for an employee. Omitted fields stay as they are.
#[derive(Debug, Deserialize, ToSchema)]
pub struct AccessRequest {
    #[schema(example = "Approver")]
    pub role: Option<String>,
    #[schema(example = json!(["Approvals:approve", "Finance:view"]))]
    pub permissions: Option<Vec<String>>,
    pub status: Option<EmployeeStatus>,
}
