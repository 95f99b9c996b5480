use serde::Serialize;
use utoipa::ToSchema;

use super::principal::{Permission, Principal, Role};

/// Flags derived from a principal's role and permission set. Never stored;
/// always recomputed from the profile currently in hand.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct CapabilityFlags {
    pub can_approve_requests: bool,
    pub is_assigned_approver: bool,
    pub is_assigned_admin_delegate: bool,
    pub is_admin: bool,
}

/// Derive capability flags. Missing or inactive principals get no capabilities.
pub fn resolve(principal: Option<&Principal>) -> CapabilityFlags {
    let Some(principal) = principal.filter(|p| p.is_active()) else {
        return CapabilityFlags::default();
    };

    let effective = principal.effective_permissions();

    let is_admin = principal.has_role(Role::Administrator);
    let is_assigned_approver =
        principal.has_role(Role::Approver) || effective.iter().any(Permission::is_approval_scoped);
    let is_assigned_admin_delegate = effective.contains(&Permission::AdminDelegate);

    CapabilityFlags {
        can_approve_requests: is_admin || is_assigned_approver || is_assigned_admin_delegate,
        is_assigned_approver,
        is_assigned_admin_delegate,
        is_admin,
    }
}
