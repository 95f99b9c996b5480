use async_trait::async_trait;

use super::principal::{Permission, Principal};

/// Policy evaluator trait for pluggable permission checks
#[async_trait]
pub trait PolicyEvaluator: Send + Sync {
    /// Check if the principal holds a permission
    async fn can(&self, principal: &Principal, permission: Permission) -> bool;
}

/// Default policy evaluator
///
/// Evaluation order:
/// 1. inactive employee -> deny
/// 2. Administrator role -> allow
/// 3. explicit permission or role default grant -> allow
/// 4. deny
#[derive(Debug, Clone, Default)]
pub struct DefaultPolicyEvaluator;

impl DefaultPolicyEvaluator {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PolicyEvaluator for DefaultPolicyEvaluator {
    async fn can(&self, principal: &Principal, permission: Permission) -> bool {
        if !principal.is_active() {
            tracing::debug!(
                employee_id = %principal.id,
                permission = %permission,
                "inactive employee denied"
            );
            return false;
        }

        if principal.has_role(super::principal::Role::Administrator) {
            tracing::debug!(
                employee_id = %principal.id,
                permission = %permission,
                "administrator bypass"
            );
            return true;
        }

        if principal.has_permission(permission) {
            tracing::debug!(
                employee_id = %principal.id,
                permission = %permission,
                "permission match"
            );
            return true;
        }

        tracing::debug!(
            employee_id = %principal.id,
            permission = %permission,
            "permission denied"
        );
        false
    }
}
