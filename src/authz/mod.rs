//! Authorization module - roles, permissions and capability flags
//!
//! This module implements:
//! - the closed role and permission model stored on each employee profile
//! - capability flag derivation (`resolve`)
//! - a pluggable permission evaluator for single-permission checks

mod capabilities;
mod evaluator;
mod principal;

pub use capabilities::{resolve, CapabilityFlags};
pub use evaluator::{DefaultPolicyEvaluator, PolicyEvaluator};
pub use principal::{
    parse_permissions, Action, EmployeeStatus, Module, Permission, Principal, Role, UnknownPermission,
};

/// Well-known permissions
pub mod permissions {
    use super::{Action, Module, Permission};

    /// Read access to every approval request, not only one's own.
    pub const APPROVALS_VIEW: Permission = Permission::scoped(Module::Approvals, Action::View);
}
