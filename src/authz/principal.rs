use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use utoipa::ToSchema;
use uuid::Uuid;

/// Closed set of employee roles. The role drives default grants on top of the
/// explicit permission set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ToSchema)]
pub enum Role {
    Administrator,
    Approver,
    #[serde(rename = "Admin Delegate")]
    AdminDelegate,
    #[default]
    User,
}

impl Role {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace(&['_', '-'][..], " ").as_str() {
            "administrator" | "admin" => Some(Self::Administrator),
            "approver" => Some(Self::Approver),
            "admin delegate" => Some(Self::AdminDelegate),
            "user" => Some(Self::User),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Administrator => "Administrator",
            Self::Approver => "Approver",
            Self::AdminDelegate => "Admin Delegate",
            Self::User => "User",
        }
    }

    /// Permissions every holder of the role has regardless of their explicit set.
    pub fn default_grants(&self) -> &'static [Permission] {
        const APPROVER: &[Permission] = &[Permission::scoped(Module::Approvals, Action::Approve)];
        const DELEGATE: &[Permission] = &[Permission::AdminDelegate];
        match self {
            Self::Approver => APPROVER,
            Self::AdminDelegate => DELEGATE,
            Self::Administrator | Self::User => &[],
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Module {
    UserManagement,
    HumanResources,
    Finance,
    Store,
    Approvals,
    FieldOperations,
    Reports,
}

impl Module {
    pub const ALL: [Module; 7] = [
        Module::UserManagement,
        Module::HumanResources,
        Module::Finance,
        Module::Store,
        Module::Approvals,
        Module::FieldOperations,
        Module::Reports,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserManagement => "User Management",
            Self::HumanResources => "Human Resources",
            Self::Finance => "Finance",
            Self::Store => "Store",
            Self::Approvals => "Approvals",
            Self::FieldOperations => "Field Operations",
            Self::Reports => "Reports",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        let wanted = s.trim().to_lowercase().replace('_', " ");
        Self::ALL.into_iter().find(|m| m.as_str().to_lowercase() == wanted)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Action {
    View,
    Create,
    Edit,
    Delete,
    Approve,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::View => "view",
            Self::Create => "create",
            Self::Edit => "edit",
            Self::Delete => "delete",
            Self::Approve => "approve",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "view" | "read" => Some(Self::View),
            "create" => Some(Self::Create),
            "edit" | "update" => Some(Self::Edit),
            "delete" => Some(Self::Delete),
            "approve" => Some(Self::Approve),
            _ => None,
        }
    }
}

/// A capability grant. Wire form is `"<Module>:<action>"`, e.g. `"User Management:create"`,
/// or `"Admin Delegate"` for the elevated delegate flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Permission {
    Scoped { module: Module, action: Action },
    AdminDelegate,
}

impl Permission {
    pub const fn scoped(module: Module, action: Action) -> Self {
        Self::Scoped { module, action }
    }

    /// Grants that make the holder an assigned approver.
    pub fn is_approval_scoped(&self) -> bool {
        matches!(
            self,
            Self::Scoped { action: Action::Approve, .. }
                | Self::Scoped { module: Module::Approvals, action: Action::Create | Action::Edit | Action::Delete }
        )
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scoped { module, action } => write!(f, "{}:{}", module.as_str(), action.as_str()),
            Self::AdminDelegate => f.write_str("Admin Delegate"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown permission `{0}`")]
pub struct UnknownPermission(pub String);

impl FromStr for Permission {
    type Err = UnknownPermission;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let normalized = trimmed.to_lowercase().replace(&['_', '-'][..], " ");
        if normalized == "admin delegate" {
            return Ok(Self::AdminDelegate);
        }

        let (module, action) = trimmed
            .split_once(':')
            .ok_or_else(|| UnknownPermission(s.to_string()))?;
        match (Module::parse(module), Action::parse(action)) {
            (Some(module), Some(action)) => Ok(Self::Scoped { module, action }),
            _ => Err(UnknownPermission(s.to_string())),
        }
    }
}

impl Serialize for Permission {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Permission {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Parse a list of permission strings, rejecting the whole list on the first unknown entry.
pub fn parse_permissions<'a>(
    raw: impl IntoIterator<Item = &'a str>,
) -> Result<BTreeSet<Permission>, UnknownPermission> {
    raw.into_iter().map(str::parse).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
pub enum EmployeeStatus {
    #[default]
    Active,
    Inactive,
}

impl EmployeeStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "active" => Some(Self::Active),
            "inactive" => Some(Self::Inactive),
            _ => None,
        }
    }
}

/// The authenticated employee together with their stored access profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Principal {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub department: String,
    #[serde(default)]
    pub position: String,
    #[serde(default, deserialize_with = "lenient_role")]
    pub role: Role,
    #[serde(default, deserialize_with = "lenient_permissions")]
    pub permissions: BTreeSet<Permission>,
    #[serde(default)]
    pub status: EmployeeStatus,
}

impl Principal {
    pub fn new(id: Uuid, name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            email: email.into(),
            department: String::new(),
            position: String::new(),
            role: Role::User,
            permissions: BTreeSet::new(),
            status: EmployeeStatus::Active,
        }
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    pub fn with_permissions(mut self, perms: impl IntoIterator<Item = Permission>) -> Self {
        self.permissions = perms.into_iter().collect();
        self
    }

    pub fn with_department(mut self, department: impl Into<String>) -> Self {
        self.department = department.into();
        self
    }

    pub fn with_status(mut self, status: EmployeeStatus) -> Self {
        self.status = status;
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == EmployeeStatus::Active
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.role == role
    }

    /// Explicit permissions plus the role's default grants.
    pub fn effective_permissions(&self) -> BTreeSet<Permission> {
        let mut effective = self.permissions.clone();
        effective.extend(self.role.default_grants().iter().copied());
        effective
    }

    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission) || self.role.default_grants().contains(&permission)
    }
}

fn lenient_role<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Role, D::Error> {
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(match raw {
        Some(raw) => Role::parse(&raw).unwrap_or_else(|| {
            tracing::warn!(role = %raw, "unknown stored role, treating as User");
            Role::User
        }),
        None => Role::User,
    })
}

/// Stored records may carry legacy permission strings; those are dropped rather
/// than failing the whole profile.
fn lenient_permissions<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<BTreeSet<Permission>, D::Error> {
    let raw = Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(raw
        .iter()
        .filter_map(|entry| match entry.parse::<Permission>() {
            Ok(permission) => Some(permission),
            Err(err) => {
                tracing::warn!(error = %err, "dropping stored permission");
                None
            }
        })
        .collect())
}
