use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{normalize_email, ACCOUNTS, EMPLOYEES};
use crate::authz::{EmployeeStatus, Permission, Principal, Role};
use crate::gateway::{self, DataGateway, GatewayError, GatewayResult, Query};

/// Login credentials. Keyed by the employee id; never leaves the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
}

/// New access profile for an employee. `None` leaves the field unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccessUpdate {
    pub role: Option<Role>,
    pub permissions: Option<BTreeSet<Permission>>,
    pub status: Option<EmployeeStatus>,
}

#[derive(Debug, Clone)]
pub struct AccessChange {
    pub before: Principal,
    pub after: Principal,
}

impl AccessChange {
    pub fn changed(&self) -> bool {
        self.before != self.after
    }
}

/// Typed access to the `employees` and `accounts` collections.
#[derive(Clone)]
pub struct EmployeeDirectory {
    gateway: Arc<dyn DataGateway>,
}

impl EmployeeDirectory {
    pub fn new(gateway: Arc<dyn DataGateway>) -> Self {
        Self { gateway }
    }

    pub async fn get(&self, id: Uuid) -> GatewayResult<Option<Principal>> {
        gateway::get_as(self.gateway.as_ref(), EMPLOYEES, &id.to_string()).await
    }

    pub async fn find_by_email(&self, email: &str) -> GatewayResult<Option<Principal>> {
        let query = Query::new().eq("email", normalize_email(email)).limit(1);
        match self.gateway.read(EMPLOYEES, &query).await?.first() {
            Some(record) => record.decode().map(Some),
            None => Ok(None),
        }
    }

    pub async fn save(&self, employee: &Principal) -> GatewayResult<()> {
        let mut employee = employee.clone();
        employee.email = normalize_email(&employee.email);
        gateway::write_as(self.gateway.as_ref(), EMPLOYEES, &employee.id.to_string(), &employee).await?;
        Ok(())
    }

    /// Apply `update` to the stored profile. Writing is skipped when nothing changes.
    pub async fn set_access(&self, id: Uuid, update: &AccessUpdate) -> GatewayResult<AccessChange> {
        let before = self
            .get(id)
            .await?
            .ok_or_else(|| GatewayError::not_found(format!("employee {id}")))?;

        let mut after = before.clone();
        if let Some(role) = update.role {
            after.role = role;
        }
        if let Some(permissions) = &update.permissions {
            after.permissions = permissions.clone();
        }
        if let Some(status) = update.status {
            after.status = status;
        }

        if after != before {
            self.save(&after).await?;
            tracing::info!(employee_id = %id, role = %after.role, "employee access updated");
        }
        Ok(AccessChange { before, after })
    }

    pub async fn find_account(&self, email: &str) -> GatewayResult<Option<Account>> {
        let query = Query::new().eq("email", normalize_email(email)).limit(1);
        match self.gateway.read(ACCOUNTS, &query).await?.first() {
            Some(record) => record.decode().map(Some),
            None => Ok(None),
        }
    }

    pub async fn save_account(&self, account: &Account) -> GatewayResult<()> {
        let mut account = account.clone();
        account.email = normalize_email(&account.email);
        gateway::write_as(self.gateway.as_ref(), ACCOUNTS, &account.id.to_string(), &account).await?;
        Ok(())
    }
}
