//! Who is acting: the employee directory, login accounts and the signed-in session.

use tokio::sync::watch;
use uuid::Uuid;

use crate::authz::Principal;
use crate::events::{Loggable, Severity};

mod directory;
mod session;

pub use directory::{AccessChange, AccessUpdate, Account, EmployeeDirectory};
pub use session::{ProfileSource, Session};

pub const EMPLOYEES: &str = "employees";
pub const ACCOUNTS: &str = "accounts";

/// Source of the currently authenticated principal.
///
/// Consumers must re-derive capability flags from every new value seen on
/// [`changes`](IdentityProvider::changes) rather than caching them.
pub trait IdentityProvider: Send + Sync {
    fn current_principal(&self) -> Option<Principal>;

    fn changes(&self) -> watch::Receiver<Option<Principal>>;
}

impl Loggable for Principal {
    fn entity_type() -> &'static str {
        "employee"
    }

    fn subject_id(&self) -> Uuid {
        self.id
    }

    fn severity(&self) -> Severity {
        Severity::Important
    }
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
