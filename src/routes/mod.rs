pub mod approvals;
pub mod auth;
pub mod deletions;
pub mod employees;
pub mod health;
