pub mod approval;
pub mod employee;
