//! Domain models for the organization directory.

pub mod audit;
pub mod membership;
pub mod organization;
