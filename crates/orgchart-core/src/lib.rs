//! Orgchart Core: shared domain types for the organization directory.
//!
//! This crate provides:
//! - Domain models for organization nodes, membership edges and audit events
//! - The error taxonomy shared by every layer ([`error::OrgChartError`])
//! - Repository and sink traits implemented by the storage crate
//! - Pure tree algebra over materialized ancestor paths ([`tree`])
//! - Per-request context carrying the operator, deadline and cancellation

pub mod context;
pub mod error;
pub mod ids;
pub mod models;
pub mod repository;
pub mod tree;
