//! SurrealDB repository implementations.

mod audit;
mod membership;
mod organization;

pub use audit::SurrealAuditRepository;
pub use membership::SurrealMembershipRepository;
pub use organization::SurrealOrganizationRepository;

use surrealdb_types::SurrealValue;
use uuid::Uuid;

use crate::error::DbError;

/// Row struct for count queries.
#[derive(Debug, SurrealValue)]
pub(crate) struct CountRow {
    pub(crate) total: u64,
}

pub(crate) fn parse_uuid(raw: &str, what: &str) -> Result<Uuid, DbError> {
    Uuid::parse_str(raw).map_err(|e| DbError::Decode(format!("invalid {what} UUID {raw}: {e}")))
}

pub(crate) fn parse_opt_uuid(raw: Option<&str>, what: &str) -> Result<Option<Uuid>, DbError> {
    raw.map(|r| parse_uuid(r, what)).transpose()
}
