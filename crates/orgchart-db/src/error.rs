//! Database-specific error types and conversions.

use orgchart_core::error::OrgChartError;

/// Database-layer error type.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("SurrealDB error: {0}")]
    Surreal(#[from] surrealdb::Error),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Unique index {index} violated: {detail}")]
    UniqueViolation { index: String, detail: String },

    #[error("Transaction aborted: {0}")]
    TransactionAborted(String),

    #[error("Malformed row: {0}")]
    Decode(String),

    #[error("Record not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },
}

impl DbError {
    /// Classify an error reported by `Response::check`.
    pub fn from_check(err: surrealdb::Error) -> Self {
        let message = err.to_string();
        if let Some(index) = violated_index(&message) {
            return DbError::UniqueViolation {
                index,
                detail: message,
            };
        }
        if message.contains("failed transaction") {
            return DbError::TransactionAborted(message);
        }
        DbError::Query(message)
    }

    /// Name of the unique index this error reports, if any.
    pub fn unique_index(&self) -> Option<&str> {
        match self {
            DbError::UniqueViolation { index, .. } => Some(index),
            _ => None,
        }
    }

    pub(crate) fn not_found(entity: &str, id: impl ToString) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }
}

/// Extract the index name from "Database index `idx` already contains ...".
fn violated_index(message: &str) -> Option<String> {
    if !message.contains("already contains") {
        return None;
    }
    let rest = message.split("index `").nth(1)?;
    rest.split('`')
        .next()
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}

impl From<DbError> for OrgChartError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound { entity, id } => OrgChartError::NotFound { entity, id },
            DbError::UniqueViolation { index, .. } => OrgChartError::Conflict {
                reason: format!("unique index {index} violated"),
            },
            DbError::TransactionAborted(reason) => OrgChartError::Conflict { reason },
            other => OrgChartError::Storage(other.to_string()),
        }
    }
}
