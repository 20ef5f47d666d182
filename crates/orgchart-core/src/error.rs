//! Error types for the organization directory.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrgChartError {
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Parent organization not found: {id}")]
    ParentNotFound { id: String },

    #[error("Sibling name already in use: {name}")]
    NameConflict { name: String },

    #[error("Organization code already in use: {code}")]
    CodeConflict { code: String },

    #[error("Organization {id} still has child nodes")]
    HasChildren { id: String },

    #[error("Organization {id} still has {count} member(s)")]
    HasMembers { id: String, count: u64 },

    #[error("Organization {id} has enabled child nodes")]
    HasActiveChildren { id: String },

    #[error("Root organization {id} cannot be deleted")]
    RootUndeletable { id: String },

    #[error("Cannot move {id} under its own descendant {target}")]
    MoveCycle { id: String, target: String },

    #[error("Conflict: {reason}")]
    Conflict { reason: String },

    #[error("Deadline exceeded")]
    Timeout,

    #[error("Request cancelled")]
    Cancelled,

    #[error("Storage error: {0}")]
    Storage(String),
}

/// Fieldless view of [`OrgChartError`], used by adapters to pick a
/// user-facing message or status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    ParentNotFound,
    NameConflict,
    CodeConflict,
    HasChildren,
    HasMembers,
    HasActiveChildren,
    RootUndeletable,
    MoveCycle,
    Conflict,
    Timeout,
    Cancelled,
    Storage,
}

impl OrgChartError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::ParentNotFound { .. } => ErrorKind::ParentNotFound,
            Self::NameConflict { .. } => ErrorKind::NameConflict,
            Self::CodeConflict { .. } => ErrorKind::CodeConflict,
            Self::HasChildren { .. } => ErrorKind::HasChildren,
            Self::HasMembers { .. } => ErrorKind::HasMembers,
            Self::HasActiveChildren { .. } => ErrorKind::HasActiveChildren,
            Self::RootUndeletable { .. } => ErrorKind::RootUndeletable,
            Self::MoveCycle { .. } => ErrorKind::MoveCycle,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::Timeout => ErrorKind::Timeout,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Storage(_) => ErrorKind::Storage,
        }
    }

    /// Infrastructure failures abort the operation; services never
    /// recover from them.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Storage | ErrorKind::Timeout | ErrorKind::Cancelled
        )
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    pub fn not_found(entity: &str, id: impl ToString) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }
}

pub type OrgChartResult<T> = Result<T, OrgChartError>;
