//! User-to-department membership edges.
//!
//! A user has at most one primary department and any number of auxiliary
//! departments. The pair `(user_id, dept_id)` is unique.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Membership {
    pub id: Uuid,
    pub user_id: Uuid,
    pub dept_id: Uuid,
    pub is_primary: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewMembership {
    pub user_id: Uuid,
    pub dept_id: Uuid,
    pub is_primary: bool,
}

/// Which edges a department member listing includes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberFilter {
    #[default]
    Any,
    PrimaryOnly,
    AuxiliaryOnly,
}

impl MemberFilter {
    /// Value the `is_primary` column must have, if constrained.
    pub fn primary_flag(self) -> Option<bool> {
        match self {
            MemberFilter::Any => None,
            MemberFilter::PrimaryOnly => Some(true),
            MemberFilter::AuxiliaryOnly => Some(false),
        }
    }
}

/// A user listed under a department (or a sub-tree of departments).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeptMember {
    pub user_id: Uuid,
    /// True if any of the user's counted edges is primary.
    pub is_primary: bool,
}

/// A user's departments split by edge kind.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UserDepartments {
    pub primary: Option<Membership>,
    pub auxiliary: Vec<Membership>,
}

impl UserDepartments {
    pub fn from_edges(edges: Vec<Membership>) -> Self {
        let mut out = Self::default();
        for edge in edges {
            if edge.is_primary {
                out.primary = Some(edge);
            } else {
                out.auxiliary.push(edge);
            }
        }
        out
    }

    pub fn dept_ids(&self) -> Vec<Uuid> {
        self.primary
            .iter()
            .chain(self.auxiliary.iter())
            .map(|m| m.dept_id)
            .collect()
    }
}
