//! Organization node domain model.
//!
//! Organization nodes form a forest below the virtual root sentinel
//! (`"0"`). Each node stores its materialized ancestor path so that
//! parent-path reads are O(1) and sub-tree relocation is a prefix rewrite.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{OrgChartError, OrgChartResult};
use crate::ids;
use crate::models::audit::{Changes, FieldChange};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrgKind {
    Root,
    #[default]
    Department,
    Team,
}

impl OrgKind {
    pub fn code(self) -> i64 {
        match self {
            OrgKind::Root => 1,
            OrgKind::Department => 2,
            OrgKind::Team => 3,
        }
    }

    pub fn from_code(code: i64) -> OrgChartResult<Self> {
        match code {
            1 => Ok(OrgKind::Root),
            2 => Ok(OrgKind::Department),
            3 => Ok(OrgKind::Team),
            other => Err(OrgChartError::invalid(format!(
                "organization type out of range: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrgStatus {
    #[default]
    Enabled,
    Disabled,
}

impl OrgStatus {
    pub fn code(self) -> i64 {
        match self {
            OrgStatus::Enabled => 1,
            OrgStatus::Disabled => 2,
        }
    }

    pub fn from_code(code: i64) -> OrgChartResult<Self> {
        match code {
            1 => Ok(OrgStatus::Enabled),
            2 => Ok(OrgStatus::Disabled),
            other => Err(OrgChartError::invalid(format!(
                "status out of range: {other}"
            ))),
        }
    }

    /// Storage representation.
    pub fn as_str(self) -> &'static str {
        match self {
            OrgStatus::Enabled => "Enabled",
            OrgStatus::Disabled => "Disabled",
        }
    }
}

/// A vertex of the organization forest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Organization {
    pub id: Uuid,
    /// `None` for roots (stored as the `"0"` sentinel).
    pub parent_id: Option<Uuid>,
    /// Unique among non-deleted siblings.
    pub name: String,
    /// Globally unique among non-deleted nodes when present.
    pub code: Option<String>,
    /// Comma-separated path from the sentinel down to the parent,
    /// e.g. `0,<root>,<parent>`. Roots carry `"0"`.
    pub ancestors: String,
    pub sort_order: i64,
    pub leader_id: Option<Uuid>,
    pub kind: OrgKind,
    pub status: OrgStatus,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Organization {
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Parent reference in path form (`"0"` for roots).
    pub fn parent_ref(&self) -> String {
        ids::parent_to_string(self.parent_id)
    }

    /// Prefix shared by the `ancestors` of every descendant of this node.
    pub fn descendant_prefix(&self) -> String {
        format!("{},{}", self.ancestors, self.id)
    }

    /// Field-level diff for audit records. Timestamps are not included.
    pub fn diff(&self, updated: &Organization) -> Changes {
        let mut changes = Changes::new();
        if self.name != updated.name {
            changes.insert("name".into(), FieldChange::of(&self.name, &updated.name));
        }
        if self.code != updated.code {
            changes.insert("code".into(), FieldChange::of(&self.code, &updated.code));
        }
        if self.sort_order != updated.sort_order {
            changes.insert(
                "sort_order".into(),
                FieldChange::of(&self.sort_order, &updated.sort_order),
            );
        }
        if self.leader_id != updated.leader_id {
            changes.insert(
                "leader_id".into(),
                FieldChange::of(&self.leader_id, &updated.leader_id),
            );
        }
        if self.description != updated.description {
            changes.insert(
                "description".into(),
                FieldChange::of(&self.description, &updated.description),
            );
        }
        if self.status != updated.status {
            changes.insert(
                "status".into(),
                FieldChange::of(&self.status, &updated.status),
            );
        }
        if self.parent_id != updated.parent_id {
            changes.insert(
                "parent_id".into(),
                FieldChange::of(&self.parent_ref(), &updated.parent_ref()),
            );
        }
        if self.ancestors != updated.ancestors {
            changes.insert(
                "ancestors".into(),
                FieldChange::of(&self.ancestors, &updated.ancestors),
            );
        }
        changes
    }
}

/// Service input for creating a node.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CreateOrganization {
    pub parent_id: Option<Uuid>,
    pub name: String,
    pub code: Option<String>,
    pub sort_order: i64,
    pub leader_id: Option<Uuid>,
    pub kind: OrgKind,
    /// Defaults to [`OrgStatus::Enabled`].
    pub status: Option<OrgStatus>,
    pub description: Option<String>,
}

/// Fully resolved row handed to the repository for insertion.
#[derive(Debug, Clone)]
pub struct NewOrganization {
    pub parent_id: Option<Uuid>,
    pub name: String,
    pub code: Option<String>,
    pub ancestors: String,
    pub sort_order: i64,
    pub leader_id: Option<Uuid>,
    pub kind: OrgKind,
    pub status: OrgStatus,
    pub description: Option<String>,
}

/// Editable fields of an existing node. Moving is a separate operation.
///
/// Nullable fields use `Option<Option<T>>`:
/// `Some(Some(val))` = set, `Some(None)` = clear, `None` = no change.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpdateOrganization {
    pub name: Option<String>,
    pub code: Option<Option<String>>,
    pub sort_order: Option<i64>,
    pub leader_id: Option<Option<Uuid>>,
    pub description: Option<Option<String>>,
    pub status: Option<OrgStatus>,
}

impl UpdateOrganization {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.code.is_none()
            && self.sort_order.is_none()
            && self.leader_id.is_none()
            && self.description.is_none()
            && self.status.is_none()
    }
}

/// New ancestor path for one descendant of a moved node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AncestorRewrite {
    pub id: Uuid,
    pub ancestors: String,
}

/// The complete write set of a sub-tree relocation, applied atomically.
#[derive(Debug, Clone)]
pub struct SubtreeMove {
    pub id: Uuid,
    pub parent_id: Option<Uuid>,
    pub ancestors: String,
    pub descendants: Vec<AncestorRewrite>,
}

/// A node with its parent's display name.
#[derive(Debug, Clone, Serialize)]
pub struct OrganizationDetail {
    pub organization: Organization,
    pub parent_name: Option<String>,
}

/// A node of the assembled forest returned by tree listings.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OrgTreeNode {
    pub id: Uuid,
    pub parent_id: Option<Uuid>,
    pub name: String,
    pub code: Option<String>,
    pub kind: OrgKind,
    pub status: OrgStatus,
    pub sort_order: i64,
    pub leader_id: Option<Uuid>,
    pub children: Vec<OrgTreeNode>,
}

impl OrgTreeNode {
    pub fn leaf(org: &Organization) -> Self {
        Self {
            id: org.id,
            parent_id: org.parent_id,
            name: org.name.clone(),
            code: org.code.clone(),
            kind: org.kind,
            status: org.status,
            sort_order: org.sort_order,
            leader_id: org.leader_id,
            children: Vec::new(),
        }
    }

    /// Depth-first count of this node and all nodes below it.
    pub fn size(&self) -> usize {
        1 + self.children.iter().map(OrgTreeNode::size).sum::<usize>()
    }

    /// Depth-first search by id.
    pub fn find(&self, id: Uuid) -> Option<&OrgTreeNode> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(id))
    }
}

/// Per-item failure of a batch operation.
#[derive(Debug)]
pub struct BatchItemError {
    pub id: Uuid,
    pub error: OrgChartError,
}

/// Result of a non-atomic batch: every item is attempted independently.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub success_count: usize,
    pub errors: Vec<BatchItemError>,
}
