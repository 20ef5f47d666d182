//! Repository and sink traits implemented by the storage layer.
//!
//! Every read excludes soft-deleted organization nodes; services never
//! see them.

use uuid::Uuid;

use crate::error::OrgChartResult;
use crate::models::{
    audit::{AuditEvent, StoredAuditEvent},
    membership::{MemberFilter, Membership, NewMembership},
    organization::{NewOrganization, OrgStatus, Organization, SubtreeMove, UpdateOrganization},
};

/// Default page size for audit listings.
pub const DEFAULT_AUDIT_LIMIT: u64 = 50;
/// Upper bound on audit listing size.
pub const MAX_AUDIT_LIMIT: u64 = 500;

/// Clamp a caller-supplied listing limit.
pub fn audit_limit(requested: Option<u64>) -> u64 {
    match requested {
        None | Some(0) => DEFAULT_AUDIT_LIMIT,
        Some(n) => n.min(MAX_AUDIT_LIMIT),
    }
}

// ---------------------------------------------------------------------------
// Organization nodes
// ---------------------------------------------------------------------------

pub trait OrganizationRepository: Send + Sync {
    /// Fails with `NameConflict` / `CodeConflict` on a uniqueness violation.
    fn insert(
        &self,
        input: NewOrganization,
    ) -> impl Future<Output = OrgChartResult<Organization>> + Send;
    fn find(&self, id: Uuid) -> impl Future<Output = OrgChartResult<Organization>> + Send;
    fn find_by_code(
        &self,
        code: &str,
    ) -> impl Future<Output = OrgChartResult<Option<Organization>>> + Send;
    fn find_by_parent_and_name(
        &self,
        parent_id: Option<Uuid>,
        name: &str,
    ) -> impl Future<Output = OrgChartResult<Option<Organization>>> + Send;
    /// Applies the supplied fields; `NotFound` when no live row matches.
    fn update(
        &self,
        id: Uuid,
        input: UpdateOrganization,
    ) -> impl Future<Output = OrgChartResult<Organization>> + Send;
    /// Re-parents a node and rewrites every descendant path atomically.
    fn apply_move(
        &self,
        plan: SubtreeMove,
    ) -> impl Future<Output = OrgChartResult<Organization>> + Send;
    /// Stamps `deleted_at`. Emptiness checks are the caller's job.
    fn soft_delete(&self, id: Uuid) -> impl Future<Output = OrgChartResult<()>> + Send;
    /// All live nodes ordered by `sort_order`.
    fn find_tree(
        &self,
        status: Option<OrgStatus>,
    ) -> impl Future<Output = OrgChartResult<Vec<Organization>>> + Send;
    fn find_children(
        &self,
        parent_id: Option<Uuid>,
    ) -> impl Future<Output = OrgChartResult<Vec<Organization>>> + Send;
    /// The node itself plus every live descendant.
    fn find_subtree(
        &self,
        root_id: Uuid,
    ) -> impl Future<Output = OrgChartResult<Vec<Organization>>> + Send;
    fn has_children(&self, id: Uuid) -> impl Future<Output = OrgChartResult<bool>> + Send;
    /// Number of membership edges (primary or auxiliary) to `dept_id`.
    fn count_members(&self, dept_id: Uuid) -> impl Future<Output = OrgChartResult<u64>> + Send;
    fn is_descendant(
        &self,
        ancestor_id: Uuid,
        candidate_id: Uuid,
    ) -> impl Future<Output = OrgChartResult<bool>> + Send;
}

// ---------------------------------------------------------------------------
// Membership edges
// ---------------------------------------------------------------------------

pub trait MembershipRepository: Send + Sync {
    /// Fails with `Conflict` if the pair already exists or a second
    /// primary would be created.
    fn insert(
        &self,
        input: NewMembership,
    ) -> impl Future<Output = OrgChartResult<Membership>> + Send;
    fn find(&self, id: Uuid) -> impl Future<Output = OrgChartResult<Membership>> + Send;
    fn delete(&self, id: Uuid) -> impl Future<Output = OrgChartResult<()>> + Send;
    fn find_by_user(
        &self,
        user_id: Uuid,
    ) -> impl Future<Output = OrgChartResult<Vec<Membership>>> + Send;
    fn find_primary(
        &self,
        user_id: Uuid,
    ) -> impl Future<Output = OrgChartResult<Option<Membership>>> + Send;
    fn find_auxiliary(
        &self,
        user_id: Uuid,
    ) -> impl Future<Output = OrgChartResult<Vec<Membership>>> + Send;
    fn find_users_in(
        &self,
        dept_id: Uuid,
        filter: MemberFilter,
    ) -> impl Future<Output = OrgChartResult<Vec<Membership>>> + Send;
    /// Edges to any of `dept_ids`, in one round trip.
    fn find_users_in_any(
        &self,
        dept_ids: Vec<Uuid>,
        filter: MemberFilter,
    ) -> impl Future<Output = OrgChartResult<Vec<Membership>>> + Send;
    fn count_in(
        &self,
        dept_id: Uuid,
        filter: MemberFilter,
    ) -> impl Future<Output = OrgChartResult<u64>> + Send;
    /// Demotes the current primary and promotes or inserts the edge to
    /// `dept_id`. Returns `false` when it already was the primary.
    fn set_primary(
        &self,
        user_id: Uuid,
        dept_id: Uuid,
    ) -> impl Future<Output = OrgChartResult<bool>> + Send;
    /// Returns `false` when the auxiliary edge already existed.
    /// `Conflict` when the pair is linked as primary.
    fn add_auxiliary(
        &self,
        user_id: Uuid,
        dept_id: Uuid,
    ) -> impl Future<Output = OrgChartResult<bool>> + Send;
    /// `Conflict` when the pair is linked as primary, `NotFound` when it
    /// is not linked at all.
    fn remove_auxiliary(
        &self,
        user_id: Uuid,
        dept_id: Uuid,
    ) -> impl Future<Output = OrgChartResult<()>> + Send;
}

// ---------------------------------------------------------------------------
// Audit
// ---------------------------------------------------------------------------

/// Destination for audit events.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent) -> impl Future<Output = OrgChartResult<()>> + Send;
}

/// An audit sink that can also be queried.
pub trait AuditRepository: AuditSink {
    /// Newest first.
    fn list_by_target(
        &self,
        target_id: &str,
        limit: Option<u64>,
    ) -> impl Future<Output = OrgChartResult<Vec<StoredAuditEvent>>> + Send;
    /// Newest first.
    fn list_recent(
        &self,
        limit: Option<u64>,
    ) -> impl Future<Output = OrgChartResult<Vec<StoredAuditEvent>>> + Send;
}
