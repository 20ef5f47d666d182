//! Membership service: primary and auxiliary department edges of a user.
//!
//! Every mutation holds the user's lock key together with the target
//! department's, so it serializes with a delete of that department. It
//! verifies the department under the lock and drops the user's cached
//! data scope after commit.

use std::collections::BTreeMap;
use std::sync::Arc;

use orgchart_core::context::RequestContext;
use orgchart_core::error::{OrgChartError, OrgChartResult};
use orgchart_core::models::audit::{AuditAction, Changes, FieldChange};
use orgchart_core::models::membership::{DeptMember, MemberFilter, UserDepartments};
use orgchart_core::repository::{AuditSink, MembershipRepository, OrganizationRepository};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audit::AuditEmitter;
use crate::cache::{DataScopeCache, ScopeStore};
use crate::config::DirectoryConfig;
use crate::lock::{LockSet, LockTable};

pub struct MembershipService<O, M, A, S>
where
    O: OrganizationRepository,
    M: MembershipRepository,
    A: AuditSink,
    S: ScopeStore,
{
    orgs: O,
    members: M,
    cache: Arc<DataScopeCache<O, M, S>>,
    audit: Arc<AuditEmitter<A>>,
    locks: LockTable,
    config: DirectoryConfig,
}

impl<O, M, A, S> MembershipService<O, M, A, S>
where
    O: OrganizationRepository,
    M: MembershipRepository,
    A: AuditSink,
    S: ScopeStore,
{
    pub fn new(
        orgs: O,
        members: M,
        cache: Arc<DataScopeCache<O, M, S>>,
        audit: Arc<AuditEmitter<A>>,
        locks: LockTable,
        config: DirectoryConfig,
    ) -> Self {
        Self {
            orgs,
            members,
            cache,
            audit,
            locks,
            config,
        }
    }

    /// Make `dept_id` the user's primary department. A former primary
    /// stays linked as auxiliary. Returns `false` if nothing changed.
    pub async fn set_primary(
        &self,
        ctx: &RequestContext,
        user_id: Uuid,
        dept_id: Uuid,
    ) -> OrgChartResult<bool> {
        let ctx = ctx.or_timeout(self.config.store_timeout());
        let _locks = self.lock(&ctx, user_id, dept_id).await?;

        ctx.run(self.orgs.find(dept_id)).await?;
        let previous = ctx.run(self.members.find_primary(user_id)).await?;
        let changed = self.commit(&ctx, user_id, self.members.set_primary(user_id, dept_id)).await?;
        if !changed {
            debug!(user_id = %user_id, dept_id = %dept_id, "Primary department unchanged");
            return Ok(false);
        }

        info!(
            user_id = %user_id,
            dept_id = %dept_id,
            previous = ?previous.as_ref().map(|m| m.dept_id),
            "Primary department set"
        );

        let mut changes = Changes::new();
        changes.insert(
            "primary_dept_id".into(),
            FieldChange::of(&previous.map(|m| m.dept_id), &Some(dept_id)),
        );
        self.audit
            .emit(&ctx, AuditAction::SetPrimary, user_id.to_string(), changes)
            .await;
        self.invalidate(&ctx, user_id).await;

        Ok(true)
    }

    /// Link the user to `dept_id` as auxiliary. Idempotent; returns
    /// `false` when the edge already existed.
    pub async fn add_auxiliary(
        &self,
        ctx: &RequestContext,
        user_id: Uuid,
        dept_id: Uuid,
    ) -> OrgChartResult<bool> {
        let ctx = ctx.or_timeout(self.config.store_timeout());
        let _locks = self.lock(&ctx, user_id, dept_id).await?;

        ctx.run(self.orgs.find(dept_id)).await?;
        let added = self.commit(&ctx, user_id, self.members.add_auxiliary(user_id, dept_id)).await?;
        if !added {
            return Ok(false);
        }

        info!(user_id = %user_id, dept_id = %dept_id, "Auxiliary department added");
        self.audit
            .emit(&ctx, AuditAction::AddAux, user_id.to_string(), aux_change(None, Some(dept_id)))
            .await;
        self.invalidate(&ctx, user_id).await;
        Ok(true)
    }

    /// Unlink an auxiliary department. The primary edge cannot be
    /// removed this way (`Conflict`).
    pub async fn remove_auxiliary(
        &self,
        ctx: &RequestContext,
        user_id: Uuid,
        dept_id: Uuid,
    ) -> OrgChartResult<()> {
        let ctx = ctx.or_timeout(self.config.store_timeout());
        let _locks = self.lock(&ctx, user_id, dept_id).await?;

        ctx.run(self.orgs.find(dept_id)).await?;
        self.commit(&ctx, user_id, self.members.remove_auxiliary(user_id, dept_id))
            .await?;

        info!(user_id = %user_id, dept_id = %dept_id, "Auxiliary department removed");
        self.audit
            .emit(&ctx, AuditAction::RemoveAux, user_id.to_string(), aux_change(Some(dept_id), None))
            .await;
        self.invalidate(&ctx, user_id).await;
        Ok(())
    }

    /// Users linked to `dept_id`, or to any department of its sub-tree
    /// when `recursive`. Each user appears once, sorted by id; a user is
    /// primary if any counted edge is primary.
    pub async fn list_users_in(
        &self,
        ctx: &RequestContext,
        dept_id: Uuid,
        recursive: bool,
    ) -> OrgChartResult<Vec<DeptMember>> {
        let ctx = ctx.or_timeout(self.config.store_timeout());
        ctx.run(self.orgs.find(dept_id)).await?;

        let edges = if recursive {
            let subtree = ctx.run(self.orgs.find_subtree(dept_id)).await?;
            let ids = subtree.into_iter().map(|o| o.id).collect();
            ctx.run(self.members.find_users_in_any(ids, MemberFilter::Any))
                .await?
        } else {
            ctx.run(self.members.find_users_in(dept_id, MemberFilter::Any))
                .await?
        };

        let mut users: BTreeMap<Uuid, bool> = BTreeMap::new();
        for edge in edges {
            *users.entry(edge.user_id).or_default() |= edge.is_primary;
        }
        Ok(users
            .into_iter()
            .map(|(user_id, is_primary)| DeptMember {
                user_id,
                is_primary,
            })
            .collect())
    }

    /// The user's primary and auxiliary edges.
    pub async fn departments_of(
        &self,
        ctx: &RequestContext,
        user_id: Uuid,
    ) -> OrgChartResult<UserDepartments> {
        let ctx = ctx.or_timeout(self.config.store_timeout());
        let edges = ctx.run(self.members.find_by_user(user_id)).await?;
        Ok(UserDepartments::from_edges(edges))
    }

    async fn lock(
        &self,
        ctx: &RequestContext,
        user_id: Uuid,
        dept_id: Uuid,
    ) -> OrgChartResult<LockSet> {
        let keys = [LockTable::user_key(user_id), LockTable::org_key(dept_id)];
        ctx.run(async move { Ok(self.locks.acquire(keys).await) })
            .await
    }

    /// A write cut short by the deadline may still have landed, so the
    /// user's scope is dropped either way.
    async fn commit<T>(
        &self,
        ctx: &RequestContext,
        user_id: Uuid,
        write: impl Future<Output = OrgChartResult<T>>,
    ) -> OrgChartResult<T> {
        let result = ctx.commit(write).await;
        if matches!(result, Err(OrgChartError::Timeout)) {
            self.invalidate(ctx, user_id).await;
        }
        result
    }

    async fn invalidate(&self, ctx: &RequestContext, user_id: Uuid) {
        let bg = ctx.background(self.config.background_timeout());
        if let Err(e) = self.cache.invalidate(&bg, user_id).await {
            warn!(user_id = %user_id, error = %e, "Failed to invalidate data scope");
        }
    }
}

fn aux_change(old: Option<Uuid>, new: Option<Uuid>) -> Changes {
    let mut changes = Changes::new();
    changes.insert("aux_dept_id".into(), FieldChange::of(&old, &new));
    changes
}
