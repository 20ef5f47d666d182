//! Organization service: create, update, move and delete over the
//! organization forest, plus tree listing.
//!
//! Every mutation follows the same shape: lock, re-read, validate, write
//! through the repository (one transaction), then audit and invalidate
//! data-scope entries after commit.

use std::collections::BTreeSet;
use std::sync::Arc;

use orgchart_core::context::RequestContext;
use orgchart_core::error::{OrgChartError, OrgChartResult};
use orgchart_core::ids::ROOT_SENTINEL;
use orgchart_core::models::audit::{AuditAction, Changes, FieldChange};
use orgchart_core::models::organization::{
    BatchItemError, BatchOutcome, CreateOrganization, NewOrganization, OrgStatus, OrgTreeNode,
    Organization, OrganizationDetail, SubtreeMove, UpdateOrganization,
};
use orgchart_core::repository::{
    AuditSink, MembershipRepository, OrganizationRepository,
};
use orgchart_core::tree;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audit::{self, AuditEmitter};
use crate::cache::{DataScopeCache, ScopeStore};
use crate::config::DirectoryConfig;
use crate::lock::{LockSet, LockTable};

/// Lock-then-revalidate rounds before giving up on a node whose path
/// keeps changing underneath us.
const MAX_LOCK_ATTEMPTS: usize = 3;

/// Lock key of a node's parent slot (the root key for roots).
fn parent_key(parent_id: Option<Uuid>) -> String {
    parent_id.map_or_else(LockTable::root_key, LockTable::org_key)
}

/// Keys covering a node, its parent slot and every ancestor.
fn lineage_keys(org: &Organization) -> Vec<String> {
    let mut keys: Vec<String> = tree::path_of(org)
        .into_iter()
        .map(LockTable::org_key)
        .collect();
    keys.push(parent_key(org.parent_id));
    keys
}

fn node_keys(org: &Organization) -> Vec<String> {
    vec![LockTable::org_key(org.id), parent_key(org.parent_id)]
}

fn contention(id: Uuid) -> OrgChartError {
    OrgChartError::Conflict {
        reason: format!("organization {id} was modified concurrently; retry"),
    }
}

fn blank_to_none(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Trim the name and fold empty nullable strings into "clear".
fn normalize_update(mut input: UpdateOrganization) -> OrgChartResult<UpdateOrganization> {
    if let Some(name) = input.name.take() {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(OrgChartError::invalid("organization name must not be empty"));
        }
        input.name = Some(name);
    }
    input.code = input.code.map(blank_to_none);
    input.description = input.description.map(blank_to_none);
    Ok(input)
}

/// Organization service.
///
/// Generic over repository implementations so that this crate has no
/// dependency on the database crate.
pub struct OrganizationService<O, M, A, S>
where
    O: OrganizationRepository,
    M: MembershipRepository,
    A: AuditSink,
    S: ScopeStore,
{
    orgs: O,
    cache: Arc<DataScopeCache<O, M, S>>,
    audit: Arc<AuditEmitter<A>>,
    locks: LockTable,
    config: DirectoryConfig,
}

impl<O, M, A, S> OrganizationService<O, M, A, S>
where
    O: OrganizationRepository,
    M: MembershipRepository,
    A: AuditSink,
    S: ScopeStore,
{
    pub fn new(
        orgs: O,
        cache: Arc<DataScopeCache<O, M, S>>,
        audit: Arc<AuditEmitter<A>>,
        locks: LockTable,
        config: DirectoryConfig,
    ) -> Self {
        Self {
            orgs,
            cache,
            audit,
            locks,
            config,
        }
    }

    /// Create a node under `input.parent_id` (a root when absent).
    pub async fn create(
        &self,
        ctx: &RequestContext,
        input: CreateOrganization,
    ) -> OrgChartResult<Organization> {
        let ctx = ctx.or_timeout(self.config.store_timeout());

        let name = input.name.trim().to_string();
        if name.is_empty() {
            return Err(OrgChartError::invalid("organization name must not be empty"));
        }
        let code = blank_to_none(input.code);

        let (parent, locks) = self.lock_parent(&ctx, input.parent_id).await?;

        if ctx
            .run(self.orgs.find_by_parent_and_name(input.parent_id, &name))
            .await?
            .is_some()
        {
            return Err(OrgChartError::NameConflict { name });
        }
        if let Some(code) = &code
            && ctx.run(self.orgs.find_by_code(code)).await?.is_some()
        {
            return Err(OrgChartError::CodeConflict { code: code.clone() });
        }

        let ancestors = match &parent {
            Some(p) => tree::compute_ancestors(&p.ancestors, &p.id.to_string()),
            None => ROOT_SENTINEL.to_string(),
        };
        let above = tree::path_ids(&ancestors);

        let insert = self.orgs.insert(NewOrganization {
            parent_id: input.parent_id,
            name,
            code,
            ancestors,
            sort_order: input.sort_order,
            leader_id: input.leader_id,
            kind: input.kind,
            status: input.status.unwrap_or_default(),
            description: blank_to_none(input.description),
        });
        let org = self.commit(&ctx, &above, insert).await?;
        drop(locks);

        info!(
            organization_id = %org.id,
            parent = %org.parent_ref(),
            name = %org.name,
            "Organization created"
        );

        self.audit
            .emit(&ctx, AuditAction::Create, org.id.to_string(), audit::created(&org))
            .await;

        // Users whose primary department sits above the new node now see it.
        let mut affected = above;
        affected.push(org.id);
        self.invalidate_primaries(&ctx, affected).await;

        Ok(org)
    }

    /// Edit a node's own fields. Moving is [`Self::move_node`].
    pub async fn update(
        &self,
        ctx: &RequestContext,
        id: Uuid,
        input: UpdateOrganization,
    ) -> OrgChartResult<Organization> {
        let ctx = ctx.or_timeout(self.config.store_timeout());
        let input = normalize_update(input)?;

        let (current, locks) = self.lock_node(&ctx, id).await?;
        self.validate_update(&ctx, &current, &input).await?;

        if input.is_empty() {
            return Ok(current);
        }

        let updated = ctx.commit(self.orgs.update(id, input)).await?;
        drop(locks);

        let changes = current.diff(&updated);
        info!(
            organization_id = %id,
            fields = ?changes.keys().collect::<Vec<_>>(),
            "Organization updated"
        );
        self.audit
            .emit(&ctx, AuditAction::Update, id.to_string(), changes)
            .await;

        Ok(updated)
    }

    async fn validate_update(
        &self,
        ctx: &RequestContext,
        current: &Organization,
        input: &UpdateOrganization,
    ) -> OrgChartResult<()> {
        if let Some(name) = &input.name
            && *name != current.name
            && let Some(other) = ctx
                .run(self.orgs.find_by_parent_and_name(current.parent_id, name))
                .await?
            && other.id != current.id
        {
            return Err(OrgChartError::NameConflict { name: name.clone() });
        }

        if let Some(Some(code)) = &input.code
            && current.code.as_ref() != Some(code)
            && let Some(other) = ctx.run(self.orgs.find_by_code(code)).await?
            && other.id != current.id
        {
            return Err(OrgChartError::CodeConflict { code: code.clone() });
        }

        if input.status == Some(OrgStatus::Disabled) {
            let children = ctx.run(self.orgs.find_children(Some(current.id))).await?;
            if children.iter().any(|c| c.status == OrgStatus::Enabled) {
                return Err(OrgChartError::HasActiveChildren {
                    id: current.id.to_string(),
                });
            }
        }

        Ok(())
    }

    /// Re-parent `id` under `target_parent_id` (to the top level when
    /// absent), rewriting the ancestor path of the whole sub-tree.
    pub async fn move_node(
        &self,
        ctx: &RequestContext,
        id: Uuid,
        target_parent_id: Option<Uuid>,
    ) -> OrgChartResult<Organization> {
        let ctx = ctx.or_timeout(self.config.store_timeout());

        ctx.run(self.orgs.find(id)).await?;
        if target_parent_id == Some(id) {
            return Err(OrgChartError::invalid(
                "an organization cannot be moved under itself",
            ));
        }

        for _ in 0..MAX_LOCK_ATTEMPTS {
            let (node, target) = self.load_move(&ctx, id, target_parent_id).await?;
            let keys = Self::move_keys(&node, target.as_ref());
            let locks = self.acquire(&ctx, keys).await?;

            let (node, target) = self.load_move(&ctx, id, target_parent_id).await?;
            if !locks.covers(&Self::move_keys(&node, target.as_ref())) {
                debug!(organization_id = %id, "Path changed while locking; retrying move");
                continue;
            }
            return self.relocate(&ctx, node, target, locks).await;
        }

        Err(contention(id))
    }

    async fn load_move(
        &self,
        ctx: &RequestContext,
        id: Uuid,
        target_parent_id: Option<Uuid>,
    ) -> OrgChartResult<(Organization, Option<Organization>)> {
        let node = ctx.run(self.orgs.find(id)).await?;
        let target = match target_parent_id {
            Some(target_id) => Some(self.load_parent(ctx, target_id).await?),
            None => None,
        };
        Ok((node, target))
    }

    fn move_keys(node: &Organization, target: Option<&Organization>) -> Vec<String> {
        let mut keys = lineage_keys(node);
        match target {
            Some(t) => keys.extend(lineage_keys(t)),
            None => keys.push(LockTable::root_key()),
        }
        keys
    }

    async fn relocate(
        &self,
        ctx: &RequestContext,
        node: Organization,
        target: Option<Organization>,
        locks: LockSet,
    ) -> OrgChartResult<Organization> {
        let target_id = target.as_ref().map(|t| t.id);
        if node.parent_id == target_id {
            debug!(organization_id = %node.id, "Move target is the current parent");
            return Ok(node);
        }

        if let Some(target_id) = target_id
            && ctx.run(self.orgs.is_descendant(node.id, target_id)).await?
        {
            return Err(OrgChartError::MoveCycle {
                id: node.id.to_string(),
                target: target_id.to_string(),
            });
        }

        if let Some(clash) = ctx
            .run(self.orgs.find_by_parent_and_name(target_id, &node.name))
            .await?
            && clash.id != node.id
        {
            return Err(OrgChartError::NameConflict { name: node.name });
        }

        let new_ancestors = match &target {
            Some(t) => tree::compute_ancestors(&t.ancestors, &t.id.to_string()),
            None => ROOT_SENTINEL.to_string(),
        };
        let old_prefix = node.descendant_prefix();
        let new_prefix = format!("{new_ancestors},{}", node.id);

        let subtree = ctx.run(self.orgs.find_subtree(node.id)).await?;
        let descendants: Vec<Organization> =
            subtree.into_iter().filter(|o| o.id != node.id).collect();
        let rewrites = tree::descendant_rewrites(&descendants, &old_prefix, &new_prefix);

        // Scopes rooted in the sub-tree or on either ancestor chain change.
        let mut affected: Vec<Uuid> = descendants.iter().map(|o| o.id).collect();
        affected.extend(tree::path_of(&node));
        affected.extend(tree::path_ids(&new_ancestors));

        let plan = SubtreeMove {
            id: node.id,
            parent_id: target_id,
            ancestors: new_ancestors,
            descendants: rewrites,
        };
        let moved = self.commit(ctx, &affected, self.orgs.apply_move(plan)).await?;
        drop(locks);

        info!(
            organization_id = %node.id,
            from = %node.parent_ref(),
            to = %moved.parent_ref(),
            descendants = descendants.len(),
            "Organization moved"
        );

        self.audit
            .emit(ctx, AuditAction::Move, node.id.to_string(), node.diff(&moved))
            .await;
        self.invalidate_primaries(ctx, affected).await;

        Ok(moved)
    }

    /// Soft-delete an empty, non-root node.
    pub async fn delete(&self, ctx: &RequestContext, id: Uuid) -> OrgChartResult<()> {
        let ctx = ctx.or_timeout(self.config.store_timeout());

        let (node, locks) = self.lock_node(&ctx, id).await?;

        if ctx.run(self.orgs.has_children(id)).await? {
            return Err(OrgChartError::HasChildren { id: id.to_string() });
        }
        let members = ctx.run(self.orgs.count_members(id)).await?;
        if members > 0 {
            return Err(OrgChartError::HasMembers {
                id: id.to_string(),
                count: members,
            });
        }
        if node.is_root() {
            return Err(OrgChartError::RootUndeletable { id: id.to_string() });
        }

        let above = tree::path_ids(&node.ancestors);
        self.commit(&ctx, &above, self.orgs.soft_delete(id)).await?;
        drop(locks);

        info!(organization_id = %id, name = %node.name, "Organization deleted");
        self.audit
            .emit(&ctx, AuditAction::Delete, id.to_string(), audit::deleted(&node))
            .await;

        self.invalidate_primaries(&ctx, above).await;
        Ok(())
    }

    /// The forest of live nodes, optionally filtered by status and by a
    /// name keyword (a node is kept when it or one of its ancestors
    /// matches). Nodes whose parent was filtered out are dropped.
    pub async fn tree(
        &self,
        ctx: &RequestContext,
        status: Option<OrgStatus>,
        name: Option<&str>,
    ) -> OrgChartResult<Vec<OrgTreeNode>> {
        let ctx = ctx.or_timeout(self.config.store_timeout());
        let keyword = name.map(str::trim).filter(|k| !k.is_empty());

        let nodes = match keyword {
            // Ancestor names are matched across every live node, whatever
            // its status.
            Some(keyword) => {
                let all = ctx.run(self.orgs.find_tree(None)).await?;
                tree::retain_by_name(all, keyword)
                    .into_iter()
                    .filter(|n| status.is_none_or(|s| n.status == s))
                    .collect()
            }
            None => ctx.run(self.orgs.find_tree(status)).await?,
        };

        Ok(tree::build_forest(&nodes))
    }

    /// A node together with its parent's name.
    pub async fn detail(&self, ctx: &RequestContext, id: Uuid) -> OrgChartResult<OrganizationDetail> {
        let ctx = ctx.or_timeout(self.config.store_timeout());
        let organization = ctx.run(self.orgs.find(id)).await?;

        let parent_name = match organization.parent_id {
            Some(parent_id) => match ctx.run(self.orgs.find(parent_id)).await {
                Ok(parent) => Some(parent.name),
                Err(OrgChartError::NotFound { .. }) => None,
                Err(e) => return Err(e),
            },
            None => None,
        };

        Ok(OrganizationDetail {
            organization,
            parent_name,
        })
    }

    /// Apply `status` to each node independently. Domain failures are
    /// collected per item; infrastructure failures abort the batch.
    pub async fn batch_update_status(
        &self,
        ctx: &RequestContext,
        ids: Vec<Uuid>,
        status: OrgStatus,
    ) -> OrgChartResult<BatchOutcome> {
        let ctx = ctx.or_timeout(self.config.store_timeout());
        if ids.is_empty() {
            return Err(OrgChartError::invalid("no organization ids supplied"));
        }

        let mut seen = BTreeSet::new();
        let mut outcome = BatchOutcome::default();
        let mut updated = Vec::new();
        let mut aborted = None;

        for id in ids.into_iter().filter(|id| seen.insert(*id)) {
            match self.set_status(&ctx, id, status).await {
                Ok(()) => {
                    outcome.success_count += 1;
                    updated.push(id);
                }
                Err(e) if e.is_infrastructure() => {
                    aborted = Some(e);
                    break;
                }
                Err(error) => {
                    debug!(organization_id = %id, error = %error, "Batch item rejected");
                    outcome.errors.push(BatchItemError { id, error });
                }
            }
        }

        info!(
            status = status.as_str(),
            succeeded = outcome.success_count,
            failed = outcome.errors.len(),
            "Batch status update finished"
        );

        let target = seen
            .iter()
            .map(Uuid::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let mut changes = Changes::new();
        changes.insert(
            "status".into(),
            FieldChange::new(serde_json::Value::Null, serde_json::json!(status)),
        );
        changes.insert(
            "updated_ids".into(),
            FieldChange::of(&Vec::<Uuid>::new(), &updated),
        );
        self.audit
            .emit(&ctx, AuditAction::BatchUpdateStatus, target, changes)
            .await;

        // Items committed before the abort stay committed and are audited above.
        match aborted {
            Some(e) => Err(e),
            None => Ok(outcome),
        }
    }

    async fn set_status(
        &self,
        ctx: &RequestContext,
        id: Uuid,
        status: OrgStatus,
    ) -> OrgChartResult<()> {
        let input = UpdateOrganization {
            status: Some(status),
            ..Default::default()
        };
        let (current, _locks) = self.lock_node(ctx, id).await?;
        self.validate_update(ctx, &current, &input).await?;
        if current.status != status {
            ctx.commit(self.orgs.update(id, input)).await?;
        }
        Ok(())
    }

    /// Issue a store write through [`RequestContext::commit`]. A write cut
    /// short by the deadline has an unknown outcome, so the scopes it could
    /// have changed are dropped anyway.
    async fn commit<T>(
        &self,
        ctx: &RequestContext,
        affected: &[Uuid],
        write: impl Future<Output = OrgChartResult<T>>,
    ) -> OrgChartResult<T> {
        let result = ctx.commit(write).await;
        if matches!(result, Err(OrgChartError::Timeout)) {
            warn!(
                departments = affected.len(),
                "Store write timed out; dropping possibly affected data scopes"
            );
            self.invalidate_primaries(ctx, affected.to_vec()).await;
        }
        result
    }

    async fn acquire(&self, ctx: &RequestContext, keys: Vec<String>) -> OrgChartResult<LockSet> {
        ctx.run(async move { Ok(self.locks.acquire(keys).await) })
            .await
    }

    /// Lock a node and its parent slot, returning the node as read
    /// under the lock.
    async fn lock_node(
        &self,
        ctx: &RequestContext,
        id: Uuid,
    ) -> OrgChartResult<(Organization, LockSet)> {
        for _ in 0..MAX_LOCK_ATTEMPTS {
            let node = ctx.run(self.orgs.find(id)).await?;
            let locks = self.acquire(ctx, node_keys(&node)).await?;
            let node = ctx.run(self.orgs.find(id)).await?;
            if locks.covers(&node_keys(&node)) {
                return Ok((node, locks));
            }
        }
        Err(contention(id))
    }

    /// Lock the lineage of a prospective parent, returning it as read
    /// under the lock. `None` locks the root slot.
    async fn lock_parent(
        &self,
        ctx: &RequestContext,
        parent_id: Option<Uuid>,
    ) -> OrgChartResult<(Option<Organization>, LockSet)> {
        let Some(parent_id) = parent_id else {
            let locks = self.acquire(ctx, vec![LockTable::root_key()]).await?;
            return Ok((None, locks));
        };

        for _ in 0..MAX_LOCK_ATTEMPTS {
            let parent = self.load_parent(ctx, parent_id).await?;
            let locks = self.acquire(ctx, lineage_keys(&parent)).await?;
            let parent = self.load_parent(ctx, parent_id).await?;
            if locks.covers(&lineage_keys(&parent)) {
                return Ok((Some(parent), locks));
            }
        }
        Err(contention(parent_id))
    }

    async fn load_parent(&self, ctx: &RequestContext, id: Uuid) -> OrgChartResult<Organization> {
        match ctx.run(self.orgs.find(id)).await {
            Err(OrgChartError::NotFound { .. }) => {
                Err(OrgChartError::ParentNotFound { id: id.to_string() })
            }
            other => other,
        }
    }

    /// Post-commit: drop the cached scope of users whose primary
    /// department is one of `dept_ids`. Runs on a background context so
    /// a cancelled request still invalidates.
    async fn invalidate_primaries(&self, ctx: &RequestContext, dept_ids: Vec<Uuid>) {
        let bg = ctx.background(self.config.background_timeout());
        let dept_ids: Vec<Uuid> = dept_ids.into_iter().collect::<BTreeSet<_>>().into_iter().collect();
        match self.cache.invalidate_for_primaries_in(&bg, dept_ids).await {
            Ok(report) if report.attempted > 0 => {
                debug!(
                    attempted = report.attempted,
                    failed = report.failed,
                    "Data scopes invalidated"
                );
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Failed to enumerate data scopes to invalidate"),
        }
    }
}
