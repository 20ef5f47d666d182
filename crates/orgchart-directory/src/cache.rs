//! Data-scope cache.
//!
//! Maps a user to the set of department ids they may see: their primary
//! department and every department below it. Entries live in a
//! [`ScopeStore`] under `user:dept:<user_id>` with a finite TTL and are
//! dropped eagerly by the services whenever a mutation may change them.
//! A missing entry means "rebuild on next access", never an error.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use orgchart_core::context::RequestContext;
use orgchart_core::error::OrgChartResult;
use orgchart_core::models::membership::MemberFilter;
use orgchart_core::repository::{MembershipRepository, OrganizationRepository};
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

const KEY_PREFIX: &str = "user:dept:";

/// Set-valued key/value store with expiry.
pub trait ScopeStore: Send + Sync {
    fn add_members(
        &self,
        key: &str,
        members: Vec<String>,
    ) -> impl Future<Output = OrgChartResult<()>> + Send;
    /// Empty when the key is absent or expired.
    fn members(&self, key: &str) -> impl Future<Output = OrgChartResult<HashSet<String>>> + Send;
    fn delete(&self, key: &str) -> impl Future<Output = OrgChartResult<()>> + Send;
    fn expire(&self, key: &str, ttl: Duration) -> impl Future<Output = OrgChartResult<()>> + Send;
}

#[derive(Debug)]
struct ScopeEntry {
    members: HashSet<String>,
    expires_at: Option<Instant>,
}

impl ScopeEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| now < at)
    }
}

/// In-process [`ScopeStore`] on a concurrent map.
#[derive(Debug, Default)]
pub struct MemoryScopeStore {
    entries: DashMap<String, ScopeEntry>,
}

impl MemoryScopeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop expired entries and return how many went. Reads already
    /// ignore them. Writers may insert while the purge runs, so the count
    /// saturates rather than going negative.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live(now));
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ScopeStore for MemoryScopeStore {
    async fn add_members(&self, key: &str, members: Vec<String>) -> OrgChartResult<()> {
        let now = Instant::now();
        let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| ScopeEntry {
            members: HashSet::new(),
            expires_at: None,
        });
        if !entry.is_live(now) {
            entry.members.clear();
            entry.expires_at = None;
        }
        entry.members.extend(members);
        Ok(())
    }

    async fn members(&self, key: &str) -> OrgChartResult<HashSet<String>> {
        let now = Instant::now();
        Ok(self
            .entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.members.clone())
            .unwrap_or_default())
    }

    async fn delete(&self, key: &str) -> OrgChartResult<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> OrgChartResult<()> {
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }
}

impl<S: ScopeStore> ScopeStore for Arc<S> {
    fn add_members(
        &self,
        key: &str,
        members: Vec<String>,
    ) -> impl Future<Output = OrgChartResult<()>> + Send {
        (**self).add_members(key, members)
    }

    fn members(&self, key: &str) -> impl Future<Output = OrgChartResult<HashSet<String>>> + Send {
        (**self).members(key)
    }

    fn delete(&self, key: &str) -> impl Future<Output = OrgChartResult<()>> + Send {
        (**self).delete(key)
    }

    fn expire(&self, key: &str, ttl: Duration) -> impl Future<Output = OrgChartResult<()>> + Send {
        (**self).expire(key, ttl)
    }
}

/// Store key of a user's scope entry.
pub fn scope_key(user_id: Uuid) -> String {
    format!("{KEY_PREFIX}{user_id}")
}

/// Outcome of a bulk invalidation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InvalidationReport {
    pub attempted: usize,
    pub failed: usize,
}

pub struct DataScopeCache<O, M, S> {
    orgs: O,
    members: M,
    store: S,
    ttl: Duration,
}

impl<O, M, S> DataScopeCache<O, M, S>
where
    O: OrganizationRepository,
    M: MembershipRepository,
    S: ScopeStore,
{
    pub fn new(orgs: O, members: M, store: S, ttl: Duration) -> Self {
        Self {
            orgs,
            members,
            store,
            ttl,
        }
    }

    pub fn key(user_id: Uuid) -> String {
        scope_key(user_id)
    }

    /// Recompute and store the user's scope. A user without a primary
    /// department leaves the cache untouched and gets an empty scope.
    pub async fn build(&self, ctx: &RequestContext, user_id: Uuid) -> OrgChartResult<HashSet<Uuid>> {
        let Some(primary) = ctx.run(self.members.find_primary(user_id)).await? else {
            debug!(user_id = %user_id, "No primary department; scope not cached");
            return Ok(HashSet::new());
        };

        let subtree = ctx.run(self.orgs.find_subtree(primary.dept_id)).await?;
        let scope: HashSet<Uuid> = subtree.iter().map(|o| o.id).collect();
        let key = Self::key(user_id);

        ctx.run(self.store.delete(&key)).await?;
        if !scope.is_empty() {
            let members = scope.iter().map(Uuid::to_string).collect();
            ctx.run(self.store.add_members(&key, members)).await?;
            ctx.run(self.store.expire(&key, self.ttl)).await?;
        }

        debug!(
            user_id = %user_id,
            primary = %primary.dept_id,
            departments = scope.len(),
            "Data scope rebuilt"
        );
        Ok(scope)
    }

    /// Cached scope; empty when absent.
    pub async fn get(&self, ctx: &RequestContext, user_id: Uuid) -> OrgChartResult<HashSet<Uuid>> {
        let raw = ctx.run(self.store.members(&Self::key(user_id))).await?;
        Ok(raw
            .iter()
            .filter_map(|member| match Uuid::parse_str(member) {
                Ok(id) => Some(id),
                Err(e) => {
                    warn!(user_id = %user_id, member = %member, error = %e, "Dropping malformed scope member");
                    None
                }
            })
            .collect())
    }

    /// Cached scope, rebuilding it when absent.
    pub async fn resolve(
        &self,
        ctx: &RequestContext,
        user_id: Uuid,
    ) -> OrgChartResult<HashSet<Uuid>> {
        let cached = self.get(ctx, user_id).await?;
        if !cached.is_empty() {
            return Ok(cached);
        }
        self.build(ctx, user_id).await
    }

    pub async fn invalidate(&self, ctx: &RequestContext, user_id: Uuid) -> OrgChartResult<()> {
        ctx.run(self.store.delete(&Self::key(user_id))).await
    }

    /// Drop every user's entry; individual failures are counted, not raised.
    pub async fn invalidate_users(
        &self,
        ctx: &RequestContext,
        users: impl IntoIterator<Item = Uuid>,
    ) -> InvalidationReport {
        let users: BTreeSet<Uuid> = users.into_iter().collect();
        let mut report = InvalidationReport::default();
        for user_id in users {
            report.attempted += 1;
            if let Err(e) = self.invalidate(ctx, user_id).await {
                report.failed += 1;
                warn!(user_id = %user_id, error = %e, "Failed to invalidate data scope");
            }
        }
        if report.failed > 0 {
            warn!(
                attempted = report.attempted,
                failed = report.failed,
                "Data scope invalidation incomplete"
            );
        }
        report
    }

    /// Invalidate every user with any edge to `dept_id`.
    pub async fn invalidate_for_dept(
        &self,
        ctx: &RequestContext,
        dept_id: Uuid,
    ) -> OrgChartResult<InvalidationReport> {
        let edges = ctx
            .run(self.members.find_users_in(dept_id, MemberFilter::Any))
            .await?;
        Ok(self
            .invalidate_users(ctx, edges.into_iter().map(|m| m.user_id))
            .await)
    }

    /// Invalidate every user whose primary department is one of `dept_ids`.
    pub async fn invalidate_for_primaries_in(
        &self,
        ctx: &RequestContext,
        dept_ids: Vec<Uuid>,
    ) -> OrgChartResult<InvalidationReport> {
        if dept_ids.is_empty() {
            return Ok(InvalidationReport::default());
        }
        let edges = ctx
            .run(
                self.members
                    .find_users_in_any(dept_ids, MemberFilter::PrimaryOnly),
            )
            .await?;
        Ok(self
            .invalidate_users(ctx, edges.into_iter().map(|m| m.user_id))
            .await)
    }
}
