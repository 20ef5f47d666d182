//! Shared wiring for the directory integration tests: services over an
//! in-memory SurrealDB and an in-memory scope store.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use orgchart_core::context::{Actor, RequestContext};
use orgchart_core::models::membership::NewMembership;
use orgchart_core::error::OrgChartResult;
use orgchart_core::models::organization::{
    CreateOrganization, NewOrganization, OrgStatus, Organization, SubtreeMove, UpdateOrganization,
};
use orgchart_core::repository::{MembershipRepository, OrganizationRepository};
use orgchart_db::{
    SurrealAuditRepository, SurrealMembershipRepository, SurrealOrganizationRepository,
};
use orgchart_directory::{
    AuditEmitter, DataScopeCache, DirectoryConfig, LockTable, MembershipService,
    MemoryScopeStore, OrganizationService,
};
use surrealdb::Surreal;
use surrealdb::engine::local::{Db, Mem};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub type Orgs = SurrealOrganizationRepository<Db>;
pub type Members = SurrealMembershipRepository<Db>;
pub type Audit = SurrealAuditRepository<Db>;
pub type Cache<O = Orgs> = DataScopeCache<O, Members, MemoryScopeStore>;

/// Services wired over `O`. `orgs` always reaches the store directly.
pub struct Harness<O: OrganizationRepository = Orgs> {
    pub orgs: Orgs,
    pub members: Members,
    pub audit: Audit,
    pub cache: Arc<Cache<O>>,
    pub org_service: OrganizationService<O, Members, Audit, MemoryScopeStore>,
    pub member_service: MembershipService<O, Members, Audit, MemoryScopeStore>,
    pub ctx: RequestContext,
}

pub async fn setup() -> Harness {
    setup_with(|orgs| orgs).await
}

/// Like [`setup`], with the services seeing the organization repository
/// through `wrap`.
pub async fn setup_with<O>(wrap: impl FnOnce(Orgs) -> O) -> Harness<O>
where
    O: OrganizationRepository + Clone,
{
    let db = Surreal::new::<Mem>(()).await.unwrap();
    db.use_ns("test").use_db("test").await.unwrap();
    orgchart_db::run_migrations(&db).await.unwrap();

    let orgs = SurrealOrganizationRepository::new(db.clone());
    let members = SurrealMembershipRepository::new(db.clone());
    let audit = SurrealAuditRepository::new(db);
    let config = DirectoryConfig::default();
    let service_orgs = wrap(orgs.clone());

    let cache = Arc::new(DataScopeCache::new(
        service_orgs.clone(),
        members.clone(),
        MemoryScopeStore::new(),
        config.scope_ttl(),
    ));
    let emitter = Arc::new(AuditEmitter::new(
        audit.clone(),
        Duration::from_secs(config.background_timeout_secs),
    ));
    let locks = LockTable::new();

    let org_service = OrganizationService::new(
        service_orgs.clone(),
        cache.clone(),
        emitter.clone(),
        locks.clone(),
        config.clone(),
    );
    let member_service = MembershipService::new(
        service_orgs,
        members.clone(),
        cache.clone(),
        emitter,
        locks,
        config,
    );

    Harness {
        orgs,
        members,
        audit,
        cache,
        org_service,
        member_service,
        ctx: RequestContext::new(Actor::new("admin-1", "Alice")),
    }
}

impl<O: OrganizationRepository> Harness<O> {
    pub async fn create(&self, parent: Option<&Organization>, name: &str) -> Organization {
        self.org_service
            .create(
                &self.ctx,
                CreateOrganization {
                    parent_id: parent.map(|p| p.id),
                    name: name.into(),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
    }

    pub async fn reload(&self, org: &Organization) -> Organization {
        self.orgs.find(org.id).await.unwrap()
    }

    pub async fn link(&self, user_id: Uuid, dept: &Organization, is_primary: bool) {
        self.members
            .insert(NewMembership {
                user_id,
                dept_id: dept.id,
                is_primary,
            })
            .await
            .unwrap();
    }

    /// Every live node satisfies `ancestors = parent.ancestors + "," + parent.id`
    /// and sibling names are unique.
    pub async fn assert_forest_consistent(&self) {
        let nodes = self.orgs.find_tree(None).await.unwrap();
        let mut siblings = std::collections::HashSet::new();
        for node in &nodes {
            assert!(
                siblings.insert((node.parent_id, node.name.clone())),
                "duplicate sibling name {:?} under {:?}",
                node.name,
                node.parent_id
            );
            match node.parent_id {
                None => assert_eq!(node.ancestors, "0", "root {} path", node.name),
                Some(parent_id) => {
                    let parent = nodes
                        .iter()
                        .find(|p| p.id == parent_id)
                        .unwrap_or_else(|| panic!("{} has no live parent", node.name));
                    assert_eq!(
                        node.ancestors,
                        format!("{},{}", parent.ancestors, parent.id),
                        "path of {}",
                        node.name
                    );
                    assert!(
                        !orgchart_core::tree::is_on_path(&node.id.to_string(), &node.ancestors),
                        "{} is its own ancestor",
                        node.name
                    );
                }
            }
        }
    }
}

pub fn user() -> Uuid {
    Uuid::now_v7()
}

// ---------------------------------------------------------------------------
// Interleaving control
// ---------------------------------------------------------------------------

/// One-shot stopping point inside a repository call.
#[derive(Debug, Default)]
pub struct Pause {
    armed: AtomicBool,
    entered: Notify,
    release: Notify,
}

impl Pause {
    pub fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }

    /// Resolves once an armed call has reached the stopping point.
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        self.release.notify_one();
    }

    async fn hit(&self) {
        if self.armed.swap(false, Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
    }
}

/// Organization repository that can stop a caller after `count_members`
/// has read the store, and cancel a request once `apply_move` committed.
#[derive(Clone)]
pub struct GatedOrgs {
    inner: Orgs,
    pub after_count_members: Arc<Pause>,
    cancel_after_move: Arc<Mutex<Option<CancellationToken>>>,
}

impl GatedOrgs {
    pub fn new(inner: Orgs) -> Self {
        Self {
            inner,
            after_count_members: Arc::default(),
            cancel_after_move: Arc::default(),
        }
    }

    /// Cancel `token` as soon as the next `apply_move` has committed.
    pub fn cancel_after_move(&self, token: CancellationToken) {
        *self.cancel_after_move.lock().unwrap() = Some(token);
    }
}

impl OrganizationRepository for GatedOrgs {
    async fn insert(&self, input: NewOrganization) -> OrgChartResult<Organization> {
        self.inner.insert(input).await
    }

    async fn find(&self, id: Uuid) -> OrgChartResult<Organization> {
        self.inner.find(id).await
    }

    async fn find_by_code(&self, code: &str) -> OrgChartResult<Option<Organization>> {
        self.inner.find_by_code(code).await
    }

    async fn find_by_parent_and_name(
        &self,
        parent_id: Option<Uuid>,
        name: &str,
    ) -> OrgChartResult<Option<Organization>> {
        self.inner.find_by_parent_and_name(parent_id, name).await
    }

    async fn update(&self, id: Uuid, input: UpdateOrganization) -> OrgChartResult<Organization> {
        self.inner.update(id, input).await
    }

    async fn apply_move(&self, plan: SubtreeMove) -> OrgChartResult<Organization> {
        let moved = self.inner.apply_move(plan).await;
        let token = self.cancel_after_move.lock().unwrap().take();
        if let Some(token) = token {
            token.cancel();
        }
        moved
    }

    async fn soft_delete(&self, id: Uuid) -> OrgChartResult<()> {
        self.inner.soft_delete(id).await
    }

    async fn find_tree(&self, status: Option<OrgStatus>) -> OrgChartResult<Vec<Organization>> {
        self.inner.find_tree(status).await
    }

    async fn find_children(&self, parent_id: Option<Uuid>) -> OrgChartResult<Vec<Organization>> {
        self.inner.find_children(parent_id).await
    }

    async fn find_subtree(&self, root_id: Uuid) -> OrgChartResult<Vec<Organization>> {
        self.inner.find_subtree(root_id).await
    }

    async fn has_children(&self, id: Uuid) -> OrgChartResult<bool> {
        self.inner.has_children(id).await
    }

    async fn count_members(&self, dept_id: Uuid) -> OrgChartResult<u64> {
        let count = self.inner.count_members(dept_id).await;
        self.after_count_members.hit().await;
        count
    }

    async fn is_descendant(&self, ancestor_id: Uuid, candidate_id: Uuid) -> OrgChartResult<bool> {
        self.inner.is_descendant(ancestor_id, candidate_id).await
    }
}
