//! Orgchart Server: application entry point.

mod config;
mod error;

use std::sync::Arc;
use std::time::Duration;

use orgchart_core::context::RequestContext;
use orgchart_db::{
    DbManager, SurrealAuditRepository, SurrealMembershipRepository, SurrealOrganizationRepository,
};
use orgchart_directory::{
    AuditEmitter, DataScopeCache, LockTable, MembershipService, MemoryScopeStore,
    OrganizationService, ScopeStore,
};
use surrealdb::Surreal;
use surrealdb::engine::remote::ws::Client;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use crate::config::ServerConfig;
use crate::error::ServerError;

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("orgchart=info,info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .init();

    if let Err(e) = run().await {
        error!(error = %e, "Orgchart server failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), ServerError> {
    info!("Starting orgchart server...");
    let config = ServerConfig::from_env()?;

    let manager = DbManager::connect(&config.db).await?;
    let db = manager.client().clone();
    orgchart_db::run_migrations(&db).await?;

    #[cfg(feature = "redis")]
    if let Some(url) = &config.redis_url {
        let store = orgchart_directory::RedisScopeStore::connect(url).await?;
        return serve(&config, db, store).await;
    }
    #[cfg(not(feature = "redis"))]
    if config.redis_url.is_some() {
        tracing::warn!("ORGCHART_REDIS_URL is set but this build lacks the redis feature; using the in-process scope store");
    }

    let store = Arc::new(MemoryScopeStore::new());
    let purge = tokio::spawn(purge_expired_scopes(
        Arc::clone(&store),
        config.directory.purge_interval(),
    ));
    let result = serve(&config, db, store).await;
    purge.abort();
    result
}

async fn serve<S: ScopeStore + 'static>(
    config: &ServerConfig,
    db: Surreal<Client>,
    store: S,
) -> Result<(), ServerError> {
    let orgs = SurrealOrganizationRepository::new(db.clone());
    let members = SurrealMembershipRepository::new(db.clone());
    let audit = SurrealAuditRepository::new(db);
    let directory = &config.directory;

    let cache = Arc::new(DataScopeCache::new(
        orgs.clone(),
        members.clone(),
        store,
        directory.scope_ttl(),
    ));
    let emitter = Arc::new(AuditEmitter::new(audit, directory.background_timeout()));
    let locks = LockTable::new();

    let org_service = OrganizationService::new(
        orgs.clone(),
        cache.clone(),
        emitter.clone(),
        locks.clone(),
        directory.clone(),
    );
    let member_service =
        MembershipService::new(orgs, members, cache, emitter, locks, directory.clone());

    let ctx = RequestContext::system();
    let forest = org_service.tree(&ctx, None, None).await?;
    let mut linked_users = 0;
    for root in &forest {
        linked_users += member_service
            .list_users_in(&ctx, root.id, true)
            .await?
            .len();
    }
    info!(
        roots = forest.len(),
        nodes = forest.iter().map(|root| root.size()).sum::<usize>(),
        linked_users,
        "Directory ready"
    );

    tokio::signal::ctrl_c().await?;
    info!("Orgchart server stopped.");
    Ok(())
}

/// Expired entries are already invisible to reads; this only bounds the
/// memory they hold.
async fn purge_expired_scopes(store: Arc<MemoryScopeStore>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let purged = store.purge_expired();
        if purged > 0 {
            debug!(purged, remaining = store.len(), "Purged expired data scopes");
        }
    }
}
