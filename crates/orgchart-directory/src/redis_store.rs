//! [`ScopeStore`] on Redis sets, shared by every server instance.

use std::collections::HashSet;
use std::time::Duration;

use orgchart_core::error::{OrgChartError, OrgChartResult};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tracing::info;

use crate::cache::ScopeStore;

#[derive(Clone)]
pub struct RedisScopeStore {
    conn: ConnectionManager,
}

impl RedisScopeStore {
    /// Open a managed connection to `url` (`redis://host:port/db`). The
    /// manager reconnects on its own after a dropped connection.
    pub async fn connect(url: &str) -> OrgChartResult<Self> {
        let client = redis::Client::open(url).map_err(storage)?;
        let conn = ConnectionManager::new(client).await.map_err(storage)?;
        info!("Connected to Redis scope store");
        Ok(Self { conn })
    }
}

impl ScopeStore for RedisScopeStore {
    async fn add_members(&self, key: &str, members: Vec<String>) -> OrgChartResult<()> {
        // SADD rejects an empty member list.
        if members.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        conn.sadd::<_, _, ()>(key, members).await.map_err(storage)
    }

    async fn members(&self, key: &str) -> OrgChartResult<HashSet<String>> {
        let mut conn = self.conn.clone();
        conn.smembers(key).await.map_err(storage)
    }

    async fn delete(&self, key: &str) -> OrgChartResult<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await.map_err(storage)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> OrgChartResult<()> {
        let secs = i64::try_from(ttl.as_secs().max(1)).unwrap_or(i64::MAX);
        let mut conn = self.conn.clone();
        conn.expire::<_, ()>(key, secs).await.map_err(storage)
    }
}

fn storage(e: redis::RedisError) -> OrgChartError {
    OrgChartError::Storage(format!("redis: {e}"))
}
