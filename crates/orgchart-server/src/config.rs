//! Server configuration from `ORGCHART_*` environment variables.

use std::str::FromStr;

use orgchart_db::DbConfig;
use orgchart_directory::DirectoryConfig;

use crate::error::ServerError;

#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    pub db: DbConfig,
    pub directory: DirectoryConfig,
    /// Shared Redis scope store; the in-process store is used when unset.
    /// Only honoured by builds with the `redis` feature.
    pub redis_url: Option<String>,
}

impl ServerConfig {
    /// Read the process environment. Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, ServerError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ServerError> {
        let mut config = Self::default();
        let db = &mut config.db;
        if let Some(v) = lookup("ORGCHART_DB_URL") {
            db.url = v;
        }
        if let Some(v) = lookup("ORGCHART_DB_NAMESPACE") {
            db.namespace = v;
        }
        if let Some(v) = lookup("ORGCHART_DB_DATABASE") {
            db.database = v;
        }
        if let Some(v) = lookup("ORGCHART_DB_USERNAME") {
            db.username = v;
        }
        if let Some(v) = lookup("ORGCHART_DB_PASSWORD") {
            db.password = v;
        }

        let dir = &mut config.directory;
        if let Some(v) = parsed(&lookup, "ORGCHART_SCOPE_TTL_SECS")? {
            dir.scope_ttl_secs = v;
        }
        if let Some(v) = parsed(&lookup, "ORGCHART_STORE_TIMEOUT_SECS")? {
            dir.store_timeout_secs = v;
        }
        if let Some(v) = parsed(&lookup, "ORGCHART_BACKGROUND_TIMEOUT_SECS")? {
            dir.background_timeout_secs = v;
        }
        if let Some(v) = parsed(&lookup, "ORGCHART_SCOPE_PURGE_INTERVAL_SECS")? {
            dir.purge_interval_secs = v;
        }

        config.redis_url = lookup("ORGCHART_REDIS_URL")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        Ok(config)
    }
}

fn parsed<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<T>, ServerError> {
    lookup(name)
        .map(|raw| {
            raw.trim().parse().map_err(|_| ServerError::Config {
                variable: name,
                value: raw,
            })
        })
        .transpose()
}
