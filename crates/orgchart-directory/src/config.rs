//! Directory service configuration.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct DirectoryConfig {
    /// Lifetime of a data-scope cache entry in seconds (default: 86_400 = 24 hours).
    pub scope_ttl_secs: u64,
    /// Deadline applied to a request that arrives without one (default: 5).
    pub store_timeout_secs: u64,
    /// Budget for post-commit cache work, which runs even if the request
    /// was cancelled (default: 10).
    pub background_timeout_secs: u64,
    /// How often an in-process scope store drops expired entries (default: 300).
    pub purge_interval_secs: u64,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            scope_ttl_secs: 86_400,
            store_timeout_secs: 5,
            background_timeout_secs: 10,
            purge_interval_secs: 300,
        }
    }
}

impl DirectoryConfig {
    pub fn scope_ttl(&self) -> Duration {
        Duration::from_secs(self.scope_ttl_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }

    pub fn background_timeout(&self) -> Duration {
        Duration::from_secs(self.background_timeout_secs)
    }

    /// Never zero; a zero period would make the purge ticker panic.
    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval_secs.max(1))
    }
}
