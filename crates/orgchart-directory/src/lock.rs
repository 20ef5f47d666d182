//! Keyed async locks for read-validate-write sequences.
//!
//! Keys are acquired in sorted order, so two callers locking overlapping
//! key sets cannot deadlock. Idle entries are removed when the last
//! holder releases them.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct LockTable {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

/// Held locks; released on drop.
#[derive(Debug)]
pub struct LockSet {
    table: LockTable,
    keys: Vec<String>,
    guards: Vec<OwnedMutexGuard<()>>,
}

impl LockSet {
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// True if every key in `keys` is held by this set.
    pub fn covers<'a>(&self, keys: impl IntoIterator<Item = &'a String>) -> bool {
        keys.into_iter().all(|k| self.keys.binary_search(k).is_ok())
    }
}

impl Drop for LockSet {
    fn drop(&mut self) {
        self.guards.clear();
        for key in &self.keys {
            self.table
                .locks
                .remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
        }
    }
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn org_key(id: Uuid) -> String {
        format!("org:{id}")
    }

    /// Key guarding the set of roots (children of the sentinel).
    pub fn root_key() -> String {
        "org:0".to_string()
    }

    pub fn user_key(id: Uuid) -> String {
        format!("user:{id}")
    }

    pub async fn acquire<I, S>(&self, keys: I) -> LockSet
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut keys: Vec<String> = keys.into_iter().map(Into::into).collect();
        keys.sort();
        keys.dedup();

        let mut guards = Vec::with_capacity(keys.len());
        for key in &keys {
            let lock = self.locks.entry(key.clone()).or_default().clone();
            guards.push(lock.lock_owned().await);
        }

        LockSet {
            table: self.clone(),
            keys,
            guards,
        }
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
