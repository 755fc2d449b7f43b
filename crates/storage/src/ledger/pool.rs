#![forbid(unsafe_code)]

use crate::store::{SqliteStore, StoreError};
use std::ops::{Deref, DerefMut};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

/// Idle SQLite connections to one database file. A checkout reuses an idle
/// connection or opens a new one; at most `max_idle` are kept on return.
#[derive(Debug)]
pub(crate) struct StorePool {
    storage_dir: PathBuf,
    busy_timeout: Duration,
    max_idle: usize,
    idle: Mutex<Vec<SqliteStore>>,
}

impl StorePool {
    pub(crate) fn new(
        storage_dir: PathBuf,
        busy_timeout: Duration,
        max_idle: usize,
        first: SqliteStore,
    ) -> Self {
        Self {
            storage_dir,
            busy_timeout,
            max_idle: max_idle.max(1),
            idle: Mutex::new(vec![first]),
        }
    }

    pub(crate) fn checkout(&self) -> Result<PooledStore<'_>, StoreError> {
        let reused = match self.idle.lock() {
            Ok(mut idle) => idle.pop(),
            Err(_) => None,
        };
        let store = match reused {
            Some(store) => store,
            None => {
                debug!(storage_dir = %self.storage_dir.display(), "opening ledger connection");
                SqliteStore::open_with_busy_timeout(&self.storage_dir, self.busy_timeout)?
            }
        };
        Ok(PooledStore {
            pool: self,
            store: Some(store),
        })
    }

    fn checkin(&self, store: SqliteStore) {
        if let Ok(mut idle) = self.idle.lock() {
            if idle.len() < self.max_idle {
                idle.push(store);
            }
        }
    }
}

pub(crate) struct PooledStore<'a> {
    pool: &'a StorePool,
    store: Option<SqliteStore>,
}

impl Deref for PooledStore<'_> {
    type Target = SqliteStore;

    fn deref(&self) -> &SqliteStore {
        match self.store.as_ref() {
            Some(store) => store,
            None => unreachable!("pooled store is only taken on drop"),
        }
    }
}

impl DerefMut for PooledStore<'_> {
    fn deref_mut(&mut self) -> &mut SqliteStore {
        match self.store.as_mut() {
            Some(store) => store,
            None => unreachable!("pooled store is only taken on drop"),
        }
    }
}

impl Drop for PooledStore<'_> {
    fn drop(&mut self) {
        if let Some(store) = self.store.take() {
            self.pool.checkin(store);
        }
    }
}
