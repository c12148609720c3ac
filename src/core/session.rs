//! In-memory session cache for derived keys.
//!
//! Entries live for a fixed 15 minutes. Expiry is enforced lazily: an
//! expired entry is evicted by the read that finds it and is never
//! returned. There is no background sweeper.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::core::constants::SESSION_TTL_SECS;
use crate::core::domain::DerivedKey;
use crate::core::types::scope_key;
use crate::error::{Result, StoreError};

/// Fixed session lifetime.
pub const SESSION_TTL: Duration = Duration::from_secs(SESSION_TTL_SECS);

struct CacheEntry {
    key: DerivedKey,
    expires_at: Instant,
}

/// Time-bounded cache of derived keys, keyed by `project` or `project:env`.
///
/// One reader/writer lock guards the whole map: shared for reads,
/// exclusive for writes and evictions.
#[derive(Default)]
pub struct SessionCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl std::fmt::Debug for SessionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let len = self.entries.read().map(|e| e.len()).unwrap_or(0);
        f.debug_struct("SessionCache").field("entries", &len).finish()
    }
}

impl SessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached key for a project or environment, if present and unexpired.
    pub fn get(&self, project: &str, environment: Option<&str>) -> Result<Option<DerivedKey>> {
        let id = scope_key(project, environment);
        let now = Instant::now();

        {
            let entries = self.read()?;
            match entries.get(&id) {
                None => {
                    trace!(scope = %id, "session cache miss");
                    return Ok(None);
                }
                Some(entry) if now < entry.expires_at => {
                    trace!(scope = %id, "session cache hit");
                    return Ok(Some(entry.key.clone()));
                }
                Some(_) => {}
            }
        }

        // Re-check under the write lock; a concurrent put may have refreshed it.
        let mut entries = self.write()?;
        match entries.get(&id) {
            Some(entry) if now < entry.expires_at => Ok(Some(entry.key.clone())),
            Some(_) => {
                entries.remove(&id);
                debug!(scope = %id, "evicted expired session key");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Cache a key for the fixed session lifetime.
    pub fn put(&self, project: &str, environment: Option<&str>, key: DerivedKey) -> Result<()> {
        self.insert(scope_key(project, environment), key, Instant::now() + SESSION_TTL)
    }

    fn insert(&self, id: String, key: DerivedKey, expires_at: Instant) -> Result<()> {
        trace!(scope = %id, "caching session key");
        self.write()?.insert(id, CacheEntry { key, expires_at });
        Ok(())
    }

    /// Drop every cached key.
    pub fn clear(&self) -> Result<()> {
        self.write()?.clear();
        debug!("session cache cleared");
        Ok(())
    }

    /// Drop the project key and every environment key of `project`.
    pub fn clear_project(&self, project: &str) -> Result<()> {
        let prefix = format!("{}:", project);
        self.write()?
            .retain(|id, _| id.as_str() != project && !id.starts_with(&prefix));
        debug!(project = %project, "session cache cleared for project");
        Ok(())
    }

    /// Drop only the project-scope key of `project`.
    pub fn clear_project_key(&self, project: &str) -> Result<()> {
        self.write()?.remove(project);
        debug!(project = %project, "session cache cleared for project key");
        Ok(())
    }

    /// Drop the key of a single environment.
    pub fn clear_environment(&self, project: &str, environment: &str) -> Result<()> {
        self.write()?.remove(&scope_key(project, Some(environment)));
        debug!(project = %project, env = %environment, "session cache cleared for environment");
        Ok(())
    }

    /// Number of stored entries, including expired ones not yet evicted.
    pub fn len(&self) -> Result<usize> {
        Ok(self.read()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, CacheEntry>>> {
        self.entries
            .read()
            .map_err(|_| StoreError::LockPoisoned.into())
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, CacheEntry>>> {
        self.entries
            .write()
            .map_err(|_| StoreError::LockPoisoned.into())
    }
}
