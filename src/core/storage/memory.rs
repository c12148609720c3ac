//! In-memory backend.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{Backend, BackendFactory};
use crate::error::{Result, StoreError};

/// Process-local backend over a shared map.
///
/// Clones share state, which makes a `MemoryBackend` usable as its own
/// [`BackendFactory`]: every backend it creates sees the same values.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    values: Arc<RwLock<BTreeMap<String, String>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.read()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.read()?.is_empty())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, BTreeMap<String, String>>> {
        self.values
            .read()
            .map_err(|_| StoreError::LockPoisoned.into())
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, BTreeMap<String, String>>> {
        self.values
            .write()
            .map_err(|_| StoreError::LockPoisoned.into())
    }
}

impl Backend for MemoryBackend {
    fn set(&self, key: &str, value: &str, _encrypt: bool) -> Result<()> {
        self.write()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<String> {
        self.read()?
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::SecretNotFound(key.to_string()).into())
    }

    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.read()?.contains_key(key))
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.write()?
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StoreError::SecretNotFound(key.to_string()).into())
    }

    fn list(&self) -> Result<Vec<String>> {
        Ok(self.read()?.keys().cloned().collect())
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }

    fn set_batch(&self, entries: &[(String, String)]) -> Result<()> {
        let mut values = self.write()?;
        for (key, value) in entries {
            values.insert(key.clone(), value.clone());
        }
        Ok(())
    }

    fn supports_atomic_batch(&self) -> bool {
        true
    }
}

impl BackendFactory for MemoryBackend {
    fn create(&self) -> Result<Box<dyn Backend>> {
        Ok(Box::new(self.clone()))
    }
}
