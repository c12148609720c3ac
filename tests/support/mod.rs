//! Test support utilities for vaultenv integration tests.
//!
//! Provides isolated key stores, fast KDF parameters and test backends.

#![allow(dead_code)]

pub mod backends;
pub mod fixtures;

#[allow(unused_imports)]
pub use backends::*;
#[allow(unused_imports)]
pub use fixtures::*;

use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;
use vaultenv::core::auth::PasswordAuthenticator;
use vaultenv::core::domain::KdfParams;
use vaultenv::core::keystore::{KeyStore, SqliteKeyStore};
use vaultenv::core::manager::{EnvironmentKeyManager, ProjectKeyManager};
use vaultenv::core::session::SessionCache;

/// Argon2id parameters cheap enough for tests.
pub fn fast_params() -> KdfParams {
    KdfParams::new(1, 1024, 1)
}

pub fn fast_auth() -> PasswordAuthenticator {
    PasswordAuthenticator::new(fast_params())
}

/// Test environment with its own on-disk key store.
///
/// Nothing process-global is touched, so tests run in parallel.
pub struct Test {
    /// Temporary directory holding the key store
    pub dir: TempDir,
    pub store: Arc<dyn KeyStore>,
    pub cache: Arc<SessionCache>,
}

impl Test {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("failed to create temp dir");
        let store = SqliteKeyStore::open(dir.path().join("keys.db"))
            .expect("failed to open key store");
        Self {
            dir,
            store: Arc::new(store),
            cache: Arc::new(SessionCache::new()),
        }
    }

    pub fn keystore_path(&self) -> PathBuf {
        self.dir.path().join("keys.db")
    }

    pub fn environments(&self, project: &str) -> EnvironmentKeyManager {
        EnvironmentKeyManager::new(project, Arc::clone(&self.store), fast_auth())
            .with_cache(Arc::clone(&self.cache))
    }

    /// Environment manager without a session cache, so every call derives.
    pub fn environments_uncached(&self, project: &str) -> EnvironmentKeyManager {
        EnvironmentKeyManager::new(project, Arc::clone(&self.store), fast_auth())
    }

    pub fn projects(&self) -> ProjectKeyManager {
        ProjectKeyManager::new(Arc::clone(&self.store), fast_auth())
    }
}
