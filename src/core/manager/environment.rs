//! Per-environment key lifecycle.

use std::sync::Arc;

use tracing::{debug, info};

use crate::core::auth::{PasswordAuthenticator, PasswordPrompt};
use crate::core::domain::{DerivedKey, EnvironmentKeyEntry};
use crate::core::keystore::KeyStore;
use crate::core::session::SessionCache;
use crate::core::types::{scope_key, ProjectId};
use crate::error::{Error, Result, StoreError};

/// Manages the keys of every environment of one project.
///
/// Each environment has its own salt, verification hash and KDF
/// parameters, so environments can use different passwords.
pub struct EnvironmentKeyManager {
    project_id: ProjectId,
    store: Arc<dyn KeyStore>,
    auth: PasswordAuthenticator,
    cache: Option<Arc<SessionCache>>,
}

impl std::fmt::Debug for EnvironmentKeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvironmentKeyManager")
            .field("project_id", &self.project_id)
            .field("auth", &self.auth)
            .field("cached", &self.cache.is_some())
            .finish()
    }
}

impl EnvironmentKeyManager {
    pub fn new(
        project_id: impl Into<ProjectId>,
        store: Arc<dyn KeyStore>,
        auth: PasswordAuthenticator,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            store,
            auth,
            cache: None,
        }
    }

    /// Mirror derived keys into a session cache.
    pub fn with_cache(mut self, cache: Arc<SessionCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Key for `env`, creating the environment on first use.
    ///
    /// An existing environment is verified against `password`. A missing
    /// one gets a fresh salt, key and hash under the default KDF parameters
    /// after the password passes policy.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidPassword` if the environment exists and the
    /// password does not match, or `AuthError::Policy` when creating with a
    /// password that breaks policy.
    pub fn get_or_create_environment_key(&self, env: &str, password: &str) -> Result<DerivedKey> {
        let key = match self.store.get_environment_key(&self.project_id, env) {
            Ok(entry) => self.verify_entry(&entry, password)?,
            Err(e) if e.is_not_found() => self.create(env, password)?,
            Err(e) => return Err(e),
        };
        self.cache_put(env, &key)?;
        Ok(key)
    }

    /// Derive and verify the key of an existing environment.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::EnvironmentNotFound` or `AuthError::InvalidPassword`.
    pub fn verify_environment_password(&self, env: &str, password: &str) -> Result<DerivedKey> {
        let entry = self.store.get_environment_key(&self.project_id, env)?;
        let key = self.verify_entry(&entry, password)?;
        self.cache_put(env, &key)?;
        Ok(key)
    }

    /// Key for an existing environment, asking `prompt` only on a cache miss.
    pub fn unlock_environment(&self, env: &str, prompt: &dyn PasswordPrompt) -> Result<DerivedKey> {
        if let Some(cache) = &self.cache {
            if let Some(key) = cache.get(&self.project_id, Some(env))? {
                debug!(project = %self.project_id, env = %env, "using cached environment key");
                return Ok(key);
            }
        }

        let entry = self.store.get_environment_key(&self.project_id, env)?;
        let password = prompt.password(&scope_key(&self.project_id, Some(env)))?;
        let key = self.verify_entry(&entry, &password)?;
        self.cache_put(env, &key)?;
        Ok(key)
    }

    /// Replace the password of an environment.
    ///
    /// Verifies `old` first, then writes an entirely new salt and hash under
    /// the current default KDF parameters. Values encrypted under the old
    /// key are not re-encrypted here.
    pub fn change_environment_password(
        &self,
        env: &str,
        old: &str,
        new: &str,
    ) -> Result<DerivedKey> {
        let entry = self.store.get_environment_key(&self.project_id, env)?;
        self.verify_entry(&entry, old)?;

        let (salt, key, hash) = self.auth.create_key(new)?;
        let updated = EnvironmentKeyEntry {
            salt,
            verification_hash: hash,
            kdf: self.auth.params().clone(),
            ..entry
        };
        self.store.store_environment_key(&updated)?;

        if let Some(cache) = &self.cache {
            cache.clear_environment(&self.project_id, env)?;
        }
        self.cache_put(env, &key)?;

        info!(project = %self.project_id, env = %env, "environment password changed");
        Ok(key)
    }

    /// Register `dst` with the same key material as `src`.
    ///
    /// The two environments share a password until one is rotated.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidPassword` if `password` does not open
    /// `src`, or `StoreError::AlreadyExists` if `dst` is already registered.
    pub fn copy_environment_key(&self, src: &str, dst: &str, password: &str) -> Result<()> {
        let entry = self.store.get_environment_key(&self.project_id, src)?;
        let key = self.verify_entry(&entry, password)?;

        self.store.create_environment_key(&entry.duplicate_as(dst))?;
        self.cache_put(dst, &key)?;

        info!(project = %self.project_id, src = %src, dst = %dst, "environment key copied");
        Ok(())
    }

    /// Remove an environment key. Ciphertext under it becomes unreadable.
    pub fn delete_environment_key(&self, env: &str) -> Result<()> {
        self.store.delete_environment_key(&self.project_id, env)?;
        if let Some(cache) = &self.cache {
            cache.clear_environment(&self.project_id, env)?;
        }
        Ok(())
    }

    /// Registered environments, ordered by name.
    pub fn list_environments(&self) -> Result<Vec<EnvironmentKeyEntry>> {
        self.store.list_environment_keys(&self.project_id)
    }

    fn create(&self, env: &str, password: &str) -> Result<DerivedKey> {
        let (salt, key, hash) = self.auth.create_key(password)?;
        let entry =
            EnvironmentKeyEntry::new(&self.project_id, env, salt, hash, self.auth.params().clone());

        match self.store.create_environment_key(&entry) {
            Ok(()) => {
                info!(project = %self.project_id, env = %env, "environment key created");
                Ok(key)
            }
            // Another caller registered the environment first; its entry wins.
            Err(Error::Store(StoreError::AlreadyExists(_))) => {
                debug!(project = %self.project_id, env = %env, "lost environment creation race");
                let winner = self.store.get_environment_key(&self.project_id, env)?;
                self.verify_entry(&winner, password)
            }
            Err(e) => Err(e),
        }
    }

    fn verify_entry(&self, entry: &EnvironmentKeyEntry, password: &str) -> Result<DerivedKey> {
        self.auth
            .verify_password(password, &entry.salt, &entry.kdf, &entry.verification_hash)
    }

    fn cache_put(&self, env: &str, key: &DerivedKey) -> Result<()> {
        if let Some(cache) = &self.cache {
            cache.put(&self.project_id, Some(env), key.clone())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::auth::StaticPassword;
    use crate::core::domain::KdfParams;
    use crate::core::keystore::SqliteKeyStore;
    use crate::error::{AuthError, Error};

    const PASSWORD: &str = "Tr0ub4dor&3";

    fn manager() -> EnvironmentKeyManager {
        let store = Arc::new(SqliteKeyStore::open_in_memory().unwrap());
        let auth = PasswordAuthenticator::new(KdfParams::new(1, 1024, 1));
        EnvironmentKeyManager::new("acme", store, auth).with_cache(Arc::new(SessionCache::new()))
    }

    #[test]
    fn test_create_then_reopen_same_key() {
        let m = manager();
        let k1 = m.get_or_create_environment_key("prod", PASSWORD).unwrap();
        let k2 = m.get_or_create_environment_key("prod", PASSWORD).unwrap();
        assert_eq!(k1.as_bytes(), k2.as_bytes());

        let err = m.get_or_create_environment_key("prod", "Wr0ng-Password").unwrap_err();
        assert!(err.is_invalid_password());
    }

    #[test]
    fn test_create_enforces_policy() {
        let m = manager();
        let err = m.get_or_create_environment_key("prod", "weakpassword").unwrap_err();
        assert!(err.policy_violation().is_some());
        assert!(m.list_environments().unwrap().is_empty());
    }

    #[test]
    fn test_environments_are_isolated() {
        let m = manager();
        let prod = m.get_or_create_environment_key("prod", PASSWORD).unwrap();
        let dev = m.get_or_create_environment_key("dev", PASSWORD).unwrap();
        assert_ne!(prod.as_bytes(), dev.as_bytes());
    }

    #[test]
    fn test_change_password() {
        let m = manager();
        let old_key = m.get_or_create_environment_key("prod", PASSWORD).unwrap();
        let before = m.list_environments().unwrap().remove(0);

        let err = m
            .change_environment_password("prod", "Wr0ng-Password", "N3w-Passw0rd!")
            .unwrap_err();
        assert!(err.is_invalid_password());

        let new_key = m
            .change_environment_password("prod", PASSWORD, "N3w-Passw0rd!")
            .unwrap();
        assert_ne!(old_key.as_bytes(), new_key.as_bytes());

        let after = m.list_environments().unwrap().remove(0);
        assert_ne!(before.salt, after.salt);
        assert_ne!(before.verification_hash, after.verification_hash);
        assert_eq!(before.created_at, after.created_at);

        assert!(m.verify_environment_password("prod", PASSWORD).is_err());
        let reopened = m.verify_environment_password("prod", "N3w-Passw0rd!").unwrap();
        assert_eq!(reopened.as_bytes(), new_key.as_bytes());
    }

    #[test]
    fn test_change_password_rejects_weak_new_password() {
        let m = manager();
        m.get_or_create_environment_key("prod", PASSWORD).unwrap();
        let err = m
            .change_environment_password("prod", PASSWORD, "short")
            .unwrap_err();
        assert!(err.policy_violation().is_some());
        assert!(m.verify_environment_password("prod", PASSWORD).is_ok());
    }

    #[test]
    fn test_copy_environment_key_shares_password() {
        let m = manager();
        let prod = m.get_or_create_environment_key("prod", PASSWORD).unwrap();

        assert!(m
            .copy_environment_key("prod", "staging", "Wr0ng-Password")
            .unwrap_err()
            .is_invalid_password());

        m.copy_environment_key("prod", "staging", PASSWORD).unwrap();
        let staging = m.verify_environment_password("staging", PASSWORD).unwrap();
        assert_eq!(prod.as_bytes(), staging.as_bytes());

        let err = m.copy_environment_key("prod", "staging", PASSWORD).unwrap_err();
        assert!(matches!(err, Error::Store(StoreError::AlreadyExists(_))));

        m.change_environment_password("staging", PASSWORD, "N3w-Passw0rd!")
            .unwrap();
        assert!(m.verify_environment_password("prod", PASSWORD).is_ok());
    }

    #[test]
    fn test_unlock_uses_cache_before_prompting() {
        let m = manager();
        m.get_or_create_environment_key("prod", PASSWORD).unwrap();

        // Cached: a prompt that would fail the floor check is never consulted.
        let key = m
            .unlock_environment("prod", &StaticPassword::new("short"))
            .unwrap();
        assert_eq!(key.as_bytes().len(), 32);

        m.cache.as_ref().unwrap().clear().unwrap();
        let err = m
            .unlock_environment("prod", &StaticPassword::new("short"))
            .unwrap_err();
        assert!(matches!(err, Error::Auth(AuthError::BelowMinimum { .. })));

        let unlocked = m
            .unlock_environment("prod", &StaticPassword::new(PASSWORD))
            .unwrap();
        assert_eq!(unlocked.as_bytes(), key.as_bytes());
    }

    #[test]
    fn test_unlock_missing_environment() {
        let m = manager();
        let err = m
            .unlock_environment("prod", &StaticPassword::new(PASSWORD))
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_delete_and_list() {
        let m = manager();
        m.get_or_create_environment_key("prod", PASSWORD).unwrap();
        m.get_or_create_environment_key("dev", PASSWORD).unwrap();

        let names: Vec<String> = m
            .list_environments()
            .unwrap()
            .into_iter()
            .map(|e| e.environment)
            .collect();
        assert_eq!(names, vec!["dev", "prod"]);

        m.delete_environment_key("dev").unwrap();
        assert_eq!(m.list_environments().unwrap().len(), 1);
        assert!(m.cache.as_ref().unwrap().get("acme", Some("dev")).unwrap().is_none());
        assert!(m.delete_environment_key("dev").unwrap_err().is_not_found());
    }

    #[test]
    fn test_stored_kdf_params_are_used_for_verification() {
        let store: Arc<dyn KeyStore> = Arc::new(SqliteKeyStore::open_in_memory().unwrap());
        let old = EnvironmentKeyManager::new(
            "acme",
            Arc::clone(&store),
            PasswordAuthenticator::new(KdfParams::new(2, 2048, 1)),
        );
        let original = old.get_or_create_environment_key("prod", PASSWORD).unwrap();

        // Defaults changed since the entry was written.
        let upgraded = EnvironmentKeyManager::new(
            "acme",
            store,
            PasswordAuthenticator::new(KdfParams::new(1, 1024, 1)),
        );
        let reopened = upgraded.verify_environment_password("prod", PASSWORD).unwrap();
        assert_eq!(original.as_bytes(), reopened.as_bytes());
    }
}
