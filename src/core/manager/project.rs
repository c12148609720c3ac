//! Project-scope keys (single-password mode), key export/import and
//! migration between the single-password and per-environment models.

use std::sync::Arc;

use tracing::{debug, info};

use crate::core::auth::{PasswordAuthenticator, PasswordPrompt};
use crate::core::domain::{DerivedKey, EnvironmentKeyEntry, KeyEntry, KeyExport};
use crate::core::keystore::KeyStore;
use crate::core::session::SessionCache;
use crate::core::types::scope_key;
use crate::error::{CipherError, Error, Result, StoreError};

/// Manages one password per project.
///
/// Project entries carry no KDF parameters of their own; they are always
/// derived with the authenticator's parameters.
pub struct ProjectKeyManager {
    store: Arc<dyn KeyStore>,
    auth: PasswordAuthenticator,
    cache: Option<Arc<SessionCache>>,
}

impl std::fmt::Debug for ProjectKeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectKeyManager")
            .field("auth", &self.auth)
            .field("cached", &self.cache.is_some())
            .finish()
    }
}

impl ProjectKeyManager {
    pub fn new(store: Arc<dyn KeyStore>, auth: PasswordAuthenticator) -> Self {
        Self {
            store,
            auth,
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: Arc<SessionCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Register the first password of a project.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AlreadyExists` if the project already has a key,
    /// or `AuthError::Policy` if the password breaks policy.
    pub fn set_password(&self, project: &str, password: &str) -> Result<DerivedKey> {
        self.ensure_absent(project)?;
        let (salt, key, hash) = self.auth.create_key(password)?;
        self.store.create_key(&KeyEntry::new(project, salt, hash))?;
        self.cache_put(project, &key)?;
        info!(project = %project, "project key created");
        Ok(key)
    }

    /// Derive and verify the project key.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::ProjectNotFound` or `AuthError::InvalidPassword`.
    pub fn verify_password(&self, project: &str, password: &str) -> Result<DerivedKey> {
        let entry = self.store.get_key(project)?;
        let key = self.verify_entry(&entry, password)?;
        self.cache_put(project, &key)?;
        Ok(key)
    }

    /// Project key, asking `prompt` only on a cache miss.
    pub fn unlock(&self, project: &str, prompt: &dyn PasswordPrompt) -> Result<DerivedKey> {
        if let Some(cache) = &self.cache {
            if let Some(key) = cache.get(project, None)? {
                debug!(project = %project, "using cached project key");
                return Ok(key);
            }
        }
        let entry = self.store.get_key(project)?;
        let password = prompt.password(project)?;
        let key = self.verify_entry(&entry, &password)?;
        self.cache_put(project, &key)?;
        Ok(key)
    }

    /// Replace the project password with a new salt and hash.
    pub fn change_password(&self, project: &str, old: &str, new: &str) -> Result<DerivedKey> {
        let entry = self.store.get_key(project)?;
        self.verify_entry(&entry, old)?;

        let (salt, key, hash) = self.auth.create_key(new)?;
        self.store.store_key(&KeyEntry {
            salt,
            verification_hash: hash,
            ..entry
        })?;

        self.cache_put(project, &key)?;
        info!(project = %project, "project password changed");
        Ok(key)
    }

    /// Remove the project key. Ciphertext under it becomes unreadable.
    ///
    /// Environment keys of the project are separate entries and stay
    /// registered and cached.
    pub fn delete(&self, project: &str) -> Result<()> {
        self.store.delete_key(project)?;
        if let Some(cache) = &self.cache {
            cache.clear_project_key(project)?;
        }
        Ok(())
    }

    /// Registered project keys.
    pub fn list(&self) -> Result<Vec<KeyEntry>> {
        self.store.list_keys()
    }

    /// `vaultenv:v1:<base64-salt>:<hex-hash>` for the project key.
    pub fn export_key(&self, project: &str) -> Result<String> {
        let entry = self.store.get_key(project)?;
        debug!(project = %project, "exporting project key");
        Ok(KeyExport::new(entry.salt, entry.verification_hash).to_string())
    }

    /// Register exported key material under `target_project`.
    ///
    /// The export string is parsed before the store is touched, and the
    /// password must reproduce the embedded verification hash.
    ///
    /// # Errors
    ///
    /// Returns `FormatError` for a malformed export, `AuthError::InvalidPassword`
    /// if the password does not match, or `StoreError::AlreadyExists`.
    pub fn import_key(
        &self,
        target_project: &str,
        export: &str,
        password: &str,
    ) -> Result<DerivedKey> {
        let parsed: KeyExport = export.parse()?;
        let key = self.verify_export(&parsed, password)?;
        self.ensure_absent(target_project)?;

        self.store.create_key(&KeyEntry::new(
            target_project,
            parsed.salt,
            parsed.verification_hash,
        ))?;
        self.cache_put(target_project, &key)?;
        info!(project = %target_project, "project key imported");
        Ok(key)
    }

    /// Register exported key material as an environment of `target_project`.
    pub fn import_environment_key(
        &self,
        target_project: &str,
        environment: &str,
        export: &str,
        password: &str,
    ) -> Result<DerivedKey> {
        let parsed: KeyExport = export.parse()?;
        let key = self.verify_export(&parsed, password)?;
        self.ensure_environment_absent(target_project, environment)?;

        self.store.create_environment_key(&EnvironmentKeyEntry::new(
            target_project,
            environment,
            parsed.salt,
            parsed.verification_hash,
            self.auth.params().clone(),
        ))?;
        if let Some(cache) = &self.cache {
            cache.put(target_project, Some(environment), key.clone())?;
        }
        info!(project = %target_project, env = %environment, "environment key imported");
        Ok(key)
    }

    /// Move from one project password to per-environment entries.
    ///
    /// Each new environment starts with the project's salt and hash, so
    /// values encrypted under the project key stay readable from every
    /// environment. Existing environments are left untouched and the project
    /// entry is kept. Returns the environments that were created.
    pub fn split_into_environments(
        &self,
        project: &str,
        password: &str,
        environments: &[&str],
    ) -> Result<Vec<String>> {
        let entry = self.store.get_key(project)?;
        let key = self.verify_entry(&entry, password)?;

        let mut created = Vec::new();
        for env in environments {
            let inserted = self.store.create_environment_key(&EnvironmentKeyEntry::new(
                project,
                *env,
                entry.salt,
                entry.verification_hash.clone(),
                self.auth.params().clone(),
            ));
            match inserted {
                Ok(()) => {}
                Err(Error::Store(StoreError::AlreadyExists(_))) => {
                    debug!(project = %project, env = %env, "environment already registered");
                    continue;
                }
                Err(e) => return Err(e),
            }
            if let Some(cache) = &self.cache {
                cache.put(project, Some(env), key.clone())?;
            }
            created.push(env.to_string());
        }

        info!(project = %project, created = created.len(), "split project key into environments");
        Ok(created)
    }

    /// Make an environment's key material the single project key.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AlreadyExists` if the project already has a key,
    /// or `CipherError::KeyDerivation` if the environment uses KDF parameters
    /// other than the authenticator's (the project key would derive
    /// differently and existing ciphertext would be lost).
    pub fn promote_environment(
        &self,
        project: &str,
        environment: &str,
        password: &str,
    ) -> Result<DerivedKey> {
        let entry = self.store.get_environment_key(project, environment)?;
        let key = self.auth.verify_password(
            password,
            &entry.salt,
            &entry.kdf,
            &entry.verification_hash,
        )?;

        if &entry.kdf != self.auth.params() {
            return Err(CipherError::KeyDerivation(format!(
                "environment '{}' uses non-default KDF parameters; change its password first",
                environment
            ))
            .into());
        }
        self.ensure_absent(project)?;

        self.store
            .create_key(&KeyEntry::new(project, entry.salt, entry.verification_hash))?;
        self.cache_put(project, &key)?;
        info!(project = %project, env = %environment, "promoted environment key to project key");
        Ok(key)
    }

    fn verify_entry(&self, entry: &KeyEntry, password: &str) -> Result<DerivedKey> {
        self.auth.verify_password(
            password,
            &entry.salt,
            self.auth.params(),
            &entry.verification_hash,
        )
    }

    fn verify_export(&self, export: &KeyExport, password: &str) -> Result<DerivedKey> {
        self.auth.verify_password(
            password,
            &export.salt,
            self.auth.params(),
            &export.verification_hash,
        )
    }

    /// Cheap refusal before paying for a KDF run. `create_*` still decides
    /// the outcome when two callers race.
    fn ensure_absent(&self, project: &str) -> Result<()> {
        match self.store.get_key(project) {
            Ok(_) => Err(StoreError::AlreadyExists(project.to_string()).into()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn ensure_environment_absent(&self, project: &str, environment: &str) -> Result<()> {
        match self.store.get_environment_key(project, environment) {
            Ok(_) => Err(StoreError::AlreadyExists(scope_key(project, Some(environment))).into()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn cache_put(&self, project: &str, key: &DerivedKey) -> Result<()> {
        if let Some(cache) = &self.cache {
            cache.put(project, None, key.clone())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::domain::KdfParams;
    use crate::core::keystore::SqliteKeyStore;
    use crate::core::manager::EnvironmentKeyManager;

    const PASSWORD: &str = "Tr0ub4dor&3";

    fn setup() -> (Arc<dyn KeyStore>, ProjectKeyManager) {
        let store: Arc<dyn KeyStore> = Arc::new(SqliteKeyStore::open_in_memory().unwrap());
        let auth = PasswordAuthenticator::new(KdfParams::new(1, 1024, 1));
        let manager = ProjectKeyManager::new(Arc::clone(&store), auth)
            .with_cache(Arc::new(SessionCache::new()));
        (store, manager)
    }

    #[test]
    fn test_set_and_verify_password() {
        let (_store, m) = setup();
        let key = m.set_password("acme", PASSWORD).unwrap();
        let again = m.verify_password("acme", PASSWORD).unwrap();
        assert_eq!(key.as_bytes(), again.as_bytes());

        assert!(m.verify_password("acme", "Wr0ng-Password").unwrap_err().is_invalid_password());
        assert!(m.verify_password("ghost", PASSWORD).unwrap_err().is_not_found());
        assert!(matches!(
            m.set_password("acme", PASSWORD),
            Err(crate::error::Error::Store(StoreError::AlreadyExists(_)))
        ));
    }

    #[test]
    fn test_change_password() {
        let (_store, m) = setup();
        m.set_password("acme", PASSWORD).unwrap();
        m.change_password("acme", PASSWORD, "N3w-Passw0rd!").unwrap();
        assert!(m.verify_password("acme", PASSWORD).is_err());
        assert!(m.verify_password("acme", "N3w-Passw0rd!").is_ok());
    }

    #[test]
    fn test_export_import_roundtrip() {
        let (_store, m) = setup();
        let original = m.set_password("acme", PASSWORD).unwrap();
        let export = m.export_key("acme").unwrap();
        assert!(export.starts_with("vaultenv:v1:"));

        let imported = m.import_key("acme-fork", &export, PASSWORD).unwrap();
        assert_eq!(imported.as_bytes(), original.as_bytes());
        assert!(m.verify_password("acme-fork", PASSWORD).is_ok());
    }

    #[test]
    fn test_import_rejects_before_touching_store() {
        let (store, m) = setup();
        m.set_password("acme", PASSWORD).unwrap();
        let export = m.export_key("acme").unwrap();

        assert!(m
            .import_key("fork", &export, "Wr0ng-Password")
            .unwrap_err()
            .is_invalid_password());
        assert!(m
            .import_key("fork", "invalid:format", PASSWORD)
            .unwrap_err()
            .is_format());
        assert!(store.get_key("fork").unwrap_err().is_not_found());
    }

    #[test]
    fn test_import_environment_key() {
        let (store, m) = setup();
        let original = m.set_password("acme", PASSWORD).unwrap();
        let export = m.export_key("acme").unwrap();

        m.import_environment_key("other", "prod", &export, PASSWORD)
            .unwrap();
        let envs = EnvironmentKeyManager::new(
            "other",
            store,
            PasswordAuthenticator::new(KdfParams::new(1, 1024, 1)),
        );
        let key = envs.verify_environment_password("prod", PASSWORD).unwrap();
        assert_eq!(key.as_bytes(), original.as_bytes());
    }

    #[test]
    fn test_split_into_environments_preserves_key() {
        let (store, m) = setup();
        let project_key = m.set_password("acme", PASSWORD).unwrap();

        let created = m
            .split_into_environments("acme", PASSWORD, &["dev", "prod"])
            .unwrap();
        assert_eq!(created, vec!["dev", "prod"]);

        let envs = EnvironmentKeyManager::new(
            "acme",
            Arc::clone(&store),
            PasswordAuthenticator::new(KdfParams::new(1, 1024, 1)),
        );
        for env in ["dev", "prod"] {
            let key = envs.verify_environment_password(env, PASSWORD).unwrap();
            assert_eq!(key.as_bytes(), project_key.as_bytes());
        }

        // Second run creates nothing.
        let again = m
            .split_into_environments("acme", PASSWORD, &["dev", "prod", "qa"])
            .unwrap();
        assert_eq!(again, vec!["qa"]);
        assert!(store.get_key("acme").is_ok());
    }

    #[test]
    fn test_promote_environment() {
        let (store, m) = setup();
        let envs = EnvironmentKeyManager::new(
            "acme",
            Arc::clone(&store),
            PasswordAuthenticator::new(KdfParams::new(1, 1024, 1)),
        );
        let env_key = envs.get_or_create_environment_key("prod", PASSWORD).unwrap();

        let project_key = m.promote_environment("acme", "prod", PASSWORD).unwrap();
        assert_eq!(env_key.as_bytes(), project_key.as_bytes());
        assert!(m.verify_password("acme", PASSWORD).is_ok());
    }

    #[test]
    fn test_promote_rejects_foreign_kdf_params() {
        let (store, m) = setup();
        let envs = EnvironmentKeyManager::new(
            "acme",
            Arc::clone(&store),
            PasswordAuthenticator::new(KdfParams::new(2, 2048, 1)),
        );
        envs.get_or_create_environment_key("prod", PASSWORD).unwrap();

        assert!(m.promote_environment("acme", "prod", PASSWORD).is_err());
        assert!(store.get_key("acme").unwrap_err().is_not_found());
    }

    #[test]
    fn test_delete_keeps_environment_keys() {
        let store: Arc<dyn KeyStore> = Arc::new(SqliteKeyStore::open_in_memory().unwrap());
        let cache = Arc::new(SessionCache::new());
        let auth = PasswordAuthenticator::new(KdfParams::new(1, 1024, 1));
        let m = ProjectKeyManager::new(Arc::clone(&store), auth.clone())
            .with_cache(Arc::clone(&cache));
        let envs = EnvironmentKeyManager::new("acme", Arc::clone(&store), auth)
            .with_cache(Arc::clone(&cache));

        m.set_password("acme", PASSWORD).unwrap();
        let prod = envs.get_or_create_environment_key("prod", PASSWORD).unwrap();

        m.delete("acme").unwrap();
        assert!(cache.get("acme", None).unwrap().is_none());
        let cached = cache.get("acme", Some("prod")).unwrap().unwrap();
        assert!(cached.ct_eq(&prod));
        assert!(store.get_environment_key("acme", "prod").is_ok());
    }

    #[test]
    fn test_delete() {
        let (_store, m) = setup();
        m.set_password("acme", PASSWORD).unwrap();
        assert_eq!(m.list().unwrap().len(), 1);
        m.delete("acme").unwrap();
        assert!(m.list().unwrap().is_empty());
        assert!(m.delete("acme").unwrap_err().is_not_found());
    }
}
