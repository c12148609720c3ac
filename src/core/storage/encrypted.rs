//! Transparent encryption over any [`Backend`].

use std::sync::{RwLock, RwLockReadGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use super::cipher::{self, Sealed, DETERMINISTIC_ALGORITHM};
use super::{Backend, BackendFactory};
use crate::core::auth::PasswordAuthenticator;
use crate::core::constants::VALUE_VERSION;
use crate::core::domain::{DerivedKey, EncryptedValue, Salt};
use crate::error::{AuthError, CipherError, Error, FormatError, Result, StoreError};

/// How new values are encrypted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageOptions {
    /// Seal with a synthetic nonce so equal values produce equal ciphertext.
    pub deterministic: bool,
    /// When set, deterministic contexts become `"<environment>:<key>"`.
    pub environment: Option<String>,
}

impl StorageOptions {
    pub fn deterministic() -> Self {
        Self {
            deterministic: true,
            environment: None,
        }
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    /// Context for deterministic nonces.
    pub fn context(&self, key: &str) -> String {
        match &self.environment {
            Some(env) => format!("{}:{}", env, key),
            None => key.to_string(),
        }
    }
}

/// Where the master key came from, when it was a password.
struct PasswordSource {
    salt: Salt,
    auth: PasswordAuthenticator,
}

/// Encrypts values before handing them to an inner backend.
///
/// Reads accept three shapes: structured encrypted values, structured
/// plaintext (`is_encrypted: false`) and legacy raw strings written before
/// encryption was enabled.
pub struct EncryptedStorageBackend {
    inner: Box<dyn Backend>,
    master: RwLock<DerivedKey>,
    options: StorageOptions,
    password: Option<PasswordSource>,
}

impl std::fmt::Debug for EncryptedStorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedStorageBackend")
            .field("options", &self.options)
            .field("password_derived", &self.password.is_some())
            .finish()
    }
}

impl EncryptedStorageBackend {
    /// Wrap `inner` with an already derived master key.
    pub fn new(inner: Box<dyn Backend>, master: DerivedKey, options: StorageOptions) -> Self {
        Self {
            inner,
            master: RwLock::new(master),
            options,
            password: None,
        }
    }

    /// Derive the master key from `password` and `salt`.
    ///
    /// The salt and authenticator are kept so [`update_password`](Self::update_password)
    /// can derive the replacement key.
    pub fn with_password(
        inner: Box<dyn Backend>,
        password: &str,
        salt: Salt,
        auth: PasswordAuthenticator,
        options: StorageOptions,
    ) -> Result<Self> {
        let master = auth.derive_key(password, &salt)?;
        Ok(Self {
            inner,
            master: RwLock::new(master),
            options,
            password: Some(PasswordSource { salt, auth }),
        })
    }

    /// Build the inner backend through `factory`.
    pub fn open(
        factory: &dyn BackendFactory,
        master: DerivedKey,
        options: StorageOptions,
    ) -> Result<Self> {
        Ok(Self::new(factory.create()?, master, options))
    }

    pub fn options(&self) -> &StorageOptions {
        &self.options
    }

    pub fn inner(&self) -> &dyn Backend {
        self.inner.as_ref()
    }

    /// Re-encrypt every encrypted value under a key derived from `new`.
    ///
    /// # Errors
    ///
    /// Returns `CipherError::NotPasswordDerived` if the backend was built
    /// with [`new`](Self::new), `AuthError::InvalidPassword` if `old` does not
    /// produce the current key, and otherwise the errors of
    /// [`rekey`](Self::rekey).
    pub fn update_password(&self, old: &str, new: &str) -> Result<()> {
        let source = self
            .password
            .as_ref()
            .ok_or(CipherError::NotPasswordDerived)?;
        let old_key = source.auth.derive_key(old, &source.salt)?;
        source.auth.validate_password(new)?;
        let new_key = source.auth.derive_key(new, &source.salt)?;
        self.rekey(&old_key, new_key)
    }

    /// Re-encrypt every encrypted value from `old` to `new`.
    ///
    /// All values are decrypted and re-sealed in memory first; a failure in
    /// that phase writes nothing. The staged values are then committed in one
    /// batch when the inner backend supports it. Otherwise they are written
    /// one by one, and a write failure returns [`Error::PartialUpdate`]
    /// listing what was and was not rewritten. The master key only switches
    /// to `new` after every write succeeded.
    ///
    /// Structured plaintext and legacy raw values are left untouched.
    pub fn rekey(&self, old: &DerivedKey, new: DerivedKey) -> Result<()> {
        let mut master = self
            .master
            .write()
            .map_err(|_| StoreError::LockPoisoned)?;
        if !master.ct_eq(old) {
            return Err(AuthError::InvalidPassword.into());
        }

        let staged = self.stage(old, &new)?;
        debug!(count = staged.len(), "staged re-encrypted values");

        if self.inner.supports_atomic_batch() {
            self.inner.set_batch(&staged)?;
        } else {
            for (i, (key, value)) in staged.iter().enumerate() {
                if let Err(source) = self.inner.set(key, value, false) {
                    let rewritten: Vec<String> =
                        staged[..i].iter().map(|(k, _)| k.clone()).collect();
                    let pending: Vec<String> =
                        staged[i..].iter().map(|(k, _)| k.clone()).collect();
                    warn!(
                        rewritten = rewritten.len(),
                        pending = pending.len(),
                        "re-encryption stopped part way; master key left unchanged"
                    );
                    return Err(Error::PartialUpdate {
                        rewritten,
                        pending,
                        source: Box::new(source),
                    });
                }
            }
        }

        *master = new;
        info!(count = staged.len(), "re-encrypted values under new key");
        Ok(())
    }

    /// Decrypt under `old` and re-seal under `new`, keeping each value's mode
    /// and creation time.
    fn stage(&self, old: &DerivedKey, new: &DerivedKey) -> Result<Vec<(String, String)>> {
        let mut staged = Vec::new();
        for key in self.inner.list()? {
            let raw = self.inner.get(&key)?;
            let value = match EncryptedValue::decode(&raw) {
                Some(value) if value.is_encrypted => value,
                _ => continue,
            };

            let plaintext = self.open_value(old, &key, &value)?;
            let sealed = if value.algorithm == DETERMINISTIC_ALGORITHM {
                cipher::seal_deterministic(
                    new,
                    &self.options.context(&key),
                    plaintext.as_bytes(),
                    key.as_bytes(),
                )?
            } else {
                cipher::seal_random(new, plaintext.as_bytes(), key.as_bytes())?
            };
            let encoded = to_value(sealed, value.created_at).encode()?;
            staged.push((key, encoded));
        }
        Ok(staged)
    }

    fn master(&self) -> Result<RwLockReadGuard<'_, DerivedKey>> {
        self.master
            .read()
            .map_err(|_| StoreError::LockPoisoned.into())
    }

    /// Seal `value` under `master`. Callers hold the master read guard until
    /// the sealed value is written, so `rekey` never misses an in-flight write.
    fn seal(&self, master: &DerivedKey, key: &str, value: &str) -> Result<EncryptedValue> {
        if !self.options.deterministic {
            let sealed = cipher::seal_random(master, value.as_bytes(), key.as_bytes())?;
            return Ok(to_value(sealed, chrono::Utc::now().timestamp()));
        }

        let sealed = cipher::seal_deterministic(
            master,
            &self.options.context(key),
            value.as_bytes(),
            key.as_bytes(),
        )?;
        let created_at = self.existing_created_at(key, &sealed)?;
        Ok(to_value(sealed, created_at))
    }

    /// Rewriting an identical deterministic value keeps its timestamp, so the
    /// stored document does not change at all.
    fn existing_created_at(&self, key: &str, sealed: &Sealed) -> Result<i64> {
        let now = chrono::Utc::now().timestamp();
        if !self.inner.exists(key)? {
            return Ok(now);
        }
        let existing = EncryptedValue::decode(&self.inner.get(key)?);
        Ok(match existing {
            Some(v) if v.is_encrypted && v.ciphertext == sealed.ciphertext => v.created_at,
            _ => now,
        })
    }

    fn open_value(
        &self,
        master: &DerivedKey,
        key: &str,
        value: &EncryptedValue,
    ) -> Result<Zeroizing<String>> {
        if value.version != VALUE_VERSION {
            return Err(FormatError::ValueVersion(value.version).into());
        }
        let bytes = cipher::open(
            master,
            &value.algorithm,
            &value.salt,
            &value.ciphertext,
            key.as_bytes(),
            key,
        )?;
        let text = std::str::from_utf8(&bytes)
            .map_err(|_| CipherError::InvalidUtf8(key.to_string()))?;
        Ok(Zeroizing::new(text.to_string()))
    }
}

fn to_value(sealed: Sealed, created_at: i64) -> EncryptedValue {
    EncryptedValue::encrypted(
        sealed.algorithm,
        sealed.salt.to_base64(),
        sealed.ciphertext,
        created_at,
    )
}

impl Backend for EncryptedStorageBackend {
    fn set(&self, key: &str, value: &str, encrypt: bool) -> Result<()> {
        let master = self.master()?;
        let stored = if encrypt {
            self.seal(&master, key, value)?
        } else {
            EncryptedValue::plaintext(value)
        };
        debug!(key = %key, encrypted = encrypt, algorithm = %stored.algorithm, "storing value");
        self.inner.set(key, &stored.encode()?, encrypt)
    }

    fn get(&self, key: &str) -> Result<String> {
        // Held across the read so the ciphertext and the key come from the
        // same side of a concurrent rekey.
        let master = self.master()?;
        let raw = self.inner.get(key)?;
        let value = match EncryptedValue::decode(&raw) {
            Some(value) => value,
            None => {
                debug!(key = %key, "legacy plaintext value");
                return Ok(raw);
            }
        };
        if !value.is_encrypted {
            return Ok(value.ciphertext);
        }

        let plaintext = self.open_value(&master, key, &value)?;
        Ok(plaintext.as_str().to_string())
    }

    fn exists(&self, key: &str) -> Result<bool> {
        self.inner.exists(key)
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.inner.delete(key)
    }

    fn list(&self) -> Result<Vec<String>> {
        self.inner.list()
    }

    fn close(&self) -> Result<()> {
        self.inner.close()
    }

    /// Encrypts every entry, then hands the batch to the inner backend.
    fn set_batch(&self, entries: &[(String, String)]) -> Result<()> {
        let master = self.master()?;
        let mut sealed = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            sealed.push((key.clone(), self.seal(&master, key, value)?.encode()?));
        }
        self.inner.set_batch(&sealed)
    }

    fn supports_atomic_batch(&self) -> bool {
        self.inner.supports_atomic_batch()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::domain::KdfParams;
    use crate::core::storage::MemoryBackend;

    fn key(byte: u8) -> DerivedKey {
        DerivedKey::new([byte; 32])
    }

    fn backend(inner: &MemoryBackend, options: StorageOptions) -> EncryptedStorageBackend {
        EncryptedStorageBackend::new(Box::new(inner.clone()), key(1), options)
    }

    #[test]
    fn test_encrypted_roundtrip_hides_plaintext() {
        let inner = MemoryBackend::new();
        let b = backend(&inner, StorageOptions::default());
        b.set("API_KEY", "sk-live-123", true).unwrap();

        assert_eq!(b.get("API_KEY").unwrap(), "sk-live-123");
        let raw = inner.get("API_KEY").unwrap();
        assert!(!raw.contains("sk-live-123"));

        let value = EncryptedValue::decode(&raw).unwrap();
        assert!(value.is_encrypted);
        assert_eq!(value.algorithm, cipher::RANDOM_ALGORITHM);
        assert_eq!(value.version, 1);
    }

    #[test]
    fn test_unencrypted_values_are_wrapped() {
        let inner = MemoryBackend::new();
        let b = backend(&inner, StorageOptions::default());
        b.set("PORT", "8080", false).unwrap();

        let value = EncryptedValue::decode(&inner.get("PORT").unwrap()).unwrap();
        assert!(!value.is_encrypted);
        assert_eq!(b.get("PORT").unwrap(), "8080");
    }

    #[test]
    fn test_legacy_raw_value_returned_verbatim() {
        let inner = MemoryBackend::new();
        inner.set("OLD", "plain-old-value", false).unwrap();
        let b = backend(&inner, StorageOptions::default());
        assert_eq!(b.get("OLD").unwrap(), "plain-old-value");
    }

    #[test]
    fn test_deterministic_mode_is_stable() {
        let inner = MemoryBackend::new();
        let b = backend(&inner, StorageOptions::deterministic());
        b.set("K", "secret", true).unwrap();
        let first = inner.get("K").unwrap();
        b.set("K", "secret", true).unwrap();
        assert_eq!(inner.get("K").unwrap(), first);

        b.set("K", "changed", true).unwrap();
        assert_ne!(inner.get("K").unwrap(), first);
        assert_eq!(b.get("K").unwrap(), "changed");
    }

    #[test]
    fn test_environment_changes_deterministic_context() {
        let dev_inner = MemoryBackend::new();
        let prod_inner = MemoryBackend::new();
        backend(&dev_inner, StorageOptions::deterministic().with_environment("dev"))
            .set("K", "secret", true)
            .unwrap();
        backend(&prod_inner, StorageOptions::deterministic().with_environment("prod"))
            .set("K", "secret", true)
            .unwrap();

        let dev = EncryptedValue::decode(&dev_inner.get("K").unwrap()).unwrap();
        let prod = EncryptedValue::decode(&prod_inner.get("K").unwrap()).unwrap();
        assert_ne!(dev.ciphertext, prod.ciphertext);
    }

    #[test]
    fn test_wrong_master_key_fails() {
        let inner = MemoryBackend::new();
        backend(&inner, StorageOptions::default())
            .set("K", "secret", true)
            .unwrap();
        let other =
            EncryptedStorageBackend::new(Box::new(inner), key(2), StorageOptions::default());
        assert!(other.get("K").unwrap_err().is_integrity());
    }

    #[test]
    fn test_unknown_version_rejected() {
        let inner = MemoryBackend::new();
        let b = backend(&inner, StorageOptions::default());
        b.set("K", "secret", true).unwrap();

        let mut value = EncryptedValue::decode(&inner.get("K").unwrap()).unwrap();
        value.version = 9;
        inner.set("K", &value.encode().unwrap(), false).unwrap();
        assert!(matches!(
            b.get("K"),
            Err(Error::Format(FormatError::ValueVersion(9)))
        ));
    }

    #[test]
    fn test_rekey_rewrites_encrypted_values_only() {
        let inner = MemoryBackend::new();
        let b = backend(&inner, StorageOptions::default());
        b.set("SECRET", "s3cr3t", true).unwrap();
        b.set("PLAIN", "visible", false).unwrap();
        inner.set("LEGACY", "raw", false).unwrap();
        let plain_before = inner.get("PLAIN").unwrap();

        b.rekey(&key(1), key(2)).unwrap();

        assert_eq!(b.get("SECRET").unwrap(), "s3cr3t");
        assert_eq!(inner.get("PLAIN").unwrap(), plain_before);
        assert_eq!(inner.get("LEGACY").unwrap(), "raw");

        let fresh = EncryptedStorageBackend::new(
            Box::new(inner.clone()),
            key(2),
            StorageOptions::default(),
        );
        assert_eq!(fresh.get("SECRET").unwrap(), "s3cr3t");
        let stale =
            EncryptedStorageBackend::new(Box::new(inner), key(1), StorageOptions::default());
        assert!(stale.get("SECRET").unwrap_err().is_integrity());
    }

    #[test]
    fn test_rekey_with_wrong_old_key_changes_nothing() {
        let inner = MemoryBackend::new();
        let b = backend(&inner, StorageOptions::default());
        b.set("K", "secret", true).unwrap();
        let before = inner.get("K").unwrap();

        assert!(b.rekey(&key(7), key(2)).unwrap_err().is_invalid_password());
        assert_eq!(inner.get("K").unwrap(), before);
        assert_eq!(b.get("K").unwrap(), "secret");
    }

    #[test]
    fn test_update_password_requires_password_source() {
        let inner = MemoryBackend::new();
        let b = backend(&inner, StorageOptions::default());
        assert!(matches!(
            b.update_password("Tr0ub4dor&3", "N3w-Passw0rd!"),
            Err(Error::Cipher(CipherError::NotPasswordDerived))
        ));
    }

    #[test]
    fn test_update_password_enforces_policy() {
        let inner = MemoryBackend::new();
        let auth = PasswordAuthenticator::new(KdfParams::new(1, 1024, 1));
        let b = EncryptedStorageBackend::with_password(
            Box::new(inner),
            "Tr0ub4dor&3",
            Salt::new([4; 32]),
            auth,
            StorageOptions::default(),
        )
        .unwrap();
        b.set("K", "secret", true).unwrap();

        assert!(b
            .update_password("Tr0ub4dor&3", "weak")
            .unwrap_err()
            .policy_violation()
            .is_some());
        assert_eq!(b.get("K").unwrap(), "secret");
    }
}
