//! Key-value storage for secret values.
//!
//! A [`Backend`] persists opaque strings by key. [`EncryptedStorageBackend`]
//! wraps any backend and encrypts values on the way in, so holders of a
//! `Box<dyn Backend>` never see the difference.
//!
//! ## Adding a New Backend
//!
//! 1. Implement the `Backend` trait
//! 2. Override `set_batch` and `supports_atomic_batch` if the medium can
//!    commit several writes at once
//! 3. Re-export from this module
//!
//! ## Example
//!
//! ```ignore
//! let inner = MemoryBackend::new();
//! let backend = EncryptedStorageBackend::new(Box::new(inner), key, StorageOptions::default());
//! backend.set("DATABASE_URL", "postgres://...", true)?;
//! ```

use crate::error::Result;

pub mod cipher;
mod encrypted;
mod file;
mod memory;

pub use encrypted::{EncryptedStorageBackend, StorageOptions};
pub use file::FileBackend;
pub use memory::MemoryBackend;

/// Key-value persistence contract.
///
/// Raw backends store values verbatim and ignore the `encrypt` flag; it is
/// meaningful to wrappers such as [`EncryptedStorageBackend`].
pub trait Backend: Send + Sync {
    /// Store `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: &str, encrypt: bool) -> Result<()>;

    /// Load the value under `key`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::SecretNotFound` if the key is absent.
    fn get(&self, key: &str) -> Result<String>;

    fn exists(&self, key: &str) -> Result<bool>;

    /// Remove `key`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::SecretNotFound` if the key is absent.
    fn delete(&self, key: &str) -> Result<()>;

    /// All keys, sorted.
    fn list(&self) -> Result<Vec<String>>;

    /// Release resources. Further calls are backend-defined.
    fn close(&self) -> Result<()>;

    /// Store several values.
    ///
    /// The default writes one at a time and can stop part way; backends
    /// that return `true` from [`supports_atomic_batch`](Self::supports_atomic_batch)
    /// apply all or nothing.
    fn set_batch(&self, entries: &[(String, String)]) -> Result<()> {
        for (key, value) in entries {
            self.set(key, value, false)?;
        }
        Ok(())
    }

    fn supports_atomic_batch(&self) -> bool {
        false
    }
}

/// Builds backends on demand.
///
/// Passed to whatever constructs an [`EncryptedStorageBackend`] so tests can
/// inject their own storage.
pub trait BackendFactory {
    fn create(&self) -> Result<Box<dyn Backend>>;
}

impl<F> BackendFactory for F
where
    F: Fn() -> Result<Box<dyn Backend>>,
{
    fn create(&self) -> Result<Box<dyn Backend>> {
        self()
    }
}
