//! Key metadata storage.
//!
//! Persists salts, verification hashes and KDF parameters for project and
//! environment keys. Never stores passwords, derived keys or secrets.
//!
//! ## Adding a New Store
//!
//! 1. Implement the `KeyStore` trait
//! 2. Add the implementation in a new file (e.g., `postgres.rs`)
//! 3. Re-export from this module
//!
//! ## Example
//!
//! ```ignore
//! struct Remote { /* ... */ }
//!
//! impl KeyStore for Remote {
//!     fn store_key(&self, entry: &KeyEntry) -> Result<()> {
//!         // Upsert by project id, refresh updated_at
//!     }
//!     // ...
//! }
//! ```

use std::path::Path;

use crate::core::domain::{EnvironmentKeyEntry, KeyEntry};
use crate::error::Result;

mod migrations;
mod sqlite;

pub use migrations::{Migration, MIGRATIONS};
pub use sqlite::SqliteKeyStore;

/// Durable repository of key metadata.
///
/// `store_*` is an upsert on the natural key. The store sets `updated_at`
/// itself and keeps the original `created_at` on update. `create_*` is an
/// atomic insert that fails with `StoreError::AlreadyExists` when the natural
/// key is taken, so concurrent creators agree on a single winner. `get_*` and
/// `delete_*` on a missing entry fail with a NotFound error.
pub trait KeyStore: Send + Sync {
    /// Insert or update the project-scope entry.
    fn store_key(&self, entry: &KeyEntry) -> Result<()>;

    /// Insert the project-scope entry only if none exists.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AlreadyExists` if the project already has an entry.
    fn create_key(&self, entry: &KeyEntry) -> Result<()>;

    /// Load the project-scope entry.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::ProjectNotFound` if no entry exists.
    fn get_key(&self, project_id: &str) -> Result<KeyEntry>;

    /// Remove the project-scope entry. Irreversible.
    fn delete_key(&self, project_id: &str) -> Result<()>;

    /// All project-scope entries, ordered by project id.
    fn list_keys(&self) -> Result<Vec<KeyEntry>>;

    /// Insert or update an environment-scope entry.
    fn store_environment_key(&self, entry: &EnvironmentKeyEntry) -> Result<()>;

    /// Insert an environment-scope entry only if none exists.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AlreadyExists` if the environment already has an entry.
    fn create_environment_key(&self, entry: &EnvironmentKeyEntry) -> Result<()>;

    /// Load an environment-scope entry.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::EnvironmentNotFound` if no entry exists.
    fn get_environment_key(&self, project_id: &str, environment: &str)
        -> Result<EnvironmentKeyEntry>;

    /// Remove an environment-scope entry. Irreversible.
    fn delete_environment_key(&self, project_id: &str, environment: &str) -> Result<()>;

    /// Environment entries of a project, ordered by environment name.
    fn list_environment_keys(&self, project_id: &str) -> Result<Vec<EnvironmentKeyEntry>>;

    /// Write a consistent snapshot of the whole store to `dest`.
    fn backup(&self, dest: &Path) -> Result<()>;

    /// Replace the store contents with a snapshot taken by `backup`.
    fn restore(&self, src: &Path) -> Result<()>;
}
