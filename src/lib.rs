//! vaultenv - zero-knowledge encryption and key management for environment
//! secrets.
//!
//! # Architecture
//!
//! ```text
//! src/
//! ├── core/
//! │   ├── auth/          # Argon2id derivation, verification, policy, prompts
//! │   ├── config         # Settings (TOML + environment overrides)
//! │   ├── domain/        # Keys, salts, key entries, wire formats
//! │   ├── keystore/      # KeyStore trait, SQLite store, migrations
//! │   ├── manager/       # Project and environment key lifecycle
//! │   ├── session        # Time-bounded derived key cache
//! │   └── storage/       # Backend trait, memory/file backends, encryption
//! ├── error              # Error taxonomy
//! └── logging            # tracing subscriber setup
//! ```
//!
//! # Guarantees
//!
//! - Passwords and derived keys are never persisted or logged; the key store
//!   holds salts, verification hashes and KDF parameters only
//! - Every encrypted value is authenticated; tampering is reported, never
//!   returned as garbage
//! - Storage is pluggable behind [`core::storage::Backend`]
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use vaultenv::core::auth::PasswordAuthenticator;
//! use vaultenv::core::keystore::SqliteKeyStore;
//! use vaultenv::core::manager::EnvironmentKeyManager;
//! use vaultenv::core::storage::{Backend, EncryptedStorageBackend, MemoryBackend, StorageOptions};
//!
//! let store = Arc::new(SqliteKeyStore::open("keys.db")?);
//! let envs = EnvironmentKeyManager::new("acme", store, PasswordAuthenticator::default());
//! let key = envs.get_or_create_environment_key("prod", "Tr0ub4dor&3")?;
//!
//! let inner = Box::new(MemoryBackend::new());
//! let secrets = EncryptedStorageBackend::new(inner, key, StorageOptions::default());
//! secrets.set("DATABASE_URL", "postgres://...", true)?;
//! ```

pub mod core;
pub mod error;
pub mod logging;
