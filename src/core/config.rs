//! Engine settings.
//!
//! Settings are parsed from TOML text supplied by the caller; locating and
//! reading the file is left to the host application. Every section is
//! optional and falls back to defaults:
//!
//! ```toml
//! [kdf]
//! algorithm = "argon2id"
//! iterations = 3
//! memory_kib = 65536
//! parallelism = 4
//!
//! [policy]
//! min_length = 12
//!
//! [storage]
//! deterministic = true
//! environment = "prod"
//!
//! [keystore]
//! path = "/var/lib/vaultenv/keys.db"
//! ```
//!
//! `VAULTENV_KEYSTORE` and `VAULTENV_DETERMINISTIC` override the matching
//! fields.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::auth::{PasswordAuthenticator, PasswordPolicy};
use crate::core::constants::{DETERMINISTIC_ENV, KEYSTORE_ENV, KEYSTORE_FILE};
use crate::core::domain::KdfParams;
use crate::core::keystore::SqliteKeyStore;
use crate::core::storage::StorageOptions;
use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub kdf: KdfParams,
    pub policy: PasswordPolicy,
    pub storage: StorageOptions,
    pub keystore: KeystoreSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeystoreSettings {
    /// Database file. Defaults to `~/.vaultenv/keys.db`.
    pub path: Option<PathBuf>,
}

impl Settings {
    /// Parse and validate TOML settings.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Parse` for malformed TOML and
    /// `ConfigError::InvalidValue` for out-of-range values.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(text).map_err(ConfigError::Parse)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Defaults with environment overrides applied.
    pub fn from_env() -> Result<Self> {
        Self::default().with_env_overrides()
    }

    /// Apply `VAULTENV_KEYSTORE` and `VAULTENV_DETERMINISTIC`.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(KEYSTORE_ENV).filter(|p| !p.is_empty()) {
            debug!(path = %path, "keystore path overridden from environment");
            self.keystore.path = Some(PathBuf::from(path));
        }
        if let Some(flag) = lookup(DETERMINISTIC_ENV) {
            self.storage.deterministic = parse_flag(&flag)?;
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        self.kdf.validate()?;
        if self.policy.min_length == 0 {
            return Err(ConfigError::InvalidValue {
                field: "policy.min_length",
                reason: "must be at least 1".to_string(),
            }
            .into());
        }
        if matches!(&self.storage.environment, Some(env) if env.trim().is_empty()) {
            return Err(ConfigError::InvalidValue {
                field: "storage.environment",
                reason: "must not be empty".to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Resolved key store location.
    pub fn keystore_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.keystore.path {
            return Ok(path.clone());
        }
        let home = dirs::home_dir().ok_or_else(|| ConfigError::InvalidValue {
            field: "keystore.path",
            reason: "unable to determine home directory".to_string(),
        })?;
        Ok(home.join(KEYSTORE_FILE))
    }

    /// Authenticator with the configured KDF parameters and policy.
    pub fn authenticator(&self) -> PasswordAuthenticator {
        PasswordAuthenticator::new(self.kdf.clone()).with_policy(self.policy.clone())
    }

    pub fn open_keystore(&self) -> Result<SqliteKeyStore> {
        SqliteKeyStore::open(self.keystore_path()?)
    }
}

fn parse_flag(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            field: "storage.deterministic",
            reason: format!("expected a boolean, got '{}'", other),
        }
        .into()),
    }
}
