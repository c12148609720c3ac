//! Key metadata entries.
//!
//! An entry holds everything needed to re-derive and verify a key from a
//! password, and nothing that reveals the password or the key itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Salt;
use crate::core::constants::{
    DEFAULT_KDF_ITERATIONS, DEFAULT_KDF_MEMORY_KIB, DEFAULT_KDF_PARALLELISM, KDF_ALGORITHM,
};
use crate::core::types::{EnvironmentName, ProjectId, VerificationHash};
use crate::error::{ConfigError, Result};

/// Argon2id cost parameters.
///
/// Stored per environment entry so existing entries stay verifiable after
/// the defaults change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KdfParams {
    pub algorithm: String,
    pub iterations: u32,
    pub memory_kib: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            algorithm: KDF_ALGORITHM.to_string(),
            iterations: DEFAULT_KDF_ITERATIONS,
            memory_kib: DEFAULT_KDF_MEMORY_KIB,
            parallelism: DEFAULT_KDF_PARALLELISM,
        }
    }
}

impl KdfParams {
    /// Argon2id parameters with the given costs.
    pub fn new(iterations: u32, memory_kib: u32, parallelism: u32) -> Self {
        Self {
            algorithm: KDF_ALGORITHM.to_string(),
            iterations,
            memory_kib,
            parallelism,
        }
    }

    /// Check the parameters are accepted by Argon2id.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.algorithm != KDF_ALGORITHM {
            return Err(ConfigError::InvalidValue {
                field: "kdf.algorithm",
                reason: format!("unsupported algorithm '{}'", self.algorithm),
            }
            .into());
        }
        if self.iterations == 0 {
            return Err(ConfigError::InvalidValue {
                field: "kdf.iterations",
                reason: "must be at least 1".to_string(),
            }
            .into());
        }
        if self.parallelism == 0 {
            return Err(ConfigError::InvalidValue {
                field: "kdf.parallelism",
                reason: "must be at least 1".to_string(),
            }
            .into());
        }
        let min_memory = self
            .parallelism
            .checked_mul(8)
            .ok_or_else(|| ConfigError::InvalidValue {
                field: "kdf.parallelism",
                reason: format!("{} lanes is out of range", self.parallelism),
            })?;
        if self.memory_kib < min_memory {
            return Err(ConfigError::InvalidValue {
                field: "kdf.memory_kib",
                reason: format!("must be at least {} (8 x parallelism)", min_memory),
            }
            .into());
        }
        Ok(())
    }
}

/// Project-scope key metadata (single-password mode).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEntry {
    pub project_id: ProjectId,
    pub salt: Salt,
    pub verification_hash: VerificationHash,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl KeyEntry {
    pub fn new(
        project_id: impl Into<ProjectId>,
        salt: Salt,
        verification_hash: VerificationHash,
    ) -> Self {
        let now = Utc::now();
        Self {
            project_id: project_id.into(),
            salt,
            verification_hash,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Environment-scope key metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentKeyEntry {
    pub project_id: ProjectId,
    pub environment: EnvironmentName,
    pub salt: Salt,
    pub verification_hash: VerificationHash,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub kdf: KdfParams,
}

impl EnvironmentKeyEntry {
    pub fn new(
        project_id: impl Into<ProjectId>,
        environment: impl Into<EnvironmentName>,
        salt: Salt,
        verification_hash: VerificationHash,
        kdf: KdfParams,
    ) -> Self {
        let now = Utc::now();
        Self {
            project_id: project_id.into(),
            environment: environment.into(),
            salt,
            verification_hash,
            created_at: now,
            updated_at: now,
            kdf,
        }
    }

    /// Same key material under another environment name.
    pub fn duplicate_as(&self, environment: impl Into<EnvironmentName>) -> Self {
        let now = Utc::now();
        Self {
            environment: environment.into(),
            created_at: now,
            updated_at: now,
            ..self.clone()
        }
    }
}
