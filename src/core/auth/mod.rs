//! Password-based key derivation and verification.
//!
//! Keys are derived with Argon2id. Verification never reconstructs the
//! password: a derived key is hashed under a fixed domain-separation prefix
//! and compared in constant time with the stored hash.
//!
//! ## Flow
//!
//! ```text
//! password ──policy──▶ Argon2id(password, salt) ──▶ DerivedKey
//!                                                     │
//!                        SHA-256(domain ‖ key) ◀──────┘
//!                               │
//!                        verification hash (hex, persisted)
//! ```

mod policy;
mod prompt;

pub use policy::PasswordPolicy;
pub use prompt::{enforce_floor, EnvPassword, PasswordPrompt, StaticPassword, TerminalPrompt};

use argon2::{Algorithm, Argon2, Params, Version};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::{debug, trace};
use zeroize::Zeroizing;

use crate::core::constants::{KEY_LEN, VERIFICATION_DOMAIN};
use crate::core::domain::{DerivedKey, KdfParams, Salt};
use crate::error::{AuthError, CipherError, Result};

/// Derives keys from passwords and checks them against stored hashes.
#[derive(Debug, Clone, Default)]
pub struct PasswordAuthenticator {
    params: KdfParams,
    policy: PasswordPolicy,
}

impl PasswordAuthenticator {
    /// Authenticator with the given KDF parameters and the default policy.
    pub fn new(params: KdfParams) -> Self {
        Self {
            params,
            policy: PasswordPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: PasswordPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Parameters used for newly created keys.
    pub fn params(&self) -> &KdfParams {
        &self.params
    }

    pub fn policy(&self) -> &PasswordPolicy {
        &self.policy
    }

    /// Derive a key with the authenticator's default parameters.
    pub fn derive_key(&self, password: &str, salt: &Salt) -> Result<DerivedKey> {
        self.derive_key_with(password, salt, &self.params)
    }

    /// Derive a key with explicit parameters (those stored on an entry).
    ///
    /// Deterministic for a fixed (password, salt, params).
    ///
    /// # Errors
    ///
    /// Returns `CipherError::KeyDerivation` if the parameters are rejected.
    pub fn derive_key_with(
        &self,
        password: &str,
        salt: &Salt,
        params: &KdfParams,
    ) -> Result<DerivedKey> {
        params.validate()?;
        trace!(
            iterations = params.iterations,
            memory_kib = params.memory_kib,
            parallelism = params.parallelism,
            "deriving key"
        );

        let argon_params = Params::new(
            params.memory_kib,
            params.iterations,
            params.parallelism,
            Some(KEY_LEN),
        )
        .map_err(|e| CipherError::KeyDerivation(e.to_string()))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params);

        let mut output = Zeroizing::new([0u8; KEY_LEN]);
        argon2
            .hash_password_into(password.as_bytes(), salt.as_bytes(), &mut output[..])
            .map_err(|e| CipherError::KeyDerivation(e.to_string()))?;

        Ok(DerivedKey::new(*output))
    }

    /// Fresh 32-byte salt from the OS CSPRNG.
    pub fn generate_salt(&self) -> Result<Salt> {
        Salt::generate()
    }

    /// Hex SHA-256 over the domain prefix and the key.
    pub fn generate_verification_hash(&self, key: &DerivedKey) -> String {
        verification_hash(key)
    }

    /// Constant-time check of a key against a stored verification hash.
    pub fn verify_key(&self, key: &DerivedKey, expected_hash: &str) -> bool {
        let actual = verification_hash(key);
        let expected = expected_hash.trim().to_ascii_lowercase();
        bool::from(actual.as_bytes().ct_eq(expected.as_bytes()))
    }

    /// Run the password policy.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Policy` carrying the first violated rule.
    pub fn validate_password(&self, password: &str) -> Result<()> {
        self.policy.check(password).map_err(|v| AuthError::Policy(v).into())
    }

    /// Derive a key with `params` and verify it against `expected_hash`.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidPassword` on mismatch.
    pub fn verify_password(
        &self,
        password: &str,
        salt: &Salt,
        params: &KdfParams,
        expected_hash: &str,
    ) -> Result<DerivedKey> {
        let key = self.derive_key_with(password, salt, params)?;
        if !self.verify_key(&key, expected_hash) {
            debug!("password verification failed");
            return Err(AuthError::InvalidPassword.into());
        }
        Ok(key)
    }

    /// Validate a new password, then create salt, key and verification hash.
    pub fn create_key(&self, password: &str) -> Result<(Salt, DerivedKey, String)> {
        self.validate_password(password)?;
        let salt = self.generate_salt()?;
        let key = self.derive_key(password, &salt)?;
        let hash = self.generate_verification_hash(&key);
        Ok((salt, key, hash))
    }
}

fn verification_hash(key: &DerivedKey) -> String {
    let mut hasher = Sha256::new();
    hasher.update(VERIFICATION_DOMAIN);
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}
