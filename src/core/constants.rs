//! Constants used throughout vaultenv.
//!
//! Centralizes wire prefixes, domain-separation labels and sizes.

/// Salt length in bytes for every KDF invocation.
pub const SALT_LEN: usize = 32;

/// Derived key length in bytes.
pub const KEY_LEN: usize = 32;

/// Default Argon2id iteration count.
pub const DEFAULT_KDF_ITERATIONS: u32 = 3;

/// Default Argon2id memory cost in KiB (64 MiB).
pub const DEFAULT_KDF_MEMORY_KIB: u32 = 65_536;

/// Default Argon2id lane count.
pub const DEFAULT_KDF_PARALLELISM: u32 = 4;

/// Algorithm identifier stored alongside KDF parameters.
pub const KDF_ALGORITHM: &str = "argon2id";

/// Domain-separation prefix for verification hashes.
pub const VERIFICATION_DOMAIN: &[u8] = b"vaultenv/verification/v1:";

/// HKDF info label for per-value encryption keys.
pub const VALUE_KEY_INFO: &[u8] = b"vaultenv/value-key/v1";

/// HKDF info label prefix for deterministic nonces.
pub const DETERMINISTIC_NONCE_INFO: &[u8] = b"vaultenv/deterministic-nonce/v1:";

/// Label hashed into the fixed salt used by deterministic encryption.
pub const DETERMINISTIC_SALT_LABEL: &[u8] = b"vaultenv/deterministic-salt/v1";

/// Key export prefix (`vaultenv:v1:<salt>:<hash>`).
pub const EXPORT_PREFIX: &str = "vaultenv";

/// Current key export format version.
pub const EXPORT_VERSION: &str = "v1";

/// Current encrypted value wire version.
pub const VALUE_VERSION: u32 = 1;

/// Absolute minimum password length accepted at any prompt.
pub const PASSWORD_FLOOR: usize = 8;

/// Session cache entry lifetime in seconds (15 minutes).
pub const SESSION_TTL_SECS: u64 = 15 * 60;

/// Environment variable carrying an out-of-band password.
pub const PASSWORD_ENV: &str = "VAULTENV_PASSWORD";

/// Environment variable overriding the key store location.
pub const KEYSTORE_ENV: &str = "VAULTENV_KEYSTORE";

/// Environment variable enabling deterministic encryption.
pub const DETERMINISTIC_ENV: &str = "VAULTENV_DETERMINISTIC";

/// Environment variable holding the log filter.
pub const LOG_ENV: &str = "VAULTENV_LOG";

/// Key store location relative to HOME (~/.vaultenv/keys.db).
pub const KEYSTORE_FILE: &str = ".vaultenv/keys.db";
