//! Error types for vaultenv.
//!
//! Errors are grouped by the component that raises them and wrapped by the
//! top-level [`Error`]. Callers that need to branch on the failure class
//! (create-vs-fail on a missing key, re-prompt on a bad password) should use
//! the `is_*` helpers rather than matching the nested variants directly.

use thiserror::Error;

/// Key metadata and secret storage errors.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("no key registered for project '{0}'")]
    ProjectNotFound(String),

    #[error("no key registered for environment '{environment}' of project '{project}'")]
    EnvironmentNotFound { project: String, environment: String },

    #[error("secret not found: {0}")]
    SecretNotFound(String),

    #[error("key already exists: {0}")]
    AlreadyExists(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("schema migration {version} failed: {source}")]
    Migration {
        version: u32,
        #[source]
        source: rusqlite::Error,
    },

    #[error("backup not found: {0}")]
    BackupNotFound(String),

    #[error("storage lock poisoned")]
    LockPoisoned,

    #[error("failed to read store: {0}")]
    ReadFailed(#[source] std::io::Error),

    #[error("failed to write store: {0}")]
    WriteFailed(#[source] std::io::Error),

    #[error("corrupt store document: {0}")]
    Corrupt(String),
}

/// A single password policy rule that was not satisfied.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyViolation {
    #[error("password must be at least {min} characters (got {actual})")]
    TooShort { min: usize, actual: usize },

    #[error("password must contain an uppercase letter")]
    MissingUppercase,

    #[error("password must contain a lowercase letter")]
    MissingLowercase,

    #[error("password must contain a digit")]
    MissingDigit,

    #[error("password must contain a symbol")]
    MissingSymbol,

    #[error("password is too common")]
    CommonPassword,
}

/// Password verification and acquisition errors.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("invalid password")]
    InvalidPassword,

    #[error("password rejected: {0}")]
    Policy(#[from] PolicyViolation),

    #[error("password must be at least {min} characters")]
    BelowMinimum { min: usize },

    #[error("passwords do not match")]
    ConfirmationMismatch,

    #[error("failed to read password: {0}")]
    PromptFailed(String),

    #[error("no password supplied via {0}")]
    PasswordUnavailable(String),
}

/// Key derivation and authenticated encryption errors.
#[derive(Error, Debug)]
pub enum CipherError {
    #[error("integrity check failed for '{0}': ciphertext was tampered with or the key is wrong")]
    Integrity(String),

    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("random number generator failure: {0}")]
    Random(String),

    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("decrypted value for '{0}' is not valid UTF-8")]
    InvalidUtf8(String),

    #[error("master key was not derived from a password; use rekey instead")]
    NotPasswordDerived,
}

/// Malformed input rejected before any state is touched.
#[derive(Error, Debug)]
pub enum FormatError {
    #[error("invalid key export: expected 'vaultenv:v1:<salt>:<hash>'")]
    ExportShape,

    #[error("invalid key export prefix: {0}")]
    ExportPrefix(String),

    #[error("unsupported key export version: {0}")]
    ExportVersion(String),

    #[error("invalid salt: {0}")]
    Salt(String),

    #[error("invalid verification hash: {0}")]
    VerificationHash(String),

    #[error("unsupported encrypted value version: {0}")]
    ValueVersion(u32),

    #[error("invalid encoding: {0}")]
    Encoding(String),
}

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to parse settings: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Top-level error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Cipher(#[from] CipherError),

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Re-encryption stopped part way on a backend without atomic commits.
    ///
    /// `rewritten` holds values already under the new key, `pending` those
    /// still under the old one. The in-memory master key was left on the old
    /// key. Manual reconciliation is required.
    #[error(
        "password update partially applied: {} value(s) re-encrypted, {} pending: {source}",
        rewritten.len(),
        pending.len()
    )]
    PartialUpdate {
        rewritten: Vec<String>,
        pending: Vec<String>,
        #[source]
        source: Box<Error>,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Absent project, environment or secret.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::Store(
                StoreError::ProjectNotFound(_)
                    | StoreError::EnvironmentNotFound { .. }
                    | StoreError::SecretNotFound(_)
            )
        )
    }

    /// Password did not match the stored verification hash.
    pub fn is_invalid_password(&self) -> bool {
        matches!(self, Error::Auth(AuthError::InvalidPassword))
    }

    /// Authentication tag mismatch on decrypt.
    pub fn is_integrity(&self) -> bool {
        matches!(self, Error::Cipher(CipherError::Integrity(_)))
    }

    /// Malformed export string, salt or encoded value.
    pub fn is_format(&self) -> bool {
        matches!(self, Error::Format(_))
    }

    /// The password policy rule that rejected a password, if any.
    pub fn policy_violation(&self) -> Option<&PolicyViolation> {
        match self {
            Error::Auth(AuthError::Policy(v)) => Some(v),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Store(StoreError::Database(e))
    }
}

impl From<PolicyViolation> for Error {
    fn from(v: PolicyViolation) -> Self {
        Error::Auth(AuthError::Policy(v))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
