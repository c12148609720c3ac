//! Password policy.
//!
//! Runs before any key derivation and reports the first rule a password
//! breaks rather than a generic rejection.

use serde::{Deserialize, Serialize};

use crate::core::constants::PASSWORD_FLOOR;
use crate::error::PolicyViolation;

/// Passwords rejected regardless of character classes.
///
/// Compared case-insensitively.
const COMMON_PASSWORDS: &[&str] = &[
    "password",
    "password1",
    "password123",
    "password1!",
    "p@ssw0rd",
    "p@ssword1",
    "passw0rd!",
    "qwerty123",
    "qwerty123!",
    "letmein1!",
    "welcome1!",
    "welcome123",
    "admin123!",
    "changeme",
    "changeme1!",
    "iloveyou1!",
    "12345678",
    "123456789",
    "1234567890",
    "abc12345",
    "trustno1!",
    "football1!",
    "monkey123!",
    "sunshine1!",
];

/// Configurable password rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PasswordPolicy {
    pub min_length: usize,
    pub require_uppercase: bool,
    pub require_lowercase: bool,
    pub require_digit: bool,
    pub require_symbol: bool,
    pub block_common: bool,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_length: PASSWORD_FLOOR,
            require_uppercase: true,
            require_lowercase: true,
            require_digit: true,
            require_symbol: true,
            block_common: true,
        }
    }
}

impl PasswordPolicy {
    /// Only the length rule, no class or block-list checks.
    pub fn length_only(min_length: usize) -> Self {
        Self {
            min_length,
            require_uppercase: false,
            require_lowercase: false,
            require_digit: false,
            require_symbol: false,
            block_common: false,
        }
    }

    /// Check a password against every rule, in order.
    ///
    /// # Errors
    ///
    /// Returns the first `PolicyViolation` encountered.
    pub fn check(&self, password: &str) -> Result<(), PolicyViolation> {
        let length = password.chars().count();
        if length < self.min_length {
            return Err(PolicyViolation::TooShort {
                min: self.min_length,
                actual: length,
            });
        }

        if self.block_common {
            let lowered = password.to_lowercase();
            if COMMON_PASSWORDS.contains(&lowered.as_str()) {
                return Err(PolicyViolation::CommonPassword);
            }
        }

        if self.require_uppercase && !password.chars().any(char::is_uppercase) {
            return Err(PolicyViolation::MissingUppercase);
        }
        if self.require_lowercase && !password.chars().any(char::is_lowercase) {
            return Err(PolicyViolation::MissingLowercase);
        }
        if self.require_digit && !password.chars().any(|c| c.is_ascii_digit()) {
            return Err(PolicyViolation::MissingDigit);
        }
        if self.require_symbol
            && !password
                .chars()
                .any(|c| !c.is_alphanumeric() && !c.is_whitespace())
        {
            return Err(PolicyViolation::MissingSymbol);
        }

        Ok(())
    }
}
