//! Portable key export string.
//!
//! `vaultenv:v1:<base64-salt>:<hex-verification-hash>` carries the public
//! half of a project key so it can be re-registered elsewhere. Importing
//! still requires the original password.

use std::fmt;
use std::str::FromStr;

use super::Salt;
use crate::core::constants::{EXPORT_PREFIX, EXPORT_VERSION};
use crate::core::types::VerificationHash;
use crate::error::{Error, FormatError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyExport {
    pub salt: Salt,
    pub verification_hash: VerificationHash,
}

impl KeyExport {
    pub fn new(salt: Salt, verification_hash: VerificationHash) -> Self {
        Self {
            salt,
            verification_hash,
        }
    }
}

impl fmt::Display for KeyExport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            EXPORT_PREFIX,
            EXPORT_VERSION,
            self.salt.to_base64(),
            self.verification_hash
        )
    }
}

impl FromStr for KeyExport {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.trim().split(':').collect();
        if parts.len() != 4 {
            return Err(FormatError::ExportShape.into());
        }
        if parts[0] != EXPORT_PREFIX {
            return Err(FormatError::ExportPrefix(parts[0].to_string()).into());
        }
        if parts[1] != EXPORT_VERSION {
            return Err(FormatError::ExportVersion(parts[1].to_string()).into());
        }

        let salt = Salt::from_base64(parts[2])?;

        let hash = parts[3].to_ascii_lowercase();
        let decoded =
            hex::decode(&hash).map_err(|e| FormatError::VerificationHash(e.to_string()))?;
        if decoded.len() != 32 {
            return Err(FormatError::VerificationHash(format!(
                "expected 32 bytes, got {}",
                decoded.len()
            ))
            .into());
        }

        Ok(Self::new(salt, hash))
    }
}
