//! Encrypted value wire format.
//!
//! One JSON document per logical key:
//!
//! ```text
//! {"algorithm":"xchacha20poly1305","version":1,"salt":"<base64>",
//!  "ciphertext":"<base64-or-plaintext>","created_at":<unix>,"is_encrypted":true}
//! ```
//!
//! When `is_encrypted` is false `ciphertext` carries the plaintext verbatim.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::core::constants::VALUE_VERSION;
use crate::error::{FormatError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedValue {
    pub algorithm: String,
    pub version: u32,
    pub salt: String,
    pub ciphertext: String,
    pub created_at: i64,
    pub is_encrypted: bool,
}

impl EncryptedValue {
    /// Wrap a plaintext value that is stored unencrypted.
    pub fn plaintext(value: &str) -> Self {
        Self {
            algorithm: String::new(),
            version: VALUE_VERSION,
            salt: String::new(),
            ciphertext: value.to_string(),
            created_at: Utc::now().timestamp(),
            is_encrypted: false,
        }
    }

    /// Structured encrypted value.
    pub fn encrypted(algorithm: &str, salt: String, ciphertext: String, created_at: i64) -> Self {
        Self {
            algorithm: algorithm.to_string(),
            version: VALUE_VERSION,
            salt,
            ciphertext,
            created_at,
            is_encrypted: true,
        }
    }

    /// Decode a stored document.
    ///
    /// Returns `None` when the bytes are not a structured value, which marks
    /// them as legacy raw plaintext.
    pub fn decode(raw: &str) -> Option<Self> {
        serde_json::from_str(raw).ok()
    }

    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| FormatError::Encoding(e.to_string()).into())
    }
}
