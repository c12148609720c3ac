//! Per-value authenticated encryption.
//!
//! Every value is sealed with XChaCha20-Poly1305 under a key expanded from
//! the master key with HKDF-SHA256 and the value's salt. The logical key
//! name is bound in as associated data, so a ciphertext moved to another
//! name fails authentication.
//!
//! Random mode draws a fresh salt and nonce per value. Deterministic mode
//! uses one fixed salt and a synthetic nonce computed from the context and
//! the plaintext, so the same `(context, plaintext, key)` seals to the same
//! bytes.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use tracing::trace;
use zeroize::Zeroizing;

use crate::core::constants::{
    DETERMINISTIC_NONCE_INFO, DETERMINISTIC_SALT_LABEL, KEY_LEN, VALUE_KEY_INFO,
};
use crate::core::domain::{DerivedKey, Salt};
use crate::error::{CipherError, FormatError, Result};

/// Algorithm id for random-nonce values.
pub const RANDOM_ALGORITHM: &str = "xchacha20poly1305";

/// Algorithm id for values sealed with a synthetic nonce.
pub const DETERMINISTIC_ALGORITHM: &str = "xchacha20poly1305-siv";

const NONCE_LEN: usize = 24;

/// A sealed value ready for the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub algorithm: &'static str,
    pub salt: Salt,
    /// base64(nonce || ciphertext || tag)
    pub ciphertext: String,
}

/// Encrypt with a fresh salt and a random nonce.
pub fn seal_random(master: &DerivedKey, plaintext: &[u8], aad: &[u8]) -> Result<Sealed> {
    let salt = Salt::generate()?;
    let mut nonce = [0u8; NONCE_LEN];
    OsRng
        .try_fill_bytes(&mut nonce)
        .map_err(|e| CipherError::Random(e.to_string()))?;

    let key = value_key(master, &salt)?;
    let ciphertext = seal(&key, &nonce, plaintext, aad)?;
    Ok(Sealed {
        algorithm: RANDOM_ALGORITHM,
        salt,
        ciphertext,
    })
}

/// Encrypt with the fixed salt and a nonce synthesised from `context` and
/// the plaintext.
pub fn seal_deterministic(
    master: &DerivedKey,
    context: &str,
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Sealed> {
    let salt = deterministic_salt();
    let nonce = synthetic_nonce(master, &salt, context, plaintext)?;

    let key = value_key(master, &salt)?;
    let ciphertext = seal(&key, &nonce, plaintext, aad)?;
    Ok(Sealed {
        algorithm: DETERMINISTIC_ALGORITHM,
        salt,
        ciphertext,
    })
}

/// Decrypt a sealed value.
///
/// `name` is only used to label errors.
///
/// # Errors
///
/// Returns `CipherError::UnsupportedAlgorithm` for an unknown algorithm id,
/// `FormatError` for undecodable salt or ciphertext, and
/// `CipherError::Integrity` when the authentication tag does not verify.
pub fn open(
    master: &DerivedKey,
    algorithm: &str,
    salt: &str,
    ciphertext: &str,
    aad: &[u8],
    name: &str,
) -> Result<Zeroizing<Vec<u8>>> {
    if algorithm != RANDOM_ALGORITHM && algorithm != DETERMINISTIC_ALGORITHM {
        return Err(CipherError::UnsupportedAlgorithm(algorithm.to_string()).into());
    }

    let salt = Salt::from_base64(salt)?;
    let sealed = BASE64
        .decode(ciphertext)
        .map_err(|e| FormatError::Encoding(format!("ciphertext for '{}': {}", name, e)))?;
    if sealed.len() < NONCE_LEN {
        return Err(CipherError::Integrity(name.to_string()).into());
    }
    let (nonce, body) = sealed.split_at(NONCE_LEN);

    let key = value_key(master, &salt)?;
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    let plaintext = cipher
        .decrypt(XNonce::from_slice(nonce), Payload { msg: body, aad })
        .map_err(|_| CipherError::Integrity(name.to_string()))?;

    trace!(name = %name, len = plaintext.len(), "opened value");
    Ok(Zeroizing::new(plaintext))
}

/// Per-value key: HKDF-SHA256 over the master key, salted per value.
fn value_key(master: &DerivedKey, salt: &Salt) -> Result<DerivedKey> {
    let hk = Hkdf::<Sha256>::new(Some(salt.as_bytes()), master.as_bytes());
    let mut okm = Zeroizing::new([0u8; KEY_LEN]);
    hk.expand(VALUE_KEY_INFO, &mut okm[..])
        .map_err(|e| CipherError::KeyDerivation(e.to_string()))?;
    Ok(DerivedKey::new(*okm))
}

fn deterministic_salt() -> Salt {
    Salt::new(Sha256::digest(DETERMINISTIC_SALT_LABEL).into())
}

fn synthetic_nonce(
    master: &DerivedKey,
    salt: &Salt,
    context: &str,
    plaintext: &[u8],
) -> Result<[u8; NONCE_LEN]> {
    let hk = Hkdf::<Sha256>::new(Some(salt.as_bytes()), master.as_bytes());
    let mut nonce = [0u8; NONCE_LEN];
    hk.expand_multi_info(
        &[DETERMINISTIC_NONCE_INFO, context.as_bytes(), &[0u8][..], plaintext],
        &mut nonce,
    )
    .map_err(|e| CipherError::KeyDerivation(e.to_string()))?;
    Ok(nonce)
}

fn seal(key: &DerivedKey, nonce: &[u8; NONCE_LEN], plaintext: &[u8], aad: &[u8]) -> Result<String> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    let body = cipher
        .encrypt(XNonce::from_slice(nonce), Payload { msg: plaintext, aad })
        .map_err(|e| CipherError::EncryptionFailed(e.to_string()))?;

    let mut out = Vec::with_capacity(NONCE_LEN + body.len());
    out.extend_from_slice(nonce);
    out.extend_from_slice(&body);
    trace!(len = plaintext.len(), "sealed value");
    Ok(BASE64.encode(out))
}
