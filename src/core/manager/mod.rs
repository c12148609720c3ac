//! Key lifecycle orchestration.
//!
//! Managers combine a [`KeyStore`](crate::core::keystore::KeyStore), a
//! [`PasswordAuthenticator`](crate::core::auth::PasswordAuthenticator) and an
//! optional [`SessionCache`](crate::core::session::SessionCache):
//!
//! ```text
//! request key ─▶ session cache ─hit─▶ key
//!                     │ miss
//!                     ▼
//!               key store entry ─▶ password ─▶ derive ─▶ verify ─▶ cache ─▶ key
//! ```

mod environment;
mod project;

pub use environment::EnvironmentKeyManager;
pub use project::ProjectKeyManager;
