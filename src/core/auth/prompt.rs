//! Password acquisition.
//!
//! Every source enforces the absolute 8-character floor, independent of the
//! configured policy. Passwords supplied out of band are not trusted any
//! more than typed ones: callers still verify them against the stored hash.

use dialoguer::Password;
use tracing::debug;
use zeroize::Zeroizing;

use crate::core::constants::{PASSWORD_ENV, PASSWORD_FLOOR};
use crate::error::{AuthError, Result};

/// A source of passwords.
pub trait PasswordPrompt {
    /// Ask for an existing password.
    fn password(&self, label: &str) -> Result<Zeroizing<String>>;

    /// Ask for a new password, confirmed where the source allows it.
    fn new_password(&self, label: &str) -> Result<Zeroizing<String>>;
}

/// Reject passwords shorter than the absolute floor.
///
/// # Errors
///
/// Returns `AuthError::BelowMinimum`.
pub fn enforce_floor(password: &str) -> Result<()> {
    if password.chars().count() < PASSWORD_FLOOR {
        return Err(AuthError::BelowMinimum {
            min: PASSWORD_FLOOR,
        }
        .into());
    }
    Ok(())
}

fn confirm_match(first: &str, second: &str) -> Result<()> {
    if first != second {
        return Err(AuthError::ConfirmationMismatch.into());
    }
    Ok(())
}

/// Interactive hidden-input prompt on the controlling terminal.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalPrompt;

impl TerminalPrompt {
    fn read(prompt: &str) -> Result<Zeroizing<String>> {
        Password::new()
            .with_prompt(prompt)
            .allow_empty_password(false)
            .interact()
            .map(Zeroizing::new)
            .map_err(|e| AuthError::PromptFailed(e.to_string()).into())
    }
}

impl PasswordPrompt for TerminalPrompt {
    fn password(&self, label: &str) -> Result<Zeroizing<String>> {
        let password = Self::read(&format!("Password for {}", label))?;
        enforce_floor(&password)?;
        Ok(password)
    }

    fn new_password(&self, label: &str) -> Result<Zeroizing<String>> {
        let password = Self::read(&format!("New password for {}", label))?;
        enforce_floor(&password)?;
        let confirmation = Self::read("Confirm password")?;
        confirm_match(&password, &confirmation)?;
        Ok(password)
    }
}

/// Password read from an environment variable, for unattended use.
#[derive(Debug, Clone)]
pub struct EnvPassword {
    var: String,
}

impl Default for EnvPassword {
    fn default() -> Self {
        Self::new(PASSWORD_ENV)
    }
}

impl EnvPassword {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }

    fn read(&self) -> Result<Zeroizing<String>> {
        let value = std::env::var(&self.var)
            .map(Zeroizing::new)
            .map_err(|_| AuthError::PasswordUnavailable(self.var.clone()))?;
        debug!(var = %self.var, "using password from environment");
        enforce_floor(&value)?;
        Ok(value)
    }
}

impl PasswordPrompt for EnvPassword {
    fn password(&self, _label: &str) -> Result<Zeroizing<String>> {
        self.read()
    }

    fn new_password(&self, _label: &str) -> Result<Zeroizing<String>> {
        self.read()
    }
}

/// A fixed password held in memory, for programmatic callers.
#[derive(Clone)]
pub struct StaticPassword(Zeroizing<String>);

impl StaticPassword {
    pub fn new(password: impl Into<String>) -> Self {
        Self(Zeroizing::new(password.into()))
    }
}

impl std::fmt::Debug for StaticPassword {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StaticPassword([REDACTED])")
    }
}

impl PasswordPrompt for StaticPassword {
    fn password(&self, _label: &str) -> Result<Zeroizing<String>> {
        enforce_floor(&self.0)?;
        Ok(self.0.clone())
    }

    fn new_password(&self, label: &str) -> Result<Zeroizing<String>> {
        self.password(label)
    }
}
