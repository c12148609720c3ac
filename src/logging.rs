//! Tracing subscriber setup.
//!
//! The library only emits `tracing` events. Host applications call
//! [`init`] once at startup; tests may call it repeatedly.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::core::constants::LOG_ENV;

/// Install a global subscriber.
///
/// The filter is read from `VAULTENV_LOG`, falling back to `vaultenv=debug`
/// when `verbose` and `vaultenv=warn` otherwise. Does nothing if a
/// subscriber is already installed.
pub fn init(verbose: bool) {
    let _ = try_init(verbose);
}

/// Like [`init`], but reports whether this call installed the subscriber.
pub fn try_init(verbose: bool) -> bool {
    tracing_subscriber::registry()
        .with(filter(verbose))
        .with(fmt::layer().with_target(false).without_time())
        .try_init()
        .is_ok()
}

fn filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("vaultenv=debug")
        } else {
            EnvFilter::new("vaultenv=warn")
        }
    })
}
