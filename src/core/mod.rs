//! Core library components.
//!
//! Key derivation, key metadata persistence, key lifecycle management and
//! encrypted value storage.

pub mod auth;
pub mod config;
pub mod constants;
pub mod domain;
pub mod keystore;
pub mod manager;
pub mod session;
pub mod storage;
pub mod types;
