//! Domain types.

mod entry;
mod export;
mod key;
mod value;

pub use entry::{EnvironmentKeyEntry, KdfParams, KeyEntry};
pub use export::KeyExport;
pub use key::{DerivedKey, Salt};
pub use value::EncryptedValue;
