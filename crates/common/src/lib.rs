//! Common types for psn-sync

mod error;
mod fingerprint;
mod secret;

pub use error::{Error, Result};
pub use fingerprint::fingerprint;
pub use secret::Secret;
