//! Error types for pool operations

use coordination::StoreError;

/// Errors from pool operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("pool configuration error: {0}")]
    Config(String),

    #[error("coordination store error: {0}")]
    Store(#[from] StoreError),

    #[error("token refresh failed: {0}")]
    Refresh(String),

    #[error("unknown credential instance: {0}")]
    UnknownInstance(String),
}

/// Result alias for pool operations.
pub type Result<T> = std::result::Result<T, Error>;
