//! Error types for dispatch operations

use coordination::StoreError;

/// Errors from dispatch operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("coordination store error: {0}")]
    Store(#[from] StoreError),

    #[error("credential pool error: {0}")]
    Pool(#[from] credential_pool::Error),

    #[error("job descriptor encoding error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Result alias for dispatch operations.
pub type Result<T> = std::result::Result<T, Error>;
