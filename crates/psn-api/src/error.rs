//! Error types for PSN API operations

use crate::classify::{ErrorClass, classify_status};

/// Errors from PSN API operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("http request failed: {0}")]
    Http(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("NPSSO token rejected: {0}")]
    InvalidNpsso(String),

    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    #[error("rate limited by upstream: {0}")]
    RateLimited(String),

    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("upstream returned {status}: {body}")]
    Upstream { status: u16, body: String },
}

/// Result alias for PSN API operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Classify this error for the retry layer.
    ///
    /// Timeouts and generic HTTP failures are transient. `RateLimited`
    /// quarantines the credential that hit it. Not-found and malformed
    /// responses are permanent and never retried. Upstream statuses fall
    /// through to [`classify_status`].
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Http(_) | Error::Timeout(_) => ErrorClass::Transient,
            Error::RateLimited(_) => ErrorClass::RateLimited,
            Error::NotFound(_) | Error::Malformed(_) => ErrorClass::Permanent,
            // A rejected NPSSO means the credential is bad, but another
            // credential in the pool may still serve the job.
            Error::InvalidNpsso(_) | Error::TokenExchange(_) => ErrorClass::Transient,
            Error::Upstream { status, body } => classify_status(*status, body),
        }
    }
}
