//! Shared error type for configuration and credential loading

use thiserror::Error;

/// Errors raised while loading and validating service configuration.
#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    /// NPSSO material could not be resolved: missing token file, token
    /// count not matching the provisioned credential count, and similar.
    #[error("credential material error: {0}")]
    Credentials(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("toml parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Result alias using common Error
pub type Result<T> = std::result::Result<T, Error>;
