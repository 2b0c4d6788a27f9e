//! Client error types.

use thiserror::Error;

use crate::classify::{BusinessError, ClassifiedError};
use crate::storage::StorageError;

/// Client error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Transport or HTTP failure, classified once at the pipeline boundary.
    #[error(transparent)]
    Request(#[from] ClassifiedError),

    /// The server answered 2xx but the envelope declared `success: false`.
    #[error(transparent)]
    Business(#[from] BusinessError),

    /// The request was aborted before reaching the network because no
    /// usable credentials could be obtained.
    #[error("Re-authentication required: {0}")]
    ReauthRequired(String),

    /// Durable token storage failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// URL parsing failed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl Error {
    /// The classified transport error, if this is one.
    pub fn classified(&self) -> Option<&ClassifiedError> {
        match self {
            Error::Request(err) => Some(err),
            _ => None,
        }
    }

    /// Check if this error is eligible for caller-directed retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Request(err) if err.retryable)
    }

    /// Check if the caller must send the user back to a login surface.
    pub fn requires_login(&self) -> bool {
        match self {
            Error::ReauthRequired(_) => true,
            Error::Request(err) => err.triggers_reauth,
            Error::Business(err) => err.permission_kind.is_some_and(|k| k.triggers_reauth()),
            _ => false,
        }
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;
