//! Error types for Federa
//!
//! This module defines the error type surfaced at the HTTP boundary. The
//! broker core has its own taxonomy which converts into this one.

use crate::types::{BucketNameError, IdentifierError};
use thiserror::Error;

/// Common result type for Federa operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for Federa
#[derive(Debug, Error)]
pub enum Error {
    // Authentication errors
    #[error("missing credentials")]
    MissingCredentials,

    #[error("not authorized: {0}")]
    NotAuthorized(String),

    #[error("untrusted issuer: {0}")]
    UntrustedIssuer(String),

    // Authorization errors
    #[error("access denied")]
    AccessDenied,

    #[error("insufficient scope: {0}")]
    InsufficientScope(String),

    #[error("the security token included in the request is expired")]
    ExpiredToken,

    // Resource errors
    #[error("bucket not found: {0}")]
    BucketNotFound(String),

    #[error("invalid bucket name: {0}")]
    InvalidBucketName(#[from] BucketNameError),

    #[error("invalid identifier: {0}")]
    InvalidIdentifier(#[from] IdentifierError),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    // Collaborator errors
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    // Internal errors
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a not-authorized error
    pub fn not_authorized(msg: impl Into<String>) -> Self {
        Self::NotAuthorized(msg.into())
    }

    /// Check if this is a retryable error
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ServiceUnavailable(_))
    }

    /// Get HTTP status code
    #[must_use]
    pub fn http_status_code(&self) -> u16 {
        match self {
            // 400 Bad Request
            Self::InvalidRequest(_) | Self::InvalidBucketName(_) | Self::InvalidIdentifier(_) => 400,

            // 401 Unauthorized
            Self::MissingCredentials | Self::NotAuthorized(_) | Self::UntrustedIssuer(_) => 401,

            // 403 Forbidden
            Self::AccessDenied | Self::InsufficientScope(_) | Self::ExpiredToken => 403,

            // 404 Not Found
            Self::BucketNotFound(_) => 404,

            // 500 Internal Server Error
            Self::Internal(_) | Self::Configuration(_) => 500,

            // 503 Service Unavailable
            Self::ServiceUnavailable(_) => 503,
        }
    }

    /// Get machine-readable error code
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::MissingCredentials => "MissingAuthenticationToken",
            Self::NotAuthorized(_) => "NotAuthorizedException",
            Self::UntrustedIssuer(_) => "UntrustedIssuer",
            Self::AccessDenied => "AccessDenied",
            Self::InsufficientScope(_) => "InsufficientScope",
            Self::ExpiredToken => "ExpiredToken",
            Self::BucketNotFound(_) => "NoSuchBucket",
            Self::InvalidBucketName(_) => "InvalidBucketName",
            Self::InvalidIdentifier(_) | Self::InvalidRequest(_) => "InvalidRequest",
            Self::ServiceUnavailable(_) => "ServiceUnavailable",
            Self::Configuration(_) | Self::Internal(_) => "InternalError",
        }
    }
}
