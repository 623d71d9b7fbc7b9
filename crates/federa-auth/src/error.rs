//! Federation error types
//!
//! `FederationError` is the taxonomy surfaced by the request path and the
//! control plane. Policy denial is not an error; see
//! [`crate::policy::PolicyDecision`].

use thiserror::Error;

/// Errors surfaced by the broker, the issuer and the tag mapper
#[derive(Debug, Error)]
pub enum FederationError {
    /// Claim injection failed for a required claim
    #[error("claim augmentation failed: {0}")]
    Augmentation(#[from] AugmentationError),

    /// Issuer is not registered, or the token names a different issuer
    #[error("untrusted issuer: {0}")]
    UntrustedIssuer(String),

    /// Token failed signature, expiry or claim checks
    #[error("invalid token: {0}")]
    InvalidToken(#[from] TokenError),

    /// Control-plane update could not be applied
    #[error("configuration error after {attempts} attempt(s): {reason}")]
    Configuration { attempts: u32, reason: String },

    /// External collaborator timed out or was unavailable
    #[error("transient error: {0}")]
    Transient(String),

    /// Provider registration rejected
    #[error("invalid provider configuration: {0}")]
    InvalidProvider(String),

    /// Directory (sign-up / sign-in) failure
    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl FederationError {
    /// Check if the caller may retry the same request
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<FederationError> for federa_common::Error {
    fn from(err: FederationError) -> Self {
        match err {
            FederationError::Augmentation(e) => Self::NotAuthorized(e.to_string()),
            FederationError::UntrustedIssuer(issuer) => Self::UntrustedIssuer(issuer),
            FederationError::InvalidToken(e) => Self::NotAuthorized(e.to_string()),
            FederationError::Configuration { reason, .. } => Self::Configuration(reason),
            FederationError::Transient(msg) => Self::ServiceUnavailable(msg),
            FederationError::InvalidProvider(msg) => Self::Configuration(msg),
            FederationError::Directory(e) => match e {
                DirectoryError::UserAlreadyExists(_)
                | DirectoryError::InvalidAttribute(_)
                | DirectoryError::InvalidEmail(_)
                | DirectoryError::EmailImmutable => Self::InvalidRequest(e.to_string()),
                DirectoryError::NotAuthorized
                | DirectoryError::UserNotFound(_)
                | DirectoryError::UserSuspended => Self::NotAuthorized(e.to_string()),
            },
            FederationError::Internal(msg) => Self::Internal(msg),
        }
    }
}

/// Claim augmentation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AugmentationError {
    #[error("claim {0} is reserved and cannot be augmented")]
    ReservedClaim(String),

    #[error("augmentation rule has an empty attribute or claim name")]
    EmptyName,

    #[error("required attribute {0} is not set")]
    MissingAttribute(String),

    #[error("attribute {attribute} has an invalid value: {reason}")]
    InvalidValue { attribute: String, reason: String },
}

/// Token verification errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("token expired")]
    Expired,

    #[error("token not yet valid")]
    NotYetValid,

    #[error("signature verification failed")]
    BadSignature,

    #[error("algorithm {actual} does not match provider algorithm {expected}")]
    AlgorithmMismatch { expected: String, actual: String },

    #[error("audience not accepted: {0}")]
    AudienceMismatch(String),

    #[error("expected a {expected} token, got {actual}")]
    WrongTokenUse { expected: String, actual: String },

    #[error("missing claim: {0}")]
    MissingClaim(String),

    #[error("token signing failed: {0}")]
    Signing(String),
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::ExpiredSignature => Self::Expired,
            ErrorKind::ImmatureSignature => Self::NotYetValid,
            ErrorKind::InvalidSignature => Self::BadSignature,
            ErrorKind::InvalidAlgorithm => Self::AlgorithmMismatch {
                expected: "provider algorithm".to_string(),
                actual: "token algorithm".to_string(),
            },
            ErrorKind::InvalidAudience => Self::AudienceMismatch("aud".to_string()),
            ErrorKind::MissingRequiredClaim(claim) => Self::MissingClaim(claim.clone()),
            _ => Self::Malformed(err.to_string()),
        }
    }
}

/// Identity directory errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DirectoryError {
    #[error("user already exists: {0}")]
    UserAlreadyExists(String),

    #[error("user not found: {0}")]
    UserNotFound(String),

    #[error("incorrect username or password")]
    NotAuthorized,

    #[error("user is suspended")]
    UserSuspended,

    #[error("verified email cannot be changed")]
    EmailImmutable,

    #[error("invalid email: {0}")]
    InvalidEmail(String),

    #[error("invalid attribute: {0}")]
    InvalidAttribute(String),
}
