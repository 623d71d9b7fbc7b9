//! Core type definitions for Federa
//!
//! Identifiers that cross the control plane and the request path are
//! validated once at construction so downstream code can treat them as
//! well-formed.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifier of a federation (identity) pool.
///
/// Doubles as the idempotency key when tag mappings are applied.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[serde(try_from = "String", into = "String")]
pub struct PoolId(String);

impl PoolId {
    /// Create a new pool ID (1-128 chars of `[A-Za-z0-9_:-]`)
    pub fn new(id: impl Into<String>) -> Result<Self, IdentifierError> {
        let id = id.into();
        validate_identifier(&id, 128, |c| {
            c.is_ascii_alphanumeric() || matches!(c, '_' | ':' | '-')
        })?;
        Ok(Self(id))
    }

    /// Get the pool ID as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for PoolId {
    type Error = IdentifierError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<PoolId> for String {
    fn from(id: PoolId) -> Self {
        id.0
    }
}

/// Login key naming a registered identity provider
/// (e.g. `idp.example.com/pool-1`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[serde(try_from = "String", into = "String")]
pub struct IssuerId(String);

impl IssuerId {
    /// Create a new issuer ID (1-512 printable, non-whitespace ASCII chars)
    pub fn new(id: impl Into<String>) -> Result<Self, IdentifierError> {
        let id = id.into();
        validate_identifier(&id, 512, |c| c.is_ascii_graphic())?;
        Ok(Self(id))
    }

    /// Get the issuer ID as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for IssuerId {
    type Error = IdentifierError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<IssuerId> for String {
    fn from(id: IssuerId) -> Self {
        id.0
    }
}

/// Identifier validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentifierError {
    #[error("identifier must not be empty")]
    Empty,
    #[error("identifier must be at most {0} characters")]
    TooLong(usize),
    #[error("identifier contains invalid character: {0:?}")]
    InvalidChar(char),
}

fn validate_identifier(
    id: &str,
    max_len: usize,
    allowed: impl Fn(char) -> bool,
) -> Result<(), IdentifierError> {
    if id.is_empty() {
        return Err(IdentifierError::Empty);
    }
    if id.len() > max_len {
        return Err(IdentifierError::TooLong(max_len));
    }
    if let Some(c) = id.chars().find(|c| !allowed(*c)) {
        return Err(IdentifierError::InvalidChar(c));
    }
    Ok(())
}

/// Bucket name
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[serde(try_from = "String", into = "String")]
pub struct BucketName(String);

impl BucketName {
    /// Create a new bucket name (validates S3 naming rules)
    pub fn new(name: impl Into<String>) -> Result<Self, BucketNameError> {
        let name = name.into();
        Self::validate(&name)?;
        Ok(Self(name))
    }

    /// Get the bucket name as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Resource class used by access policies (`arn:federa:s3:::<bucket>`)
    #[must_use]
    pub fn resource_class(&self) -> String {
        format!("arn:federa:s3:::{}", self.0)
    }

    fn validate(name: &str) -> Result<(), BucketNameError> {
        if name.len() < 3 {
            return Err(BucketNameError::TooShort);
        }
        if name.len() > 63 {
            return Err(BucketNameError::TooLong);
        }

        let bytes = name.as_bytes();
        let edge_ok = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();
        if !edge_ok(bytes[0]) {
            return Err(BucketNameError::InvalidStartChar);
        }
        if !edge_ok(bytes[bytes.len() - 1]) {
            return Err(BucketNameError::InvalidEndChar);
        }

        for c in name.chars() {
            if !c.is_ascii_lowercase() && !c.is_ascii_digit() && c != '-' && c != '.' {
                return Err(BucketNameError::InvalidChar(c));
            }
        }

        if name.contains("..") {
            return Err(BucketNameError::ConsecutivePeriods);
        }

        if name.parse::<std::net::Ipv4Addr>().is_ok() {
            return Err(BucketNameError::LooksLikeIpAddress);
        }

        Ok(())
    }
}

impl TryFrom<String> for BucketName {
    type Error = BucketNameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<BucketName> for String {
    fn from(name: BucketName) -> Self {
        name.0
    }
}

/// Bucket name validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BucketNameError {
    #[error("bucket name must be at least 3 characters")]
    TooShort,
    #[error("bucket name must be at most 63 characters")]
    TooLong,
    #[error("bucket name must start with a lowercase letter or number")]
    InvalidStartChar,
    #[error("bucket name must end with a lowercase letter or number")]
    InvalidEndChar,
    #[error("bucket name contains invalid character: {0}")]
    InvalidChar(char),
    #[error("bucket name cannot contain consecutive periods")]
    ConsecutivePeriods,
    #[error("bucket name cannot be formatted as an IP address")]
    LooksLikeIpAddress,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_id() {
        assert!(PoolId::new("us-east-1:4f1c2a").is_ok());
        assert_eq!(PoolId::new(""), Err(IdentifierError::Empty));
        assert_eq!(
            PoolId::new("pool/1"),
            Err(IdentifierError::InvalidChar('/'))
        );
        assert_eq!(
            PoolId::new("x".repeat(129)),
            Err(IdentifierError::TooLong(128))
        );
    }

    #[test]
    fn test_issuer_id() {
        assert!(IssuerId::new("idp.example.com/us-east-1_abc").is_ok());
        assert!(IssuerId::new("has space").is_err());
    }

    #[test]
    fn test_identifier_deserialize_validates() {
        let ok: PoolId = serde_json::from_str("\"pool-1\"").unwrap();
        assert_eq!(ok.as_str(), "pool-1");
        assert!(serde_json::from_str::<PoolId>("\"\"").is_err());
    }

    #[test]
    fn test_bucket_name_valid() {
        assert!(BucketName::new("my-bucket").is_ok());
        assert!(BucketName::new("bucket123").is_ok());
        assert!(BucketName::new("a.b.c").is_ok());
    }

    #[test]
    fn test_bucket_name_invalid() {
        assert!(BucketName::new("ab").is_err()); // Too short
        assert!(BucketName::new("-bucket").is_err()); // Invalid start
        assert!(BucketName::new("bucket-").is_err()); // Invalid end
        assert!(BucketName::new("Bucket").is_err()); // Uppercase
        assert!(BucketName::new("bucket..name").is_err()); // Consecutive periods
        assert!(BucketName::new("192.168.1.1").is_err()); // IP address
    }

    #[test]
    fn test_resource_class() {
        let bucket = BucketName::new("anycompany-bucket").unwrap();
        assert_eq!(bucket.resource_class(), "arn:federa:s3:::anycompany-bucket");
    }
}
