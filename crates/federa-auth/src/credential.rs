//! Federated credentials
//!
//! The broker returns a [`FederatedCredential`] to the caller and keeps no
//! reference to it. Key material comes from a [`CredentialMinter`], which
//! models the provider call that would hand out temporary keys.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

/// Principal tags attached to a credential, keyed by tag name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrincipalTags(BTreeMap<String, String>);

impl PrincipalTags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for PrincipalTags {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Anything that carries principal tags into a policy decision
pub trait PrincipalTagSource {
    fn principal_tag(&self, name: &str) -> Option<&str>;
}

impl PrincipalTagSource for PrincipalTags {
    fn principal_tag(&self, name: &str) -> Option<&str> {
        self.get(name)
    }
}

/// Temporary, scoped resource credentials returned by an exchange
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FederatedCredential {
    /// "ASIA" + 16 uppercase alphanumerics
    pub access_key_id: String,
    /// 40-char secret bound to the session token
    pub secret_key: String,
    /// Sealed session token
    pub session_token: String,
    /// Fixed at issuance
    pub expiration: DateTime<Utc>,
    pub principal_tags: PrincipalTags,
}

impl FederatedCredential {
    /// Check expiry against the current clock
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expiration
    }
}

impl PrincipalTagSource for FederatedCredential {
    fn principal_tag(&self, name: &str) -> Option<&str> {
        self.principal_tags.get(name)
    }
}

impl std::fmt::Debug for FederatedCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FederatedCredential")
            .field("access_key_id", &self.access_key_id)
            .field("secret_key", &"<redacted>")
            .field("expiration", &self.expiration)
            .field("principal_tags", &self.principal_tags)
            .finish_non_exhaustive()
    }
}

/// What the broker asks the minter for
#[derive(Debug, Clone)]
pub struct MintRequest {
    pub sub: String,
    pub role_arn: String,
    pub ttl: Duration,
}

/// Key material handed out by a minter. The matching secret is derived
/// from the sealed session, see [`crate::SessionSealer::secret_key_for`].
#[derive(Debug, Clone)]
pub struct MintedKeys {
    pub access_key_id: String,
}

/// Minting failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MintError {
    /// Provider unreachable or throttled
    #[error("credential provider unavailable: {0}")]
    Unavailable(String),

    /// Provider refused the role
    #[error("credential request rejected: {0}")]
    Rejected(String),
}

/// Source of temporary key material
#[async_trait]
pub trait CredentialMinter: Send + Sync {
    async fn mint(&self, request: &MintRequest) -> Result<MintedKeys, MintError>;
}

/// Generates key material in-process
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalMinter;

#[async_trait]
impl CredentialMinter for LocalMinter {
    async fn mint(&self, _request: &MintRequest) -> Result<MintedKeys, MintError> {
        Ok(MintedKeys {
            access_key_id: generate_access_key_id(),
        })
    }
}

/// Temporary access key ID (20 uppercase alphanumeric characters starting with ASIA)
fn generate_access_key_id() -> String {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut rng = rand::thread_rng();

    let random_part: String = (0..16)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect();

    format!("ASIA{random_part}")
}
