//! Configuration types for Federa
//!
//! Every section carries serde defaults so a partial file (or none at all)
//! yields a runnable development configuration. Secrets have no defaults
//! and are checked by [`Config::validate`].

use crate::error::Error;
use crate::types::{IssuerId, PoolId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Root configuration for Federa
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server configuration
    pub server: ServerConfig,
    /// Built-in token issuer (identity directory) configuration
    pub issuer: IssuerConfig,
    /// Federation broker configuration
    pub federation: FederationConfig,
    /// Claim to principal-tag mapping applied at startup
    pub tag_mapping: TagMappingSection,
    /// Control-plane retry configuration
    pub reconcile: ReconcileConfig,
    /// Storage access policy configuration
    pub policy: PolicyConfig,
    /// Protected API configuration
    pub api: ApiConfig,
    /// Seed data for the in-memory directory and object index
    pub seed: SeedConfig,
}

impl Config {
    /// Check the values that have no safe default.
    pub fn validate(&self) -> Result<(), Error> {
        if self.issuer.signing_secret.is_empty() {
            return Err(Error::Configuration(
                "issuer.signing_secret must be set".to_string(),
            ));
        }
        if self.federation.session_secret.is_empty() {
            return Err(Error::Configuration(
                "federation.session_secret must be set".to_string(),
            ));
        }
        PoolId::new(self.federation.pool_id.clone())?;
        IssuerId::new(self.issuer.issuer_id.clone())?;
        for provider in &self.federation.providers {
            IssuerId::new(provider.issuer_id.clone())?;
            if provider.client_ids.is_empty() {
                return Err(Error::Configuration(format!(
                    "provider {} must list at least one client id",
                    provider.issuer_id
                )));
            }
        }
        Ok(())
    }

    /// Providers registered with the broker.
    ///
    /// When none are configured the built-in issuer is registered, mirroring
    /// an identity pool that trusts its own user pool.
    #[must_use]
    pub fn effective_providers(&self) -> Vec<ProviderConfig> {
        if !self.federation.providers.is_empty() {
            return self.federation.providers.clone();
        }
        vec![ProviderConfig {
            issuer_id: self.issuer.issuer_id.clone(),
            issuer_url: self.issuer.issuer_url.clone(),
            client_ids: vec![self.issuer.client_id.clone()],
            key: ProviderKeyConfig::Hmac {
                secret: self.issuer.signing_secret.clone(),
            },
            leeway_secs: default_leeway_secs(),
        }]
    }
}

/// HTTP server configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address
    pub listen: SocketAddr,
    /// Upper bound on a single request, in milliseconds
    pub request_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 9400)),
            request_timeout_ms: 10_000,
        }
    }
}

/// Built-in token issuer configuration
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IssuerConfig {
    /// Value of the `iss` claim
    pub issuer_url: String,
    /// Login key clients use to name this issuer at exchange time
    pub issuer_id: String,
    /// App client id, the `aud` of identity tokens
    pub client_id: String,
    /// HS256 signing secret
    pub signing_secret: String,
    /// Identity/access token lifetime
    pub token_ttl_secs: u64,
    /// Refresh token lifetime
    pub refresh_ttl_secs: u64,
    /// Scopes granted to access tokens
    pub scopes: Vec<String>,
    /// Claim augmentation rules run before each token is signed
    pub augment: Vec<AugmentRuleConfig>,
}

impl Default for IssuerConfig {
    fn default() -> Self {
        Self {
            issuer_url: "https://idp.federa.local/default-pool".to_string(),
            issuer_id: "idp.federa.local/default-pool".to_string(),
            client_id: "federa-web".to_string(),
            signing_secret: String::new(),
            token_ttl_secs: 3600,
            refresh_ttl_secs: 30 * 24 * 3600,
            scopes: vec!["openid".to_string(), "profile".to_string()],
            augment: vec![AugmentRuleConfig {
                attribute: "department".to_string(),
                claim: "department".to_string(),
                required: false,
            }],
        }
    }
}

impl std::fmt::Debug for IssuerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuerConfig")
            .field("issuer_url", &self.issuer_url)
            .field("issuer_id", &self.issuer_id)
            .field("client_id", &self.client_id)
            .field("signing_secret", &"<redacted>")
            .field("token_ttl_secs", &self.token_ttl_secs)
            .field("refresh_ttl_secs", &self.refresh_ttl_secs)
            .field("scopes", &self.scopes)
            .field("augment", &self.augment)
            .finish()
    }
}

/// One claim augmentation rule
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AugmentRuleConfig {
    /// Identity attribute to read
    pub attribute: String,
    /// Claim to write
    pub claim: String,
    /// Fail sign-in instead of failing open
    #[serde(default)]
    pub required: bool,
}

/// Federation broker configuration
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FederationConfig {
    /// Identity pool id (also the tag-mapping idempotency key)
    pub pool_id: String,
    /// Role assumed by authenticated identities
    pub role_arn: String,
    /// Lifetime of federated credentials
    pub credential_ttl_secs: u64,
    /// Upper bound on one exchange, in milliseconds
    pub exchange_timeout_ms: u64,
    /// HMAC secret sealing session tokens
    pub session_secret: String,
    /// Registered identity providers
    pub providers: Vec<ProviderConfig>,
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            pool_id: "local:default".to_string(),
            role_arn: "arn:federa:iam::000000000000:role/FederaAuthenticated".to_string(),
            credential_ttl_secs: 3600,
            exchange_timeout_ms: 5_000,
            session_secret: String::new(),
            providers: Vec::new(),
        }
    }
}

impl std::fmt::Debug for FederationConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FederationConfig")
            .field("pool_id", &self.pool_id)
            .field("role_arn", &self.role_arn)
            .field("credential_ttl_secs", &self.credential_ttl_secs)
            .field("exchange_timeout_ms", &self.exchange_timeout_ms)
            .field("session_secret", &"<redacted>")
            .field("providers", &self.providers)
            .finish()
    }
}

/// A registered identity provider
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Login key naming the provider
    pub issuer_id: String,
    /// Expected `iss` claim
    pub issuer_url: String,
    /// Accepted `aud` values
    pub client_ids: Vec<String>,
    /// Signature verification key
    pub key: ProviderKeyConfig,
    /// Clock-skew leeway applied to `exp`
    #[serde(default = "default_leeway_secs")]
    pub leeway_secs: u64,
}

fn default_leeway_secs() -> u64 {
    30
}

/// Verification key material for a provider
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderKeyConfig {
    /// Shared HS256 secret
    Hmac { secret: String },
    /// RS256 public key in PEM form
    RsaPem { public_key_pem: String },
}

impl std::fmt::Debug for ProviderKeyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hmac { .. } => f.write_str("Hmac { secret: <redacted> }"),
            Self::RsaPem { .. } => f.write_str("RsaPem { .. }"),
        }
    }
}

/// Claim to principal-tag mapping section
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TagMappingSection {
    /// Provider whose tokens are mapped; the built-in issuer when unset
    pub provider: Option<String>,
    /// Ordered claim to tag pairs
    pub mappings: Vec<TagMappingEntry>,
    /// Also activate the provider's default tag set
    pub use_defaults: bool,
}

impl Default for TagMappingSection {
    fn default() -> Self {
        Self {
            provider: None,
            mappings: vec![TagMappingEntry {
                claim: "department".to_string(),
                tag: "department".to_string(),
            }],
            use_defaults: false,
        }
    }
}

/// One claim to tag pair
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagMappingEntry {
    /// Token claim to read
    pub claim: String,
    /// Principal tag to write
    pub tag: String,
}

/// Control-plane retry configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Attempts before surfacing a configuration error
    pub max_attempts: u32,
    /// First backoff delay
    pub initial_backoff_ms: u64,
    /// Backoff ceiling
    pub max_backoff_ms: u64,
    /// Upper bound on a single attempt
    pub attempt_timeout_ms: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 200,
            max_backoff_ms: 5_000,
            attempt_timeout_ms: 2_000,
        }
    }
}

/// Storage access policy configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// JSON policy document; when absent the department-prefix rule is used
    pub path: Option<PathBuf>,
    /// Principal tag referenced by the default rule
    pub tag: String,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            path: None,
            tag: "department".to_string(),
        }
    }
}

/// Protected API configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Scope an access token must carry; `None` accepts identity tokens
    pub required_scope: Option<String>,
}

/// Seed data
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SeedConfig {
    /// Bucket holding the seeded objects
    pub bucket: String,
    /// Object keys
    pub objects: Vec<String>,
    /// Directory users
    pub users: Vec<SeedUser>,
}

impl Default for SeedConfig {
    fn default() -> Self {
        Self {
            bucket: "anycompany-bucket".to_string(),
            objects: vec![
                "Engineering/testfile-engineering.zip".to_string(),
                "Legal/testfile-legal.zip".to_string(),
            ],
            users: Vec::new(),
        }
    }
}

/// A seeded directory user
#[derive(Clone, Serialize, Deserialize)]
pub struct SeedUser {
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl std::fmt::Debug for SeedUser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeedUser")
            .field("username", &self.username)
            .field("email", &self.email)
            .field("attributes", &self.attributes)
            .finish_non_exhaustive()
    }
}
