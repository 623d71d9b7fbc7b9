//! Registered identity providers
//!
//! The registry is the single list of trusted issuers. The federation
//! broker and the gateway authorizer both resolve providers here, so the
//! two validation paths cannot disagree about which tokens are trusted.

use crate::error::FederationError;
use federa_common::IssuerId;
use federa_common::config::{ProviderConfig, ProviderKeyConfig};
use jsonwebtoken::{Algorithm, DecodingKey};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// A trusted token issuer
#[derive(Clone)]
pub struct RegisteredProvider {
    /// Login key clients name at exchange time
    pub issuer_id: IssuerId,
    /// Expected `iss` claim
    pub issuer_url: String,
    /// Accepted app client ids
    pub client_ids: Vec<String>,
    /// Signature algorithm
    pub algorithm: Algorithm,
    /// Clock-skew leeway in seconds
    pub leeway_secs: u64,
    key: DecodingKey,
}

impl std::fmt::Debug for RegisteredProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredProvider")
            .field("issuer_id", &self.issuer_id)
            .field("issuer_url", &self.issuer_url)
            .field("client_ids", &self.client_ids)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

impl RegisteredProvider {
    /// Provider verifying HS256 tokens with a shared secret
    pub fn hmac(
        issuer_id: IssuerId,
        issuer_url: impl Into<String>,
        client_ids: Vec<String>,
        secret: &[u8],
    ) -> Self {
        Self {
            issuer_id,
            issuer_url: issuer_url.into(),
            client_ids,
            algorithm: Algorithm::HS256,
            leeway_secs: 30,
            key: DecodingKey::from_secret(secret),
        }
    }

    /// Provider verifying RS256 tokens with a PEM public key
    pub fn rsa_pem(
        issuer_id: IssuerId,
        issuer_url: impl Into<String>,
        client_ids: Vec<String>,
        public_key_pem: &[u8],
    ) -> Result<Self, FederationError> {
        let key = DecodingKey::from_rsa_pem(public_key_pem)
            .map_err(|e| FederationError::InvalidProvider(format!("{issuer_id}: {e}")))?;
        Ok(Self {
            issuer_id,
            issuer_url: issuer_url.into(),
            client_ids,
            algorithm: Algorithm::RS256,
            leeway_secs: 30,
            key,
        })
    }

    /// Build from configuration
    pub fn from_config(config: &ProviderConfig) -> Result<Self, FederationError> {
        let issuer_id = IssuerId::new(config.issuer_id.clone())
            .map_err(|e| FederationError::InvalidProvider(e.to_string()))?;
        if config.client_ids.is_empty() {
            return Err(FederationError::InvalidProvider(format!(
                "{issuer_id}: no client ids"
            )));
        }

        let provider = match &config.key {
            ProviderKeyConfig::Hmac { secret } => {
                if secret.is_empty() {
                    return Err(FederationError::InvalidProvider(format!(
                        "{issuer_id}: empty secret"
                    )));
                }
                Self::hmac(
                    issuer_id,
                    &config.issuer_url,
                    config.client_ids.clone(),
                    secret.as_bytes(),
                )
            }
            ProviderKeyConfig::RsaPem { public_key_pem } => Self::rsa_pem(
                issuer_id,
                &config.issuer_url,
                config.client_ids.clone(),
                public_key_pem.as_bytes(),
            )?,
        };
        Ok(provider.with_leeway(config.leeway_secs))
    }

    /// Set clock-skew leeway
    pub fn with_leeway(mut self, leeway_secs: u64) -> Self {
        self.leeway_secs = leeway_secs;
        self
    }

    /// Check whether a client id is accepted
    pub fn accepts_client(&self, client_id: &str) -> bool {
        self.client_ids.iter().any(|c| c == client_id)
    }

    pub(crate) fn decoding_key(&self) -> &DecodingKey {
        &self.key
    }
}

/// Registry of trusted providers
pub struct ProviderRegistry {
    providers: RwLock<HashMap<IssuerId, Arc<RegisteredProvider>>>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            providers: RwLock::new(HashMap::new()),
        }
    }

    /// Build a registry from configuration
    pub fn from_configs(configs: &[ProviderConfig]) -> Result<Self, FederationError> {
        let registry = Self::new();
        for config in configs {
            registry.register(RegisteredProvider::from_config(config)?)?;
        }
        Ok(registry)
    }

    /// Register a provider; returns true when an entry was replaced.
    ///
    /// An issuer URL maps to exactly one issuer id, otherwise resolving a
    /// token by `iss` and by login key could pick different providers.
    pub fn register(&self, provider: RegisteredProvider) -> Result<bool, FederationError> {
        let mut providers = self.providers.write();
        if let Some(existing) = providers
            .values()
            .find(|p| p.issuer_url == provider.issuer_url && p.issuer_id != provider.issuer_id)
        {
            return Err(FederationError::InvalidProvider(format!(
                "{}: issuer url {} is already registered as {}",
                provider.issuer_id, provider.issuer_url, existing.issuer_id
            )));
        }

        info!(
            issuer_id = %provider.issuer_id,
            issuer_url = %provider.issuer_url,
            "Registering identity provider"
        );
        Ok(providers
            .insert(provider.issuer_id.clone(), Arc::new(provider))
            .is_some())
    }

    /// Look up a provider by login key
    pub fn get(&self, issuer_id: &IssuerId) -> Option<Arc<RegisteredProvider>> {
        self.providers.read().get(issuer_id).cloned()
    }

    /// Look up a provider by its `iss` claim
    pub fn find_by_issuer_url(&self, issuer_url: &str) -> Option<Arc<RegisteredProvider>> {
        self.providers
            .read()
            .values()
            .find(|p| p.issuer_url == issuer_url)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.providers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.read().is_empty()
    }
}
