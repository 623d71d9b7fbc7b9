//! Gateway state
//!
//! Everything is built once at startup from [`Config`] and shared read-only
//! with the handlers. The tag mapping is reconciled before the state is
//! handed out.

use crate::storage::ObjectIndex;
use federa_auth::{
    AccessPolicy, BrokerSettings, ClaimAugmenter, FederationBroker,
    IdentityDirectory, IssuerSettings, LocalMinter, PolicyEvaluator, ProviderRegistry,
    RetryPolicy, SessionSealer, TagMapper, TagMapping, TagMappingConfig, TagMappingTable,
    TokenIssuer, TokenVerifier,
};
use federa_common::config::ApiConfig;
use federa_common::{BucketName, Config, Error, IssuerId, PoolId};
use std::sync::Arc;
use tracing::info;

/// Shared handler state
pub struct AppState {
    pub issuer: TokenIssuer,
    pub verifier: TokenVerifier,
    pub broker: FederationBroker,
    pub evaluator: PolicyEvaluator,
    pub objects: ObjectIndex,
    pub mappings: Arc<TagMappingTable>,
    pub api: ApiConfig,
}

impl AppState {
    /// Build the state and converge the configured tag mapping
    pub async fn build(config: &Config) -> Result<Arc<Self>, Error> {
        config.validate()?;

        let directory = Arc::new(IdentityDirectory::new());
        seed_directory(&directory, config)?;

        let augmenter = ClaimAugmenter::from_config(&config.issuer.augment)
            .map_err(|e| Error::Configuration(e.to_string()))?;
        let issuer = TokenIssuer::new(
            IssuerSettings::from_config(&config.issuer)?,
            config.issuer.signing_secret.as_bytes(),
            directory,
            augmenter,
        );

        let registry = Arc::new(ProviderRegistry::from_configs(&config.effective_providers())?);
        let verifier = TokenVerifier::new(registry);

        let mappings = Arc::new(TagMappingTable::new());
        let mapper = TagMapper::new(mappings.clone(), RetryPolicy::from(&config.reconcile));
        let ack = mapper.apply(&tag_mapping_config(config)?).await?;
        info!(
            pool_id = %ack.pool_id,
            provider = %ack.provider,
            version = ack.version,
            attempts = ack.attempts,
            "Tag mapping reconciled"
        );

        let broker = FederationBroker::new(
            BrokerSettings::from_config(&config.federation)?,
            verifier.clone(),
            mappings.clone(),
            SessionSealer::new(config.federation.session_secret.as_bytes()),
            Arc::new(LocalMinter),
        );

        let evaluator = PolicyEvaluator::new(load_policy(config)?)
            .map_err(|e| Error::Configuration(e.to_string()))?;
        info!(rules = evaluator.rules().count(), "Access policy loaded");

        let objects = ObjectIndex::new();
        let bucket = BucketName::new(config.seed.bucket.clone())?;
        objects.create_bucket(bucket.clone());
        for key in &config.seed.objects {
            objects.put(bucket.clone(), key.clone());
        }

        Ok(Arc::new(Self {
            issuer,
            verifier,
            broker,
            evaluator,
            objects,
            mappings,
            api: config.api.clone(),
        }))
    }
}

/// Mapping desired by the configuration
pub fn tag_mapping_config(config: &Config) -> Result<TagMappingConfig, Error> {
    let pool_id = PoolId::new(config.federation.pool_id.clone())?;
    let provider = IssuerId::new(
        config
            .tag_mapping
            .provider
            .clone()
            .unwrap_or_else(|| config.issuer.issuer_id.clone()),
    )?;
    let mappings = config
        .tag_mapping
        .mappings
        .iter()
        .map(|m| TagMapping::new(m.claim.clone(), m.tag.clone()))
        .collect();

    Ok(TagMappingConfig::new(pool_id, provider, mappings)
        .with_defaults(config.tag_mapping.use_defaults))
}

fn load_policy(config: &Config) -> Result<AccessPolicy, Error> {
    match &config.policy.path {
        Some(path) => {
            let json = std::fs::read_to_string(path).map_err(|e| {
                Error::Configuration(format!("reading policy {}: {e}", path.display()))
            })?;
            AccessPolicy::from_json(&json).map_err(|e| Error::Configuration(e.to_string()))
        }
        None => Ok(AccessPolicy::department_prefix(
            "arn:federa:s3:::*",
            config.policy.tag.clone(),
        )),
    }
}

fn seed_directory(directory: &IdentityDirectory, config: &Config) -> Result<(), Error> {
    for user in &config.seed.users {
        directory
            .sign_up(&user.username, &user.email, &user.password)
            .and_then(|_| directory.confirm_email(&user.username))
            .map_err(|e| Error::Configuration(format!("seeding {}: {e}", user.username)))?;
        for (name, value) in &user.attributes {
            directory
                .set_attribute(&user.username, name, value)
                .map_err(|e| Error::Configuration(format!("seeding {}: {e}", user.username)))?;
        }
    }
    if !config.seed.users.is_empty() {
        info!(users = config.seed.users.len(), "Directory seeded");
    }
    Ok(())
}
