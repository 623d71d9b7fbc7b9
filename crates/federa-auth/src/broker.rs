//! Federation broker
//!
//! `exchange` turns a verified identity token into temporary credentials
//! carrying principal tags. The active tag mapping is read from a single
//! snapshot per call. Nothing is retained after the call returns.

use crate::claims::Claims;
use crate::credential::{CredentialMinter, FederatedCredential, MintError, MintRequest, PrincipalTags};
use crate::error::FederationError;
use crate::mapping::TagMappingTable;
use crate::session::{SessionClaims, SessionSealer, SessionTokenError};
use crate::token::TokenVerifier;
use chrono::Utc;
use federa_common::config::FederationConfig;
use federa_common::{IssuerId, PoolId};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Shortest credential lifetime
pub const MIN_CREDENTIAL_TTL: Duration = Duration::from_secs(15 * 60);

/// Longest credential lifetime
pub const MAX_CREDENTIAL_TTL: Duration = Duration::from_secs(12 * 3600);

/// Longest principal tag value
pub const MAX_TAG_VALUE_LEN: usize = 256;

/// Broker settings
#[derive(Debug, Clone)]
pub struct BrokerSettings {
    pub pool_id: PoolId,
    pub role_arn: String,
    /// Clamped to [`MIN_CREDENTIAL_TTL`]..=[`MAX_CREDENTIAL_TTL`]
    pub credential_ttl: Duration,
    pub exchange_timeout: Duration,
}

impl BrokerSettings {
    pub fn new(pool_id: PoolId, role_arn: impl Into<String>) -> Self {
        Self {
            pool_id,
            role_arn: role_arn.into(),
            credential_ttl: Duration::from_secs(3600),
            exchange_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_credential_ttl(mut self, ttl: Duration) -> Self {
        self.credential_ttl = ttl.clamp(MIN_CREDENTIAL_TTL, MAX_CREDENTIAL_TTL);
        self
    }

    pub fn with_exchange_timeout(mut self, timeout: Duration) -> Self {
        self.exchange_timeout = timeout;
        self
    }

    pub fn from_config(config: &FederationConfig) -> Result<Self, FederationError> {
        let pool_id = PoolId::new(config.pool_id.clone())
            .map_err(|e| FederationError::InvalidProvider(format!("pool id: {e}")))?;
        Ok(Self::new(pool_id, config.role_arn.clone())
            .with_credential_ttl(Duration::from_secs(config.credential_ttl_secs))
            .with_exchange_timeout(Duration::from_millis(config.exchange_timeout_ms)))
    }
}

/// Exchanges identity tokens for federated credentials
pub struct FederationBroker {
    settings: BrokerSettings,
    verifier: TokenVerifier,
    mappings: Arc<TagMappingTable>,
    sealer: SessionSealer,
    minter: Arc<dyn CredentialMinter>,
}

impl FederationBroker {
    pub fn new(
        settings: BrokerSettings,
        verifier: TokenVerifier,
        mappings: Arc<TagMappingTable>,
        sealer: SessionSealer,
        minter: Arc<dyn CredentialMinter>,
    ) -> Self {
        Self {
            settings,
            verifier,
            mappings,
            sealer,
            minter,
        }
    }

    pub fn settings(&self) -> &BrokerSettings {
        &self.settings
    }

    /// Exchange an identity token issued by `issuer_id`.
    ///
    /// The whole exchange is bounded by the configured timeout; running out
    /// of time is a [`FederationError::Transient`].
    pub async fn exchange(
        &self,
        identity_token: &str,
        issuer_id: &IssuerId,
    ) -> Result<FederatedCredential, FederationError> {
        tokio::time::timeout(
            self.settings.exchange_timeout,
            self.exchange_inner(identity_token, issuer_id),
        )
        .await
        .map_err(|_| {
            FederationError::Transient(format!(
                "exchange timed out after {}ms",
                self.settings.exchange_timeout.as_millis()
            ))
        })?
    }

    /// Recover the claims sealed into a credential's session token
    pub fn open_session(
        &self,
        access_key_id: &str,
        session_token: &str,
    ) -> Result<SessionClaims, SessionTokenError> {
        self.sealer
            .open_for_key(access_key_id, session_token, Utc::now().timestamp())
    }

    /// Secret key a credential holder signs requests with
    pub fn secret_key_for(&self, claims: &SessionClaims) -> String {
        self.sealer.secret_key_for(claims)
    }

    async fn exchange_inner(
        &self,
        identity_token: &str,
        issuer_id: &IssuerId,
    ) -> Result<FederatedCredential, FederationError> {
        let verified = self.verifier.verify_identity_token(identity_token, issuer_id)?;
        let principal_tags = self.principal_tags(&verified.claims, issuer_id);

        let keys = self
            .minter
            .mint(&MintRequest {
                sub: verified.claims.sub.clone(),
                role_arn: self.settings.role_arn.clone(),
                ttl: self.settings.credential_ttl,
            })
            .await
            .map_err(|e| match e {
                MintError::Unavailable(msg) => FederationError::Transient(msg),
                MintError::Rejected(msg) => FederationError::Internal(msg),
            })?;

        let expiration = Utc::now()
            + chrono::Duration::from_std(self.settings.credential_ttl)
                .map_err(|e| FederationError::Internal(e.to_string()))?;

        let session = SessionClaims {
            access_key_id: keys.access_key_id.clone(),
            sub: verified.claims.sub.clone(),
            role_arn: self.settings.role_arn.clone(),
            pool_id: self.settings.pool_id.to_string(),
            tags: principal_tags.clone(),
            exp: expiration.timestamp(),
        };
        let session_token = self
            .sealer
            .seal(&session)
            .map_err(|e| FederationError::Internal(e.to_string()))?;

        info!(
            issuer_id = %issuer_id,
            sub = %verified.claims.sub,
            access_key_id = %keys.access_key_id,
            tags = principal_tags.len(),
            "Federated credentials issued"
        );

        Ok(FederatedCredential {
            access_key_id: keys.access_key_id,
            secret_key: self.sealer.secret_key_for(&session),
            session_token,
            expiration,
            principal_tags,
        })
    }

    /// Read mapped claims into principal tags; missing claims are skipped
    fn principal_tags(&self, claims: &Claims, issuer_id: &IssuerId) -> PrincipalTags {
        let mut tags = PrincipalTags::new();
        let Some(snapshot) = self.mappings.snapshot(&self.settings.pool_id, issuer_id) else {
            debug!(pool_id = %self.settings.pool_id, issuer_id = %issuer_id, "No tag mapping applied");
            return tags;
        };

        for mapping in &snapshot.active {
            let Some(value) = claims.claim(&mapping.claim) else {
                continue;
            };
            match tag_value(&value) {
                Some(v) => tags.insert(mapping.tag.clone(), v),
                None => warn!(
                    claim = %mapping.claim,
                    tag = %mapping.tag,
                    "Claim value cannot be used as a principal tag, omitting"
                ),
            }
        }
        tags
    }
}

fn tag_value(value: &Value) -> Option<String> {
    let value = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null | Value::Array(_) | Value::Object(_) => return None,
    };
    (value.chars().count() <= MAX_TAG_VALUE_LEN).then_some(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::augment::{AugmentRule, ClaimAugmenter};
    use crate::claims::{ClaimSet, TokenUse};
    use crate::credential::{LocalMinter, MintedKeys, PrincipalTagSource};
    use crate::directory::IdentityDirectory;
    use crate::error::TokenError;
    use crate::issuer::{IssuerSettings, TokenIssuer};
    use crate::mapping::{TagMapping, TagMappingConfig};
    use crate::policy::{AccessPolicy, LIST_BUCKET, PolicyEvaluator};
    use crate::provider::{ProviderRegistry, RegisteredProvider};
    use async_trait::async_trait;
    use jsonwebtoken::{EncodingKey, Header, encode};
    use serde_json::json;

    const SECRET: &[u8] = b"idp-secret";
    const ISSUER_URL: &str = "https://idp.example.com/pool-1";

    fn issuer_id() -> IssuerId {
        IssuerId::new("idp.example.com/pool-1").unwrap()
    }

    fn pool_id() -> PoolId {
        PoolId::new("local:pool").unwrap()
    }

    fn verifier() -> TokenVerifier {
        let registry = ProviderRegistry::new();
        registry.register(RegisteredProvider::hmac(
            issuer_id(),
            ISSUER_URL,
            vec!["web".to_string()],
            SECRET,
        ))
        .unwrap();
        TokenVerifier::new(Arc::new(registry))
    }

    fn department_mapping(table: &TagMappingTable) {
        table
            .replace(&TagMappingConfig::new(
                pool_id(),
                issuer_id(),
                vec![TagMapping::new("department", "department")],
            ))
            .unwrap();
    }

    fn broker_with(minter: Arc<dyn CredentialMinter>) -> (FederationBroker, Arc<TagMappingTable>) {
        let table = Arc::new(TagMappingTable::new());
        department_mapping(&table);
        let broker = FederationBroker::new(
            BrokerSettings::new(pool_id(), "arn:federa:iam::0:role/Authenticated"),
            verifier(),
            table.clone(),
            SessionSealer::new("session-secret"),
            minter,
        );
        (broker, table)
    }

    fn broker() -> (FederationBroker, Arc<TagMappingTable>) {
        broker_with(Arc::new(LocalMinter))
    }

    fn id_token(custom: ClaimSet, exp_offset: i64, secret: &[u8]) -> String {
        let now = Utc::now().timestamp();
        let claims = Claims {
            iss: ISSUER_URL.to_string(),
            sub: "sub-alice".to_string(),
            aud: Some("web".to_string()),
            exp: (now + exp_offset) as u64,
            iat: (now - 10) as u64,
            jti: None,
            token_use: TokenUse::Id,
            client_id: None,
            scope: None,
            custom,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(secret)).unwrap()
    }

    fn department(value: Value) -> ClaimSet {
        ClaimSet::from([("department".to_string(), value)])
    }

    #[tokio::test]
    async fn test_tag_propagation() {
        let (broker, _) = broker();
        let token = id_token(department(json!("Engineering")), 3600, SECRET);

        let credential = broker.exchange(&token, &issuer_id()).await.unwrap();
        assert_eq!(credential.principal_tag("department"), Some("Engineering"));
        assert!(credential.access_key_id.starts_with("ASIA"));
        assert_eq!(credential.secret_key.len(), 40);
        assert!(!credential.is_expired());

        let ttl = credential.expiration - Utc::now();
        assert!(ttl <= chrono::Duration::hours(1));
        assert!(ttl > chrono::Duration::minutes(59));
    }

    #[tokio::test]
    async fn test_missing_claim_omits_tag() {
        let (broker, _) = broker();
        let token = id_token(ClaimSet::new(), 3600, SECRET);

        let credential = broker.exchange(&token, &issuer_id()).await.unwrap();
        assert!(credential.principal_tags.is_empty());
    }

    #[tokio::test]
    async fn test_no_mapping_means_no_tags() {
        let (broker, table) = broker();
        table.remove(&pool_id(), &issuer_id());
        let token = id_token(department(json!("Engineering")), 3600, SECRET);

        let credential = broker.exchange(&token, &issuer_id()).await.unwrap();
        assert!(credential.principal_tags.is_empty());
    }

    #[tokio::test]
    async fn test_tag_value_conversion() {
        let (broker, table) = broker();
        table
            .replace(&TagMappingConfig::new(
                pool_id(),
                issuer_id(),
                vec![
                    TagMapping::new("level", "level"),
                    TagMapping::new("admin", "admin"),
                    TagMapping::new("groups", "groups"),
                    TagMapping::new("note", "note"),
                    TagMapping::new("sub", "subject"),
                ],
            ))
            .unwrap();

        let custom = ClaimSet::from([
            ("level".to_string(), json!(3)),
            ("admin".to_string(), json!(false)),
            ("groups".to_string(), json!(["a", "b"])),
            ("note".to_string(), json!("x".repeat(257))),
        ]);
        let token = id_token(custom, 3600, SECRET);

        let credential = broker.exchange(&token, &issuer_id()).await.unwrap();
        assert_eq!(credential.principal_tag("level"), Some("3"));
        assert_eq!(credential.principal_tag("admin"), Some("false"));
        assert_eq!(credential.principal_tag("subject"), Some("sub-alice"));
        assert_eq!(credential.principal_tag("groups"), None);
        assert_eq!(credential.principal_tag("note"), None);
    }

    #[tokio::test]
    async fn test_untrustworthy_tokens_rejected() {
        let (broker, _) = broker();

        let expired = id_token(department(json!("Engineering")), -3600, SECRET);
        assert!(matches!(
            broker.exchange(&expired, &issuer_id()).await,
            Err(FederationError::InvalidToken(TokenError::Expired))
        ));

        let forged = id_token(department(json!("Engineering")), 3600, b"attacker-secret");
        assert!(matches!(
            broker.exchange(&forged, &issuer_id()).await,
            Err(FederationError::InvalidToken(TokenError::BadSignature))
        ));

        let valid = id_token(department(json!("Engineering")), 3600, SECRET);
        let unknown = IssuerId::new("idp.attacker.com/pool").unwrap();
        assert!(matches!(
            broker.exchange(&valid, &unknown).await,
            Err(FederationError::UntrustedIssuer(_))
        ));
    }

    #[tokio::test]
    async fn test_mapping_update_applies_to_next_exchange() {
        let (broker, table) = broker();
        let custom = ClaimSet::from([
            ("department".to_string(), json!("Engineering")),
            ("team".to_string(), json!("storage")),
        ]);
        let token = id_token(custom, 3600, SECRET);

        table
            .replace(&TagMappingConfig::new(
                pool_id(),
                issuer_id(),
                vec![TagMapping::new("team", "team")],
            ))
            .unwrap();

        let credential = broker.exchange(&token, &issuer_id()).await.unwrap();
        assert_eq!(credential.principal_tag("team"), Some("storage"));
        assert_eq!(credential.principal_tag("department"), None);
    }

    #[tokio::test]
    async fn test_session_token_carries_tags() {
        let (broker, _) = broker();
        let token = id_token(department(json!("Engineering")), 3600, SECRET);
        let credential = broker.exchange(&token, &issuer_id()).await.unwrap();

        let opened = broker
            .open_session(&credential.access_key_id, &credential.session_token)
            .unwrap();
        assert_eq!(opened.principal_tag("department"), Some("Engineering"));
        assert_eq!(opened.sub, "sub-alice");
        assert_eq!(opened.exp, credential.expiration.timestamp());
        assert_eq!(broker.secret_key_for(&opened), credential.secret_key);
        assert!(!credential.session_token.contains(&credential.secret_key));

        assert_eq!(
            broker.open_session("ASIAOTHERKEY00000000", &credential.session_token),
            Err(SessionTokenError::KeyMismatch)
        );
    }

    struct SlowMinter;

    #[async_trait]
    impl CredentialMinter for SlowMinter {
        async fn mint(&self, _request: &MintRequest) -> Result<MintedKeys, MintError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Err(MintError::Unavailable("unreachable".to_string()))
        }
    }

    struct DownMinter;

    #[async_trait]
    impl CredentialMinter for DownMinter {
        async fn mint(&self, _request: &MintRequest) -> Result<MintedKeys, MintError> {
            Err(MintError::Unavailable("throttled".to_string()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_exchange_timeout_is_transient() {
        let (broker, _) = broker_with(Arc::new(SlowMinter));
        let token = id_token(department(json!("Engineering")), 3600, SECRET);

        let err = broker.exchange(&token, &issuer_id()).await.unwrap_err();
        assert!(matches!(err, FederationError::Transient(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_minter_unavailable_is_transient() {
        let (broker, _) = broker_with(Arc::new(DownMinter));
        let token = id_token(department(json!("Engineering")), 3600, SECRET);

        let err = broker.exchange(&token, &issuer_id()).await.unwrap_err();
        assert!(matches!(err, FederationError::Transient(msg) if msg == "throttled"));
    }

    #[test]
    fn test_credential_ttl_clamped() {
        let settings = BrokerSettings::new(pool_id(), "role");
        assert_eq!(
            settings.clone().with_credential_ttl(Duration::from_secs(60)).credential_ttl,
            MIN_CREDENTIAL_TTL
        );
        assert_eq!(
            settings.with_credential_ttl(Duration::from_secs(48 * 3600)).credential_ttl,
            MAX_CREDENTIAL_TTL
        );
    }

    /// alice signs in, exchanges her identity token and lists prefixes
    #[tokio::test]
    async fn test_end_to_end_alice() {
        let directory = Arc::new(IdentityDirectory::new());
        directory
            .sign_up("alice", "alice@example.com", "alice-password")
            .unwrap();
        directory.confirm_email("alice").unwrap();
        directory
            .set_attribute("alice", "department", "Engineering")
            .unwrap();

        let issuer = TokenIssuer::new(
            IssuerSettings {
                issuer_url: ISSUER_URL.to_string(),
                issuer_id: issuer_id(),
                client_id: "web".to_string(),
                token_ttl: Duration::from_secs(3600),
                refresh_ttl: Duration::from_secs(86400),
                scopes: vec!["openid".to_string()],
            },
            SECRET,
            directory,
            ClaimAugmenter::new(vec![AugmentRule::optional("department")]).unwrap(),
        );

        let session = issuer.sign_in("alice", "alice-password").unwrap();
        let (broker, _) = broker();
        let credential = broker.exchange(&session.id_token, &issuer_id()).await.unwrap();
        assert_eq!(credential.principal_tag("department"), Some("Engineering"));

        let bucket = "arn:federa:s3:::anycompany-bucket";
        let evaluator =
            PolicyEvaluator::new(AccessPolicy::department_prefix(bucket, "department")).unwrap();
        assert!(
            evaluator
                .authorize(&credential, bucket, "Engineering/", LIST_BUCKET)
                .is_allowed()
        );
        assert!(
            !evaluator
                .authorize(&credential, bucket, "Legal/", LIST_BUCKET)
                .is_allowed()
        );
    }
}
