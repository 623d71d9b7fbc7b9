//! Token issuer
//!
//! Signs identity, access and refresh tokens for directory identities,
//! running the claim augmenter on every issuance. A [`Session`] is produced
//! once at sign-in and passed explicitly to whatever needs it.

use crate::augment::ClaimAugmenter;
use crate::claims::{ClaimSet, Claims, TokenUse};
use crate::directory::{Identity, IdentityDirectory};
use crate::error::{DirectoryError, FederationError, TokenError};
use crate::provider::RegisteredProvider;
use crate::token::verify_with;
use federa_common::IssuerId;
use federa_common::config::IssuerConfig;
use jsonwebtoken::{EncodingKey, Header, encode};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

/// Issuer settings
#[derive(Debug, Clone)]
pub struct IssuerSettings {
    /// `iss` claim
    pub issuer_url: String,
    /// Login key of this issuer
    pub issuer_id: IssuerId,
    /// App client id (`aud` of identity tokens)
    pub client_id: String,
    /// Identity/access token lifetime
    pub token_ttl: Duration,
    /// Refresh token lifetime
    pub refresh_ttl: Duration,
    /// Scopes granted to access tokens
    pub scopes: Vec<String>,
}

impl IssuerSettings {
    pub fn from_config(config: &IssuerConfig) -> Result<Self, FederationError> {
        Ok(Self {
            issuer_url: config.issuer_url.clone(),
            issuer_id: IssuerId::new(config.issuer_id.clone())
                .map_err(|e| FederationError::InvalidProvider(e.to_string()))?,
            client_id: config.client_id.clone(),
            token_ttl: Duration::from_secs(config.token_ttl_secs),
            refresh_ttl: Duration::from_secs(config.refresh_ttl_secs),
            scopes: config.scopes.clone(),
        })
    }
}

/// Tokens issued at sign-in
#[derive(Clone, Serialize)]
pub struct Session {
    /// Signed-in username
    pub username: String,
    /// Subject of every token in the session
    pub sub: String,
    /// Identity token (carries custom claims)
    pub id_token: String,
    /// Access token (carries scopes)
    pub access_token: String,
    /// Refresh token
    pub refresh_token: String,
    /// Expiry of the identity and access tokens (seconds since epoch)
    pub expires_at: u64,
}

impl Session {
    /// Seconds until the identity/access tokens expire
    pub fn expires_in(&self) -> u64 {
        let now = chrono::Utc::now().timestamp().max(0) as u64;
        self.expires_at.saturating_sub(now)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("username", &self.username)
            .field("sub", &self.sub)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// HS256 token issuer backed by an [`IdentityDirectory`]
pub struct TokenIssuer {
    settings: IssuerSettings,
    directory: Arc<IdentityDirectory>,
    augmenter: ClaimAugmenter,
    encoding_key: EncodingKey,
    /// Verifies refresh tokens presented back to this issuer
    self_provider: RegisteredProvider,
}

impl TokenIssuer {
    pub fn new(
        settings: IssuerSettings,
        secret: &[u8],
        directory: Arc<IdentityDirectory>,
        augmenter: ClaimAugmenter,
    ) -> Self {
        let self_provider = RegisteredProvider::hmac(
            settings.issuer_id.clone(),
            settings.issuer_url.clone(),
            vec![settings.client_id.clone()],
            secret,
        );
        Self {
            settings,
            directory,
            augmenter,
            encoding_key: EncodingKey::from_secret(secret),
            self_provider,
        }
    }

    pub fn settings(&self) -> &IssuerSettings {
        &self.settings
    }

    pub fn directory(&self) -> &Arc<IdentityDirectory> {
        &self.directory
    }

    /// Authenticate and issue a fresh session
    pub fn sign_in(&self, username: &str, password: &str) -> Result<Session, FederationError> {
        let identity = self.directory.authenticate(username, password)?;
        let session = self.issue(&identity, None)?;
        info!(username = %identity.username, sub = %identity.sub, "User signed in");
        Ok(session)
    }

    /// Mint new identity and access tokens from a refresh token.
    ///
    /// Claims are re-augmented from the identity's current attributes.
    pub fn refresh(&self, refresh_token: &str) -> Result<Session, FederationError> {
        let verified = verify_with(&self.self_provider, refresh_token, &[TokenUse::Refresh])?;
        let identity = self.directory.get_by_sub(&verified.claims.sub)?;
        if !identity.is_active() {
            return Err(DirectoryError::UserSuspended.into());
        }
        self.issue(&identity, Some(refresh_token.to_string()))
    }

    fn issue(
        &self,
        identity: &Identity,
        refresh_token: Option<String>,
    ) -> Result<Session, FederationError> {
        let iat = chrono::Utc::now().timestamp().max(0) as u64;
        let exp = iat + self.settings.token_ttl.as_secs();

        let mut base = ClaimSet::new();
        base.insert("email".into(), Value::String(identity.email.clone()));
        base.insert("email_verified".into(), Value::Bool(identity.email_verified));
        base.insert("username".into(), Value::String(identity.username.clone()));
        let custom = self.augmenter.augment(base, &identity.attributes)?;

        let id_claims = Claims {
            iss: self.settings.issuer_url.clone(),
            sub: identity.sub.clone(),
            aud: Some(self.settings.client_id.clone()),
            exp,
            iat,
            jti: Some(Uuid::new_v4().to_string()),
            token_use: TokenUse::Id,
            client_id: None,
            scope: None,
            custom,
        };

        let mut access_custom = ClaimSet::new();
        access_custom.insert("username".into(), Value::String(identity.username.clone()));
        let access_claims = Claims {
            aud: None,
            jti: Some(Uuid::new_v4().to_string()),
            token_use: TokenUse::Access,
            client_id: Some(self.settings.client_id.clone()),
            scope: Some(self.settings.scopes.join(" ")),
            custom: access_custom,
            ..id_claims.clone()
        };

        let refresh_token = match refresh_token {
            Some(token) => token,
            None => self.sign(&Claims {
                exp: iat + self.settings.refresh_ttl.as_secs(),
                jti: Some(Uuid::new_v4().to_string()),
                token_use: TokenUse::Refresh,
                custom: ClaimSet::new(),
                ..id_claims.clone()
            })?,
        };

        Ok(Session {
            username: identity.username.clone(),
            sub: identity.sub.clone(),
            id_token: self.sign(&id_claims)?,
            access_token: self.sign(&access_claims)?,
            refresh_token,
            expires_at: exp,
        })
    }

    fn sign(&self, claims: &Claims) -> Result<String, FederationError> {
        encode(&Header::default(), claims, &self.encoding_key)
            .map_err(|e| TokenError::Signing(e.to_string()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::augment::AugmentRule;
    use crate::error::AugmentationError;
    use crate::provider::ProviderRegistry;
    use crate::token::TokenVerifier;
    use serde_json::json;

    const SECRET: &[u8] = b"issuer-secret";

    fn settings() -> IssuerSettings {
        IssuerSettings {
            issuer_url: "https://idp.example.com/pool-1".to_string(),
            issuer_id: IssuerId::new("idp.example.com/pool-1").unwrap(),
            client_id: "web".to_string(),
            token_ttl: Duration::from_secs(3600),
            refresh_ttl: Duration::from_secs(86400),
            scopes: vec!["openid".to_string(), "anycompany/read".to_string()],
        }
    }

    fn issuer_with(rules: Vec<AugmentRule>) -> TokenIssuer {
        let directory = Arc::new(IdentityDirectory::new());
        directory
            .sign_up("alice", "alice@example.com", "pw-alice")
            .unwrap();
        directory.confirm_email("alice").unwrap();
        directory
            .set_attribute("alice", "department", "Engineering")
            .unwrap();
        directory.sign_up("bob", "bob@example.com", "pw-bob").unwrap();

        TokenIssuer::new(
            settings(),
            SECRET,
            directory,
            ClaimAugmenter::new(rules).unwrap(),
        )
    }

    fn verifier() -> TokenVerifier {
        let registry = ProviderRegistry::new();
        registry.register(RegisteredProvider::hmac(
            settings().issuer_id,
            settings().issuer_url,
            vec!["web".to_string()],
            SECRET,
        ))
        .unwrap();
        TokenVerifier::new(Arc::new(registry))
    }

    #[test]
    fn test_identity_token_carries_department() {
        let issuer = issuer_with(vec![AugmentRule::optional("department")]);
        let session = issuer.sign_in("alice", "pw-alice").unwrap();

        let verified = verifier()
            .verify_identity_token(&session.id_token, &settings().issuer_id)
            .unwrap();
        assert_eq!(verified.claims.custom_str("department"), Some("Engineering"));
        assert_eq!(verified.claims.custom["email_verified"], json!(true));
        assert_eq!(verified.claims.exp - verified.claims.iat, 3600);
    }

    #[test]
    fn test_claim_absent_without_attribute() {
        let issuer = issuer_with(vec![AugmentRule::optional("department")]);
        let session = issuer.sign_in("bob", "pw-bob").unwrap();

        let verified = verifier()
            .verify_identity_token(&session.id_token, &settings().issuer_id)
            .unwrap();
        assert!(verified.claims.claim("department").is_none());
    }

    #[test]
    fn test_required_claim_fails_sign_in() {
        let issuer = issuer_with(vec![AugmentRule::required("department")]);
        let err = issuer.sign_in("bob", "pw-bob").unwrap_err();
        assert!(matches!(
            err,
            FederationError::Augmentation(AugmentationError::MissingAttribute(_))
        ));
    }

    #[test]
    fn test_access_token_carries_scopes_only() {
        let issuer = issuer_with(vec![AugmentRule::optional("department")]);
        let session = issuer.sign_in("alice", "pw-alice").unwrap();

        let verified = verifier().verify_bearer(&session.access_token).unwrap();
        assert_eq!(verified.claims.token_use, TokenUse::Access);
        assert!(verified.claims.has_scope("anycompany/read"));
        assert!(verified.claims.claim("department").is_none());
    }

    #[test]
    fn test_bad_password() {
        let issuer = issuer_with(vec![]);
        assert!(matches!(
            issuer.sign_in("alice", "nope"),
            Err(FederationError::Directory(DirectoryError::NotAuthorized))
        ));
    }

    #[test]
    fn test_refresh_reaugments_current_attributes() {
        let issuer = issuer_with(vec![AugmentRule::optional("department")]);
        let session = issuer.sign_in("alice", "pw-alice").unwrap();

        issuer
            .directory()
            .set_attribute("alice", "department", "Legal")
            .unwrap();
        let refreshed = issuer.refresh(&session.refresh_token).unwrap();

        let verified = verifier()
            .verify_identity_token(&refreshed.id_token, &settings().issuer_id)
            .unwrap();
        assert_eq!(verified.claims.custom_str("department"), Some("Legal"));
        assert_eq!(refreshed.refresh_token, session.refresh_token);
    }

    #[test]
    fn test_refresh_rejects_identity_token() {
        let issuer = issuer_with(vec![]);
        let session = issuer.sign_in("alice", "pw-alice").unwrap();
        assert!(matches!(
            issuer.refresh(&session.id_token),
            Err(FederationError::InvalidToken(TokenError::WrongTokenUse { .. }))
        ));
    }

    #[test]
    fn test_session_debug_hides_tokens() {
        let issuer = issuer_with(vec![]);
        let session = issuer.sign_in("alice", "pw-alice").unwrap();
        let debug = format!("{session:?}");
        assert!(!debug.contains(&session.id_token));
        assert!(session.expires_in() > 3500);
    }
}
