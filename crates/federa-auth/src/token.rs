//! Identity token verification
//!
//! One verifier backs both trust checks: the federation exchange (caller
//! names the issuer) and the gateway authorizer (issuer resolved from the
//! token's own `iss`).

use crate::claims::{Claims, TokenUse};
use crate::error::{FederationError, TokenError};
use crate::provider::{ProviderRegistry, RegisteredProvider};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use federa_common::IssuerId;
use jsonwebtoken::{Validation, decode, decode_header};
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

/// A token whose signature, expiry, issuer and audience have been checked
#[derive(Debug, Clone)]
pub struct VerifiedToken {
    /// Provider that issued the token
    pub issuer_id: IssuerId,
    /// Verified claims
    pub claims: Claims,
}

/// Verifies bearer tokens against the provider registry
#[derive(Clone)]
pub struct TokenVerifier {
    registry: Arc<ProviderRegistry>,
}

impl TokenVerifier {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    /// Verify an identity token issued by a named provider
    pub fn verify_identity_token(
        &self,
        token: &str,
        issuer_id: &IssuerId,
    ) -> Result<VerifiedToken, FederationError> {
        let provider = self
            .registry
            .get(issuer_id)
            .ok_or_else(|| FederationError::UntrustedIssuer(issuer_id.to_string()))?;
        verify_with(&provider, token, &[TokenUse::Id])
    }

    /// Verify an identity or access token presented as a bearer credential,
    /// resolving the provider from the token's `iss` claim
    pub fn verify_bearer(&self, token: &str) -> Result<VerifiedToken, FederationError> {
        let issuer = peek_issuer(token)?;
        let provider = self
            .registry
            .find_by_issuer_url(&issuer)
            .ok_or(FederationError::UntrustedIssuer(issuer))?;
        verify_with(&provider, token, &[TokenUse::Id, TokenUse::Access])
    }
}

/// Verify a token against one provider, accepting the listed token kinds
pub fn verify_with(
    provider: &RegisteredProvider,
    token: &str,
    accepted: &[TokenUse],
) -> Result<VerifiedToken, FederationError> {
    let header = decode_header(token).map_err(|e| TokenError::Malformed(e.to_string()))?;
    if header.alg != provider.algorithm {
        return Err(TokenError::AlgorithmMismatch {
            expected: format!("{:?}", provider.algorithm),
            actual: format!("{:?}", header.alg),
        }
        .into());
    }

    // The issuer is checked before the signature so a token minted by
    // another provider is reported as untrusted rather than tampered.
    let issuer = peek_issuer(token)?;
    if issuer != provider.issuer_url {
        return Err(FederationError::UntrustedIssuer(issuer));
    }

    let mut validation = Validation::new(provider.algorithm);
    validation.leeway = provider.leeway_secs;
    validation.validate_exp = true;
    validation.validate_aud = false;
    validation.set_issuer(&[provider.issuer_url.as_str()]);
    validation.set_required_spec_claims(&["exp", "iss", "sub"]);

    let claims = decode::<Claims>(token, provider.decoding_key(), &validation)
        .map_err(TokenError::from)?
        .claims;

    if !accepted.contains(&claims.token_use) {
        return Err(TokenError::WrongTokenUse {
            expected: accepted
                .iter()
                .map(TokenUse::as_str)
                .collect::<Vec<_>>()
                .join("|"),
            actual: claims.token_use.to_string(),
        }
        .into());
    }

    let client = match claims.token_use {
        TokenUse::Access => claims.client_id.as_deref(),
        TokenUse::Id | TokenUse::Refresh => claims.aud.as_deref(),
    }
    .ok_or_else(|| TokenError::MissingClaim("aud".to_string()))?;
    if !provider.accepts_client(client) {
        return Err(TokenError::AudienceMismatch(client.to_string()).into());
    }

    let now = chrono::Utc::now().timestamp().max(0) as u64;
    if claims.iat > now + provider.leeway_secs {
        return Err(TokenError::NotYetValid.into());
    }

    debug!(
        issuer_id = %provider.issuer_id,
        sub = %claims.sub,
        token_use = %claims.token_use,
        "Token verified"
    );

    Ok(VerifiedToken {
        issuer_id: provider.issuer_id.clone(),
        claims,
    })
}

#[derive(Deserialize)]
struct IssuerOnly {
    iss: Option<String>,
}

/// Read the `iss` claim without verifying the signature
fn peek_issuer(token: &str) -> Result<String, TokenError> {
    let mut parts = token.split('.');
    let payload = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(_), Some(payload), Some(_), None) => payload,
        _ => {
            return Err(TokenError::Malformed(
                "JWT must have 3 parts separated by dots".into(),
            ));
        }
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|e| TokenError::Malformed(format!("failed to decode payload: {e}")))?;
    let claims: IssuerOnly = serde_json::from_slice(&bytes)
        .map_err(|e| TokenError::Malformed(format!("failed to parse claims: {e}")))?;

    claims
        .iss
        .filter(|iss| !iss.is_empty())
        .ok_or_else(|| TokenError::MissingClaim("iss".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claims::ClaimSet;
    use jsonwebtoken::{EncodingKey, Header, encode};
    use serde_json::json;

    const ISSUER_URL: &str = "https://idp.example.com/pool-1";
    const SECRET: &[u8] = b"pool-1-signing-secret";

    fn issuer_id() -> IssuerId {
        IssuerId::new("idp.example.com/pool-1").unwrap()
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

    fn now() -> u64 {
        chrono::Utc::now().timestamp() as u64
    }

    fn claims(token_use: TokenUse) -> Claims {
        let mut custom = ClaimSet::new();
        custom.insert("department".into(), json!("Engineering"));
        Claims {
            iss: ISSUER_URL.to_string(),
            sub: "sub-alice".to_string(),
            aud: (token_use != TokenUse::Access).then(|| "web".to_string()),
            exp: now() + 3600,
            iat: now(),
            jti: None,
            token_use,
            client_id: (token_use == TokenUse::Access).then(|| "web".to_string()),
            scope: (token_use == TokenUse::Access).then(|| "openid".to_string()),
            custom,
        }
    }

    fn sign(claims: &Claims, secret: &[u8]) -> String {
        encode(&Header::default(), claims, &EncodingKey::from_secret(secret)).unwrap()
    }

    #[test]
    fn test_valid_identity_token() {
        let token = sign(&claims(TokenUse::Id), SECRET);
        let verified = verifier()
            .verify_identity_token(&token, &issuer_id())
            .unwrap();
        assert_eq!(verified.claims.sub, "sub-alice");
        assert_eq!(verified.claims.custom_str("department"), Some("Engineering"));
        assert_eq!(verified.issuer_id, issuer_id());
    }

    #[test]
    fn test_expired_token_rejected() {
        let mut expired = claims(TokenUse::Id);
        expired.iat = now() - 7200;
        expired.exp = now() - 3600;
        let token = sign(&expired, SECRET);

        let err = verifier()
            .verify_identity_token(&token, &issuer_id())
            .unwrap_err();
        assert!(matches!(
            err,
            FederationError::InvalidToken(TokenError::Expired)
        ));
    }

    #[test]
    fn test_tampered_signature_rejected() {
        let token = sign(&claims(TokenUse::Id), SECRET);
        let (head, sig) = token.rsplit_once('.').unwrap();
        let flipped = if sig.starts_with('A') { "B" } else { "A" };
        let tampered = format!("{head}.{flipped}{}", &sig[1..]);

        let err = verifier()
            .verify_identity_token(&tampered, &issuer_id())
            .unwrap_err();
        assert!(matches!(err, FederationError::InvalidToken(_)));
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let token = sign(&claims(TokenUse::Id), SECRET);
        let mut forged = claims(TokenUse::Id);
        forged.custom.insert("department".into(), json!("Legal"));
        let forged_payload = sign(&forged, b"attacker").split('.').nth(1).unwrap().to_string();
        let parts: Vec<&str> = token.split('.').collect();
        let tampered = format!("{}.{}.{}", parts[0], forged_payload, parts[2]);

        let err = verifier()
            .verify_identity_token(&tampered, &issuer_id())
            .unwrap_err();
        assert!(matches!(
            err,
            FederationError::InvalidToken(TokenError::BadSignature)
        ));
    }

    #[test]
    fn test_unregistered_issuer_id_rejected() {
        let token = sign(&claims(TokenUse::Id), SECRET);
        let err = verifier()
            .verify_identity_token(&token, &IssuerId::new("idp.evil.com/pool").unwrap())
            .unwrap_err();
        assert!(matches!(err, FederationError::UntrustedIssuer(_)));
    }

    #[test]
    fn test_token_from_other_issuer_rejected() {
        let mut foreign = claims(TokenUse::Id);
        foreign.iss = "https://idp.evil.com/pool".to_string();
        let token = sign(&foreign, b"evil-secret");

        let err = verifier()
            .verify_identity_token(&token, &issuer_id())
            .unwrap_err();
        assert!(matches!(err, FederationError::UntrustedIssuer(_)));

        let err = verifier().verify_bearer(&token).unwrap_err();
        assert!(matches!(err, FederationError::UntrustedIssuer(_)));
    }

    #[test]
    fn test_wrong_audience_rejected() {
        let mut other_client = claims(TokenUse::Id);
        other_client.aud = Some("mobile".to_string());
        let token = sign(&other_client, SECRET);

        let err = verifier()
            .verify_identity_token(&token, &issuer_id())
            .unwrap_err();
        assert!(matches!(
            err,
            FederationError::InvalidToken(TokenError::AudienceMismatch(_))
        ));
    }

    #[test]
    fn test_access_token_cannot_be_exchanged() {
        let token = sign(&claims(TokenUse::Access), SECRET);
        let err = verifier()
            .verify_identity_token(&token, &issuer_id())
            .unwrap_err();
        assert!(matches!(
            err,
            FederationError::InvalidToken(TokenError::WrongTokenUse { .. })
        ));

        // ...but is accepted as a bearer credential
        assert!(verifier().verify_bearer(&token).is_ok());
    }

    #[test]
    fn test_refresh_token_not_a_bearer() {
        let token = sign(&claims(TokenUse::Refresh), SECRET);
        assert!(verifier().verify_bearer(&token).is_err());
    }

    #[test]
    fn test_algorithm_mismatch_rejected() {
        let token = encode(
            &Header::new(jsonwebtoken::Algorithm::HS512),
            &claims(TokenUse::Id),
            &EncodingKey::from_secret(SECRET),
        )
        .unwrap();
        let err = verifier()
            .verify_identity_token(&token, &issuer_id())
            .unwrap_err();
        assert!(matches!(
            err,
            FederationError::InvalidToken(TokenError::AlgorithmMismatch { .. })
        ));
    }

    #[test]
    fn test_garbage_rejected() {
        for token in ["", "abc", "a.b", "a.b.c.d", "a.!!!.c"] {
            assert!(verifier().verify_bearer(token).is_err(), "{token}");
        }
    }

    #[test]
    fn test_both_paths_agree() {
        let token = sign(&claims(TokenUse::Id), SECRET);
        let exchange = verifier().verify_identity_token(&token, &issuer_id());
        let bearer = verifier().verify_bearer(&token);
        assert_eq!(exchange.is_ok(), bearer.is_ok());
        assert_eq!(exchange.unwrap().claims, bearer.unwrap().claims);
    }

    #[test]
    fn test_rs256_provider() {
        let registry = ProviderRegistry::new();
        registry
            .register(
                RegisteredProvider::rsa_pem(
                    issuer_id(),
                    ISSUER_URL,
                    vec!["web".to_string()],
                    include_bytes!("../testdata/rs256_public.pem"),
                )
                .unwrap(),
            )
            .unwrap();
        let verifier = TokenVerifier::new(Arc::new(registry));

        let key = EncodingKey::from_rsa_pem(include_bytes!("../testdata/rs256_private.pem")).unwrap();
        let token = encode(
            &Header::new(jsonwebtoken::Algorithm::RS256),
            &claims(TokenUse::Id),
            &key,
        )
        .unwrap();

        let verified = verifier.verify_identity_token(&token, &issuer_id()).unwrap();
        assert_eq!(verified.claims.custom_str("department"), Some("Engineering"));
        assert!(verifier.verify_bearer(&token).is_ok());

        // An HS256 token under the RSA provider is an algorithm mismatch
        let hs256 = sign(&claims(TokenUse::Id), SECRET);
        assert!(matches!(
            verifier.verify_identity_token(&hs256, &issuer_id()),
            Err(FederationError::InvalidToken(TokenError::AlgorithmMismatch { .. }))
        ));
    }
}
