//! Sealed session tokens
//!
//! Format: `base64url(json body) "." hex(HMAC-SHA256(secret, body))`.
//! The storage front door opens the token to recover the principal tags
//! without a lookup.
//!
//! The credential's secret key is never sealed into the token. It is derived
//! from the sealer secret and the token's access key id and expiry, so the
//! front door can recompute it when checking a request signature.

use crate::credential::{PrincipalTagSource, PrincipalTags};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

const SECRET_KEY_CONTEXT: &[u8] = b"federa-secret\n";
const SECRET_KEY_LEN: usize = 40;

/// Body of a session token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    pub access_key_id: String,
    pub sub: String,
    pub role_arn: String,
    pub pool_id: String,
    pub tags: PrincipalTags,
    /// Seconds since epoch
    pub exp: i64,
}

impl PrincipalTagSource for SessionClaims {
    fn principal_tag(&self, name: &str) -> Option<&str> {
        self.tags.get(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionTokenError {
    #[error("malformed session token")]
    Malformed,

    #[error("session token signature mismatch")]
    BadSignature,

    #[error("session token expired")]
    Expired,

    #[error("session token was not issued for this access key")]
    KeyMismatch,
}

/// Seals and opens session tokens with a shared secret
#[derive(Clone)]
pub struct SessionSealer {
    secret: Vec<u8>,
}

impl std::fmt::Debug for SessionSealer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionSealer").finish_non_exhaustive()
    }
}

impl SessionSealer {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    fn mac(&self) -> HmacSha256 {
        HmacSha256::new_from_slice(&self.secret).expect("HMAC accepts any key length")
    }

    /// Secret key bound to `claims`, 40 url-safe characters
    pub fn secret_key_for(&self, claims: &SessionClaims) -> String {
        let mut mac = self.mac();
        mac.update(SECRET_KEY_CONTEXT);
        mac.update(claims.access_key_id.as_bytes());
        mac.update(b"\n");
        mac.update(claims.exp.to_string().as_bytes());

        let mut key = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        key.truncate(SECRET_KEY_LEN);
        key
    }

    pub fn seal(&self, claims: &SessionClaims) -> Result<String, SessionTokenError> {
        let body = serde_json::to_vec(claims).map_err(|_| SessionTokenError::Malformed)?;
        let body = URL_SAFE_NO_PAD.encode(body);

        let mut mac = self.mac();
        mac.update(body.as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());

        Ok(format!("{body}.{signature}"))
    }

    /// Verify the signature, then expiry against `now` (seconds since epoch)
    pub fn open(&self, token: &str, now: i64) -> Result<SessionClaims, SessionTokenError> {
        let (body, signature) = token
            .split_once('.')
            .ok_or(SessionTokenError::Malformed)?;
        let signature = hex::decode(signature).map_err(|_| SessionTokenError::Malformed)?;

        let mut mac = self.mac();
        mac.update(body.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| SessionTokenError::BadSignature)?;

        let body = URL_SAFE_NO_PAD
            .decode(body)
            .map_err(|_| SessionTokenError::Malformed)?;
        let claims: SessionClaims =
            serde_json::from_slice(&body).map_err(|_| SessionTokenError::Malformed)?;

        if now >= claims.exp {
            return Err(SessionTokenError::Expired);
        }
        Ok(claims)
    }

    /// Open a token presented together with its access key id
    pub fn open_for_key(
        &self,
        access_key_id: &str,
        token: &str,
        now: i64,
    ) -> Result<SessionClaims, SessionTokenError> {
        let claims = self.open(token, now)?;
        if claims.access_key_id != access_key_id {
            return Err(SessionTokenError::KeyMismatch);
        }
        Ok(claims)
    }
}
