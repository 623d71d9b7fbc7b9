//! Token claim structures
//!
//! Identity, access and refresh tokens share one claim layout: the
//! registered claims plus a flattened map of issuer-defined claims
//! (`email`, `username`, and whatever the augmenter injected).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Issuer-defined claims keyed by claim name
pub type ClaimSet = BTreeMap<String, Value>;

/// Claim names the augmenter may never write
pub const RESERVED_CLAIMS: &[&str] = &[
    "iss",
    "sub",
    "aud",
    "exp",
    "iat",
    "nbf",
    "jti",
    "token_use",
    "client_id",
    "scope",
];

/// Kind of token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenUse {
    /// Asserts who the user is, carries custom claims
    Id,
    /// Asserts granted scopes
    Access,
    /// Mints new identity/access tokens
    Refresh,
}

impl TokenUse {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenUse::Id => "id",
            TokenUse::Access => "access",
            TokenUse::Refresh => "refresh",
        }
    }
}

impl fmt::Display for TokenUse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Claims carried by every token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Issuer URL
    pub iss: String,
    /// Subject (stable identity id)
    pub sub: String,
    /// Audience, the app client id (identity and refresh tokens)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
    /// Expiration time (seconds since epoch)
    pub exp: u64,
    /// Issued at (seconds since epoch)
    pub iat: u64,
    /// Token ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
    /// Token kind
    pub token_use: TokenUse,
    /// App client id (access tokens)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Space-separated scopes (access tokens)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Issuer-defined claims
    #[serde(flatten)]
    pub custom: ClaimSet,
}

impl Claims {
    /// Look up a claim by name, registered claims included.
    pub fn claim(&self, name: &str) -> Option<Value> {
        match name {
            "iss" => Some(Value::String(self.iss.clone())),
            "sub" => Some(Value::String(self.sub.clone())),
            "aud" => self.aud.clone().map(Value::String),
            "exp" => Some(Value::from(self.exp)),
            "iat" => Some(Value::from(self.iat)),
            "jti" => self.jti.clone().map(Value::String),
            "token_use" => Some(Value::String(self.token_use.as_str().to_string())),
            "client_id" => self.client_id.clone().map(Value::String),
            "scope" => self.scope.clone().map(Value::String),
            _ => self.custom.get(name).cloned(),
        }
    }

    /// Look up a string-valued custom claim
    pub fn custom_str(&self, name: &str) -> Option<&str> {
        self.custom.get(name).and_then(Value::as_str)
    }

    /// Parse scopes from the space-separated `scope` claim
    pub fn scopes(&self) -> Vec<&str> {
        self.scope
            .as_deref()
            .map(|s| s.split_whitespace().collect())
            .unwrap_or_default()
    }

    /// Check whether the token grants a scope
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes().contains(&scope)
    }
}

/// Check whether a claim name is reserved
pub fn is_reserved_claim(name: &str) -> bool {
    RESERVED_CLAIMS.contains(&name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Claims {
        let mut custom = ClaimSet::new();
        custom.insert("department".to_string(), json!("Engineering"));
        custom.insert("level".to_string(), json!(3));
        Claims {
            iss: "https://idp.example.com/pool".to_string(),
            sub: "8c1e".to_string(),
            aud: Some("web".to_string()),
            exp: 2_000_000_000,
            iat: 1_999_996_400,
            jti: None,
            token_use: TokenUse::Id,
            client_id: None,
            scope: None,
            custom,
        }
    }

    #[test]
    fn test_flattened_serialization() {
        let value = serde_json::to_value(sample()).unwrap();
        assert_eq!(value["department"], "Engineering");
        assert_eq!(value["token_use"], "id");
        assert!(value.get("scope").is_none());

        let back: Claims = serde_json::from_value(value).unwrap();
        assert_eq!(back.custom_str("department"), Some("Engineering"));
        assert_eq!(back, sample());
    }

    #[test]
    fn test_claim_lookup() {
        let claims = sample();
        assert_eq!(claims.claim("sub"), Some(json!("8c1e")));
        assert_eq!(claims.claim("aud"), Some(json!("web")));
        assert_eq!(claims.claim("level"), Some(json!(3)));
        assert_eq!(claims.claim("client_id"), None);
        assert_eq!(claims.claim("missing"), None);
    }

    #[test]
    fn test_scopes() {
        let mut claims = sample();
        claims.scope = Some("openid anycompany/read".to_string());
        assert!(claims.has_scope("anycompany/read"));
        assert!(!claims.has_scope("anycompany/write"));
    }

    #[test]
    fn test_reserved_claims() {
        assert!(is_reserved_claim("sub"));
        assert!(is_reserved_claim("token_use"));
        assert!(!is_reserved_claim("department"));
    }
}
