//! Request signing with federated credentials
//!
//! A storage request is signed with the credential's secret key over the
//! method, path, listing prefix and request time:
//!
//! ```text
//! FEDERA-HMAC-SHA256
//! <unix seconds>
//! <METHOD>
//! <path>
//! <prefix>
//! ```
//!
//! The signature is the lowercase hex HMAC-SHA256 of that string.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNING_ALGORITHM: &str = "FEDERA-HMAC-SHA256";

/// Largest accepted distance between the request time and the server clock
pub const MAX_CLOCK_SKEW_SECS: i64 = 300;

/// The parts of a storage request covered by the signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageRequest<'a> {
    pub method: &'a str,
    pub path: &'a str,
    pub prefix: &'a str,
    /// Seconds since epoch
    pub timestamp: i64,
}

impl StorageRequest<'_> {
    pub fn string_to_sign(&self) -> String {
        format!(
            "{SIGNING_ALGORITHM}\n{}\n{}\n{}\n{}",
            self.timestamp,
            self.method.to_ascii_uppercase(),
            self.path,
            self.prefix
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("malformed request signature")]
    Malformed,

    #[error("request signature does not match")]
    Mismatch,

    #[error("request time is outside the allowed clock skew")]
    Stale,
}

fn mac(secret_key: &str, request: &StorageRequest<'_>) -> HmacSha256 {
    let mut mac =
        HmacSha256::new_from_slice(secret_key.as_bytes()).expect("HMAC accepts any key length");
    mac.update(request.string_to_sign().as_bytes());
    mac
}

/// Sign `request` with a credential's secret key
pub fn sign(secret_key: &str, request: &StorageRequest<'_>) -> String {
    hex::encode(mac(secret_key, request).finalize().into_bytes())
}

/// Check the request time against `now`, then the signature
pub fn verify(
    secret_key: &str,
    request: &StorageRequest<'_>,
    signature: &str,
    now: i64,
) -> Result<(), SignatureError> {
    if (now - request.timestamp).abs() > MAX_CLOCK_SKEW_SECS {
        return Err(SignatureError::Stale);
    }
    let signature = hex::decode(signature).map_err(|_| SignatureError::Malformed)?;
    mac(secret_key, request)
        .verify_slice(&signature)
        .map_err(|_| SignatureError::Mismatch)
}
