//! Authentication for the gateway
//!
//! `bearer_auth` guards the protected API with identity or access tokens.
//! Storage requests authenticate with federated credentials instead, see
//! [`federated_principal`].

use crate::error::ApiError;
use crate::state::AppState;
use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request, header},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use federa_auth::signing::{self, StorageRequest};
use federa_auth::{SessionClaims, SessionTokenError, TokenUse, VerifiedToken};
use federa_common::Error;
use std::sync::Arc;
use tracing::debug;

/// Access key id header for storage requests
pub const ACCESS_KEY_HEADER: &str = "x-federa-access-key-id";

/// Session token header for storage requests
pub const SECURITY_TOKEN_HEADER: &str = "x-federa-security-token";

/// Request time header, unix seconds
pub const DATE_HEADER: &str = "x-federa-date";

/// Request signature header, see [`federa_auth::signing`]
pub const SIGNATURE_HEADER: &str = "x-federa-signature";

/// Verify the bearer token and enforce the configured scope
pub async fn bearer_auth(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(request.headers()).ok_or(Error::MissingCredentials)?;
    let verified = state.verifier.verify_bearer(token)?;

    if let Some(scope) = &state.api.required_scope {
        check_scope(&verified, scope)?;
    }

    debug!(sub = %verified.claims.sub, token_use = %verified.claims.token_use, "Bearer token accepted");
    request.extensions_mut().insert(verified);
    Ok(next.run(request).await)
}

/// `Authorization: Bearer <jwt>`, or the raw token
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?.trim();
    if value.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = match value.split_once(' ') {
        Some((scheme, rest)) if scheme.eq_ignore_ascii_case("bearer") => rest.trim(),
        _ => value,
    };
    (!token.is_empty()).then_some(token)
}

fn check_scope(verified: &VerifiedToken, scope: &str) -> Result<(), Error> {
    if verified.claims.token_use == TokenUse::Access && verified.claims.has_scope(scope) {
        Ok(())
    } else {
        Err(Error::InsufficientScope(scope.to_string()))
    }
}

/// Recover the principal from federated credential headers.
///
/// The session token is opened first, then the request signature is checked
/// with the secret key bound to that session.
pub fn federated_principal(
    state: &AppState,
    method: &str,
    path: &str,
    prefix: &str,
    headers: &HeaderMap,
) -> Result<SessionClaims, Error> {
    let header_value = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
    };
    let (Some(access_key_id), Some(session_token)) = (
        header_value(ACCESS_KEY_HEADER),
        header_value(SECURITY_TOKEN_HEADER),
    ) else {
        return Err(Error::MissingCredentials);
    };

    let claims = state
        .broker
        .open_session(access_key_id, session_token)
        .map_err(|e| match e {
            SessionTokenError::Expired => Error::ExpiredToken,
            other => Error::not_authorized(other.to_string()),
        })?;

    let (Some(date), Some(signature)) = (header_value(DATE_HEADER), header_value(SIGNATURE_HEADER))
    else {
        return Err(Error::not_authorized("missing request signature"));
    };
    let timestamp = date
        .parse::<i64>()
        .map_err(|_| Error::not_authorized("malformed request date"))?;

    let request = StorageRequest {
        method,
        path,
        prefix,
        timestamp,
    };
    let secret_key = state.broker.secret_key_for(&claims);
    signing::verify(&secret_key, &request, signature, Utc::now().timestamp()).map_err(|e| {
        debug!(access_key_id = %claims.access_key_id, error = %e, "Request signature rejected");
        Error::not_authorized(e.to_string())
    })?;

    Ok(claims)
}
