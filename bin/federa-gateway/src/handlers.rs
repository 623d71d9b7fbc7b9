//! Request handlers

use crate::auth_middleware::federated_principal;
use crate::error::ApiError;
use crate::state::AppState;
use crate::storage::{ListBucketResult, ListObjectsParams};
use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::{HeaderMap, Method, Uri},
};
use federa_auth::{FederatedCredential, LIST_BUCKET, Session, VerifiedToken};
use federa_common::{BucketName, Error, IssuerId};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{info, warn};

pub async fn health_check() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

#[derive(Debug, Deserialize)]
pub struct SignInRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Serialize)]
pub struct SessionResponse {
    #[serde(flatten)]
    pub session: Session,
    pub expires_in: u64,
}

impl From<Session> for SessionResponse {
    fn from(session: Session) -> Self {
        Self {
            expires_in: session.expires_in(),
            session,
        }
    }
}

pub async fn sign_in(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SignInRequest>,
) -> Result<Json<SessionResponse>, ApiError> {
    let session = state.issuer.sign_in(&request.username, &request.password)?;
    Ok(Json(session.into()))
}

pub async fn refresh(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RefreshRequest>,
) -> Result<Json<SessionResponse>, ApiError> {
    let session = state.issuer.refresh(&request.refresh_token)?;
    Ok(Json(session.into()))
}

#[derive(Debug, Deserialize)]
pub struct ExchangeRequest {
    pub identity_token: String,
    /// Defaults to the built-in issuer
    #[serde(default)]
    pub issuer_id: Option<String>,
}

/// Federation broker exchange
pub async fn exchange_credentials(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ExchangeRequest>,
) -> Result<Json<FederatedCredential>, ApiError> {
    let issuer_id = match request.issuer_id {
        Some(id) => IssuerId::new(id).map_err(Error::from)?,
        None => state.issuer.settings().issuer_id.clone(),
    };
    let credential = state
        .broker
        .exchange(&request.identity_token, &issuer_id)
        .await?;
    Ok(Json(credential))
}

/// Sample protected API
pub async fn list_pets(Extension(token): Extension<VerifiedToken>) -> Json<Value> {
    info!(sub = %token.claims.sub, "Listing pets");
    Json(json!([
        { "id": 1, "type": "dog", "price": 249.99 },
        { "id": 2, "type": "cat", "price": 124.99 },
        { "id": 3, "type": "fish", "price": 0.99 }
    ]))
}

/// List objects under a prefix after the policy allows it
pub async fn list_objects(
    State(state): State<Arc<AppState>>,
    Path(bucket): Path<String>,
    Query(params): Query<ListObjectsParams>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Json<ListBucketResult>, ApiError> {
    let prefix = params.prefix.as_deref().unwrap_or_default();
    let principal = federated_principal(&state, method.as_str(), uri.path(), prefix, &headers)?;

    let bucket = BucketName::new(bucket).map_err(Error::from)?;
    if !state.objects.has_bucket(&bucket) {
        return Err(Error::BucketNotFound(bucket.to_string()).into());
    }

    let explained = state.evaluator.authorize_explained(
        &principal,
        &bucket.resource_class(),
        prefix,
        LIST_BUCKET,
    );
    if !explained.decision.is_allowed() {
        warn!(
            access_key_id = %principal.access_key_id,
            bucket = %bucket,
            prefix,
            decision = ?explained.decision,
            sid = ?explained.sid,
            "Listing denied"
        );
        return Err(Error::AccessDenied.into());
    }

    let result = state
        .objects
        .list(&bucket, &params.scoped_to_segment())
        .ok_or_else(|| Error::BucketNotFound(bucket.to_string()))?;
    Ok(Json(result))
}
