//! Federa Gateway
//!
//! HTTP front door for the identity broker: sign-in against the built-in
//! issuer, credential exchange, a bearer-protected sample API and storage
//! listing guarded by the access policy.

pub mod auth_middleware;
pub mod error;
pub mod handlers;
pub mod state;
pub mod storage;

use auth_middleware::bearer_auth;
use axum::{
    Router,
    http::StatusCode,
    middleware,
    routing::{get, post},
};
use config::{Environment, File};
use federa_common::Config;
use state::AppState;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

pub use state::tag_mapping_config;

/// Build the HTTP router
pub fn router(state: Arc<AppState>, request_timeout: Duration) -> Router {
    let protected = Router::new()
        .route("/api/pets", get(handlers::list_pets))
        .route_layer(middleware::from_fn_with_state(state.clone(), bearer_auth));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/auth/sign-in", post(handlers::sign_in))
        .route("/auth/refresh", post(handlers::refresh))
        .route("/federation/credentials", post(handlers::exchange_credentials))
        .route("/storage/{bucket}", get(handlers::list_objects))
        .merge(protected)
        .layer(cors)
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            request_timeout,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Load configuration from an optional TOML file, then `FEDERA__*` variables
pub fn load_config(path: Option<&Path>) -> Result<Config, config::ConfigError> {
    let mut builder = config::Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(File::from(path).required(true));
    }
    builder
        .add_source(
            Environment::with_prefix("FEDERA")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("issuer.scopes")
                .with_list_parse_key("seed.objects"),
        )
        .build()?
        .try_deserialize()
}
