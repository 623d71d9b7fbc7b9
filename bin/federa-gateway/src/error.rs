//! HTTP error responses
//!
//! Every failure leaves the gateway as `{"code": ..., "message": ...}` with
//! the status taken from [`federa_common::Error::http_status_code`].

use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use federa_auth::FederationError;
use serde::Serialize;
use tracing::error;

/// Suggested client backoff for retryable failures
const RETRY_AFTER_SECS: &str = "1";

/// Error returned by handlers and middleware
#[derive(Debug)]
pub struct ApiError(pub federa_common::Error);

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!(error = %self.0, "Request failed");
        }

        let body = ErrorBody {
            code: self.0.error_code(),
            message: self.0.to_string(),
        };
        let mut response = (status, Json(body)).into_response();
        if self.0.is_retryable() {
            response.headers_mut().insert(
                header::RETRY_AFTER,
                HeaderValue::from_static(RETRY_AFTER_SECS),
            );
        }
        response
    }
}

impl From<federa_common::Error> for ApiError {
    fn from(err: federa_common::Error) -> Self {
        Self(err)
    }
}

impl From<FederationError> for ApiError {
    fn from(err: FederationError) -> Self {
        Self(err.into())
    }
}
