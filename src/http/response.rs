//! Error responses.
//!
//! # Responsibilities
//! - Map backend errors to appropriate HTTP status codes
//! - Surface the OData error message instead of the raw envelope
//!
//! # Mapping
//! ```text
//! backend HTTP status    → same status
//! timeout (call/token)   → 504 Gateway Timeout
//! other network failure  → 502 Bad Gateway
//! token fetch failure    → backend status if any, else 502
//! invalid request        → 400 Bad Request
//! ```

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::backend::error::{BackendError, NetworkCode};
use crate::odata;

/// Errors a proxy handler can return.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("unknown service '{0}'")]
    UnknownService(String),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Serialize)]
struct ErrorDetail {
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    backend_status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'static str>,
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::UnknownService(_) => StatusCode::NOT_FOUND,
            ApiError::Backend(e) => backend_status_code(e),
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Backend(BackendError::Status { body, .. }) => {
                odata::error_message(body).unwrap_or_else(|| self.to_string())
            }
            ApiError::Backend(BackendError::TokenFetch { service, source }) => {
                format!("failed to obtain CSRF token for '{}': {}", service, source)
            }
            other => other.to_string(),
        }
    }
}

fn backend_status_code(err: &BackendError) -> StatusCode {
    if let Some(status) = err.http_status() {
        return StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
    }
    match err {
        BackendError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        _ if err.network_code() == Some(NetworkCode::TimedOut) => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::BAD_GATEWAY,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let (backend_status, code) = match &self {
            ApiError::Backend(e) => (e.http_status(), e.network_code().map(|c| c.as_str())),
            ApiError::UnknownService(_) => (None, None),
        };

        if status.is_server_error() {
            tracing::error!(status = %status, error = %self, "Request failed");
        } else {
            tracing::debug!(status = %status, error = %self, "Request rejected");
        }

        let body = ErrorBody {
            error: ErrorDetail {
                message: self.message(),
                backend_status,
                code,
            },
        };
        (status, Json(body)).into_response()
    }
}
