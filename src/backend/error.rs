//! Backend error taxonomy.
//!
//! Every failure talking to S/4HANA ends up as a [`BackendError`]. The
//! retry executor only looks at [`BackendError::is_transient`]; everything
//! else passes through untouched so callers can still see the original
//! status or network code.

use std::fmt;
use axum::http::HeaderMap;

/// Network-level failure codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkCode {
    /// Peer reset the connection.
    ConnectionReset,
    /// Connect or request deadline elapsed.
    TimedOut,
    /// Nothing listening on the other side.
    ConnectionRefused,
    Other,
}

impl NetworkCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkCode::ConnectionReset => "ECONNRESET",
            NetworkCode::TimedOut => "ETIMEDOUT",
            NetworkCode::ConnectionRefused => "ECONNREFUSED",
            NetworkCode::Other => "EOTHER",
        }
    }
}

impl fmt::Display for NetworkCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced by the backend execution layer.
///
/// `Clone` so a single failed CSRF refresh can be handed to every waiter.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    /// The call never produced an HTTP response.
    #[error("backend network error ({code}): {message}")]
    Network { code: NetworkCode, message: String },

    /// The backend answered with a non-2xx status.
    #[error("backend responded with HTTP {status}")]
    Status {
        status: u16,
        headers: HeaderMap,
        body: String,
    },

    /// No CSRF token could be obtained for a service.
    #[error("failed to obtain CSRF token for '{service}'")]
    TokenFetch {
        service: String,
        #[source]
        source: Box<BackendError>,
    },

    /// Token fetch succeeded at HTTP level but the token header was absent.
    #[error("backend did not return an x-csrf-token header")]
    MissingToken,

    /// The request could not be built (bad URL, header value, ...).
    #[error("invalid backend request: {0}")]
    InvalidRequest(String),

    /// The response body was not what we expected.
    #[error("failed to decode backend response: {0}")]
    Decode(String),

    /// A background task driving the call panicked or was cancelled.
    #[error("backend call aborted: {0}")]
    Aborted(String),
}

impl BackendError {
    pub fn network(code: NetworkCode, message: impl Into<String>) -> Self {
        BackendError::Network {
            code,
            message: message.into(),
        }
    }

    pub fn status(status: u16, body: impl Into<String>) -> Self {
        BackendError::Status {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// Connection reset, timeout, or a 5xx. Everything else is terminal.
    pub fn is_transient(&self) -> bool {
        match self {
            BackendError::Network { code, .. } => {
                matches!(code, NetworkCode::ConnectionReset | NetworkCode::TimedOut)
            }
            BackendError::Status { status, .. } => (500..=599).contains(status),
            _ => false,
        }
    }

    /// HTTP status of the failure, looking through token fetch wrappers.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            BackendError::Status { status, .. } => Some(*status),
            BackendError::TokenFetch { source, .. } => source.http_status(),
            _ => None,
        }
    }

    /// Network code of the failure, looking through token fetch wrappers.
    pub fn network_code(&self) -> Option<NetworkCode> {
        match self {
            BackendError::Network { code, .. } => Some(*code),
            BackendError::TokenFetch { source, .. } => source.network_code(),
            _ => None,
        }
    }

    /// True when S/4HANA rejected a write because the CSRF token was not accepted.
    pub fn is_csrf_rejection(&self) -> bool {
        match self {
            BackendError::Status { status: 403, headers, .. } => headers
                .get("x-csrf-token")
                .and_then(|v| v.to_str().ok())
                .map(|v| v.eq_ignore_ascii_case("required"))
                .unwrap_or(false),
            _ => false,
        }
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            BackendError::Network { .. } => "network",
            BackendError::Status { .. } => "status",
            BackendError::TokenFetch { .. } => "token_fetch",
            BackendError::MissingToken => "missing_token",
            BackendError::InvalidRequest(_) => "invalid_request",
            BackendError::Decode(_) => "decode",
            BackendError::Aborted(_) => "aborted",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_transient_classification() {
        assert!(BackendError::network(NetworkCode::ConnectionReset, "reset").is_transient());
        assert!(BackendError::network(NetworkCode::TimedOut, "timeout").is_transient());
        assert!(BackendError::status(500, "").is_transient());
        assert!(BackendError::status(503, "").is_transient());
        assert!(BackendError::status(599, "").is_transient());

        assert!(!BackendError::network(NetworkCode::ConnectionRefused, "refused").is_transient());
        assert!(!BackendError::network(NetworkCode::Other, "dns").is_transient());
        assert!(!BackendError::status(404, "").is_transient());
        assert!(!BackendError::status(429, "").is_transient());
        assert!(!BackendError::status(600, "").is_transient());
        assert!(!BackendError::MissingToken.is_transient());
    }

    #[test]
    fn test_token_fetch_exposes_inner_status_and_code() {
        let err = BackendError::TokenFetch {
            service: "/sap/opu/odata/sap/API_PURCHASEORDER_PROCESS_SRV".into(),
            source: Box::new(BackendError::status(401, "unauthorized")),
        };
        assert_eq!(err.http_status(), Some(401));
        assert!(!err.is_transient());

        let err = BackendError::TokenFetch {
            service: "/x".into(),
            source: Box::new(BackendError::network(NetworkCode::TimedOut, "slow")),
        };
        assert_eq!(err.network_code(), Some(NetworkCode::TimedOut));
    }

    #[test]
    fn test_csrf_rejection_detection() {
        let mut headers = HeaderMap::new();
        headers.insert("x-csrf-token", HeaderValue::from_static("Required"));
        let rejected = BackendError::Status {
            status: 403,
            headers,
            body: "CSRF token validation failed".into(),
        };
        assert!(rejected.is_csrf_rejection());

        assert!(!BackendError::status(403, "forbidden").is_csrf_rejection());
    }
}
