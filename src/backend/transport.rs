//! Backend transport.
//!
//! # Responsibilities
//! - Describe one outbound OData call ([`BackendRequest`])
//! - Perform it with Basic auth, `sap-client` and a per-call timeout
//! - Map network failures onto [`NetworkCode`]s
//!
//! # Design Decisions
//! - Any HTTP response is `Ok`; status interpretation belongs to the executor
//! - The trait is object safe so tests can script backend behaviour

use std::time::{Duration, Instant};
use axum::http::{HeaderMap, Method};
use futures_util::future::BoxFuture;
use serde_json::Value;
use url::Url;

use crate::backend::error::{BackendError, NetworkCode};
use crate::config::BackendConfig;

/// One outbound backend call.
#[derive(Debug, Clone)]
pub struct BackendRequest {
    pub method: Method,
    /// Absolute path on the backend, e.g. "/sap/opu/odata/sap/API_PURCHASEORDER_PROCESS_SRV/A_PurchaseOrder".
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
    pub timeout: Duration,
}

impl BackendRequest {
    pub fn new(method: Method, path: impl Into<String>, timeout: Duration) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
            timeout,
        }
    }

    pub fn get(path: impl Into<String>, timeout: Duration) -> Self {
        Self::new(Method::GET, path, timeout)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Value of the first header with this name, case-insensitive.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A backend HTTP response, fully buffered.
#[derive(Debug, Clone)]
pub struct BackendResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: String,
}

impl BackendResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Parse the body as JSON. An empty body (e.g. 204 after PATCH) is `null`.
    pub fn json(&self) -> Result<Value, BackendError> {
        if self.body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&self.body).map_err(|e| BackendError::Decode(e.to_string()))
    }

    /// Turn a non-2xx response into the matching error.
    pub fn error_for_status(self) -> Result<Self, BackendError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(BackendError::Status {
                status: self.status,
                headers: self.headers,
                body: self.body,
            })
        }
    }
}

/// Performs a single HTTP call against the backend.
pub trait Transport: Send + Sync {
    fn send(&self, request: BackendRequest) -> BoxFuture<'_, Result<BackendResponse, BackendError>>;
}

/// Production transport over `reqwest`.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
    sap_client: Option<String>,
}

impl HttpTransport {
    pub fn new(config: &BackendConfig) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("s4-proxy/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| BackendError::InvalidRequest(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
            sap_client: config.sap_client.clone(),
        })
    }

    fn url_for(&self, request: &BackendRequest) -> Result<Url, BackendError> {
        let mut url = Url::parse(&format!("{}{}", self.base_url, request.path))
            .map_err(|e| BackendError::InvalidRequest(format!("{}: {}", request.path, e)))?;

        if self.sap_client.is_some() || !request.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            if let Some(client) = &self.sap_client {
                pairs.append_pair("sap-client", client);
            }
            for (k, v) in &request.query {
                pairs.append_pair(k, v);
            }
        }
        Ok(url)
    }

    async fn perform(&self, request: BackendRequest) -> Result<BackendResponse, BackendError> {
        let url = self.url_for(&request)?;
        let start = Instant::now();

        let mut builder = self
            .client
            .request(request.method.clone(), url)
            .timeout(request.timeout);
        if !self.username.is_empty() {
            builder = builder.basic_auth(&self.username, Some(&self.password));
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| classify(&e))?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.text().await.map_err(|e| classify(&e))?;

        tracing::debug!(
            method = %request.method,
            path = %request.path,
            status = status,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Backend call finished"
        );

        Ok(BackendResponse { status, headers, body })
    }
}

impl Transport for HttpTransport {
    fn send(&self, request: BackendRequest) -> BoxFuture<'_, Result<BackendResponse, BackendError>> {
        Box::pin(self.perform(request))
    }
}

/// Map a `reqwest` failure onto the backend error taxonomy.
fn classify(err: &reqwest::Error) -> BackendError {
    if err.is_builder() {
        return BackendError::InvalidRequest(err.to_string());
    }
    if err.is_timeout() {
        return BackendError::network(NetworkCode::TimedOut, err.to_string());
    }
    if let Some(code) = io_code(err) {
        return BackendError::network(code, err.to_string());
    }
    if err.is_decode() {
        return BackendError::Decode(err.to_string());
    }
    BackendError::network(NetworkCode::Other, err.to_string())
}

/// Walk the source chain looking for the underlying socket error.
fn io_code(err: &(dyn std::error::Error + 'static)) -> Option<NetworkCode> {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            return match io.kind() {
                std::io::ErrorKind::ConnectionReset => Some(NetworkCode::ConnectionReset),
                std::io::ErrorKind::TimedOut => Some(NetworkCode::TimedOut),
                std::io::ErrorKind::ConnectionRefused => Some(NetworkCode::ConnectionRefused),
                _ => Some(NetworkCode::Other),
            };
        }
        current = e.source();
    }
    None
}
