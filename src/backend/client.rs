//! S/4HANA OData client.
//!
//! # Responsibilities
//! - Build reads and writes against a service path + entity path
//! - Attach CSRF token and session cookies to writes
//! - Recover once from a rejected (expired server-side) CSRF token
//! - Return simplified JSON

use std::sync::Arc;
use axum::http::Method;
use serde_json::Value;

use crate::backend::error::BackendError;
use crate::backend::transport::BackendRequest;
use crate::config::TimeoutConfig;
use crate::csrf::{CsrfToken, CsrfTokenCache, CSRF_HEADER};
use crate::odata;
use crate::resilience::RequestExecutor;

/// Entry point handlers use to talk to S/4HANA.
pub struct S4Client {
    executor: Arc<RequestExecutor>,
    tokens: CsrfTokenCache,
    timeouts: TimeoutConfig,
}

impl S4Client {
    pub fn new(executor: Arc<RequestExecutor>, tokens: CsrfTokenCache, timeouts: TimeoutConfig) -> Self {
        Self {
            executor,
            tokens,
            timeouts,
        }
    }

    pub fn tokens(&self) -> &CsrfTokenCache {
        &self.tokens
    }

    /// GET an entity set or entity. `query` is forwarded as-is (`$filter`, `$expand`, ...).
    pub async fn read(
        &self,
        service: &str,
        entity: &str,
        query: &[(String, String)],
    ) -> Result<Value, BackendError> {
        let mut request = BackendRequest::get(entity_path(service, entity), self.timeouts.read())
            .header("accept", "application/json");
        for (k, v) in query {
            request = request.query(k.as_str(), v.as_str());
        }
        if !query.iter().any(|(k, _)| k == "$format") {
            request = request.query("$format", "json");
        }

        let response = self.executor.send(&request).await?;
        Ok(odata::simplify(response.json()?))
    }

    pub async fn create(&self, service: &str, entity: &str, body: Value) -> Result<Value, BackendError> {
        self.write(Method::POST, service, entity, Some(body)).await
    }

    pub async fn update(&self, service: &str, entity: &str, body: Value) -> Result<Value, BackendError> {
        self.write(Method::PATCH, service, entity, Some(body)).await
    }

    pub async fn delete(&self, service: &str, entity: &str) -> Result<Value, BackendError> {
        self.write(Method::DELETE, service, entity, None).await
    }

    async fn write(
        &self,
        method: Method,
        service: &str,
        entity: &str,
        body: Option<Value>,
    ) -> Result<Value, BackendError> {
        let token = self.tokens.get(service).await?;
        match self.write_once(&method, service, entity, &token, body.clone()).await {
            Err(e) if e.is_csrf_rejection() => {
                tracing::warn!(
                    service = %service,
                    method = %method,
                    "CSRF token rejected by backend, refetching and retrying once"
                );
                self.tokens.invalidate_rejected(service, &token);
                let token = self.tokens.get(service).await?;
                self.write_once(&method, service, entity, &token, body).await
            }
            other => other,
        }
    }

    async fn write_once(
        &self,
        method: &Method,
        service: &str,
        entity: &str,
        token: &CsrfToken,
        body: Option<Value>,
    ) -> Result<Value, BackendError> {
        let mut request = BackendRequest::new(method.clone(), entity_path(service, entity), self.timeouts.write())
            .header(CSRF_HEADER, token.value.as_str())
            .header("accept", "application/json");
        if let Some(cookie) = token.cookie_header() {
            request = request.header("cookie", cookie);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = self.executor.send(&request).await?;
        Ok(odata::simplify(response.json()?))
    }
}

fn entity_path(service: &str, entity: &str) -> String {
    format!("{}/{}", service.trim_end_matches('/'), entity.trim_start_matches('/'))
}
