//! Fetches CSRF tokens from S/4HANA.
//!
//! A token is obtained with an authenticated GET on the service root carrying
//! `x-csrf-token: Fetch`. The backend answers with the token in the same
//! header and binds it to the session cookies set on that response.

use std::sync::Arc;
use std::time::Duration;
use futures_util::future::BoxFuture;

use crate::backend::error::BackendError;
use crate::backend::transport::{BackendRequest, BackendResponse, Transport};
use crate::csrf::cache::{CsrfToken, TokenFetcher};
use crate::resilience::dispatcher::Dispatcher;

pub const CSRF_HEADER: &str = "x-csrf-token";

/// Token fetcher that goes through the shared dispatcher.
pub struct BackendTokenFetcher {
    dispatcher: Arc<Dispatcher>,
    transport: Arc<dyn Transport>,
    timeout: Duration,
}

impl BackendTokenFetcher {
    pub fn new(dispatcher: Arc<Dispatcher>, transport: Arc<dyn Transport>, timeout: Duration) -> Self {
        Self {
            dispatcher,
            transport,
            timeout,
        }
    }

    async fn fetch_token(&self, service: &str) -> Result<CsrfToken, BackendError> {
        let request = BackendRequest::get(format!("{}/", service.trim_end_matches('/')), self.timeout)
            .header(CSRF_HEADER, "Fetch")
            .header("accept", "application/json");

        let response = self
            .dispatcher
            .submit(|| self.transport.send(request))
            .await
            .and_then(BackendResponse::error_for_status)?;

        token_from_response(&response)
    }
}

impl TokenFetcher for BackendTokenFetcher {
    fn fetch<'a>(&'a self, service: &'a str) -> BoxFuture<'a, Result<CsrfToken, BackendError>> {
        Box::pin(async move {
            self.fetch_token(service).await.map_err(|e| BackendError::TokenFetch {
                service: service.to_string(),
                source: Box::new(e),
            })
        })
    }
}

fn token_from_response(response: &BackendResponse) -> Result<CsrfToken, BackendError> {
    let value = response
        .headers
        .get(CSRF_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("required"))
        .ok_or(BackendError::MissingToken)?;

    let cookies = response
        .headers
        .get_all("set-cookie")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(String::from)
        .collect();

    Ok(CsrfToken::new(value, cookies))
}
