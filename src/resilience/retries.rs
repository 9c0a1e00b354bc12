//! Retry executor for backend calls.
//!
//! # Responsibilities
//! - Route every attempt through the dispatcher
//! - Retry transient failures (reset, timeout, 5xx) with linear backoff
//! - Surface the last error unchanged
//!
//! # Design Decisions
//! - Backoff happens outside the dispatcher; a retry re-queues for a slot
//! - 4xx and anything unclassified fail on the first attempt
//! - Writes follow the same policy as reads

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::backend::error::BackendError;
use crate::backend::transport::{BackendRequest, BackendResponse, Transport};
use crate::config::RetryConfig;
use crate::observability::metrics;
use crate::resilience::backoff::calculate_backoff;
use crate::resilience::dispatcher::Dispatcher;

/// Executes backend requests with admission control and retries.
pub struct RequestExecutor {
    dispatcher: Arc<Dispatcher>,
    transport: Arc<dyn Transport>,
    max_attempts: u32,
    backoff_step: Duration,
}

impl RequestExecutor {
    pub fn new(dispatcher: Arc<Dispatcher>, transport: Arc<dyn Transport>, config: &RetryConfig) -> Self {
        Self {
            dispatcher,
            transport,
            max_attempts: config.max_attempts.max(1),
            backoff_step: config.backoff_step(),
        }
    }

    /// Execute with the configured number of attempts.
    pub async fn send(&self, request: &BackendRequest) -> Result<BackendResponse, BackendError> {
        self.execute(request, self.max_attempts).await
    }

    /// Execute `request`, making at most `max_attempts` attempts.
    ///
    /// A non-2xx response counts as a failure and is returned as
    /// [`BackendError::Status`] once retries are exhausted.
    pub async fn execute(
        &self,
        request: &BackendRequest,
        max_attempts: u32,
    ) -> Result<BackendResponse, BackendError> {
        let max_attempts = max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let start = Instant::now();

            let result = self
                .dispatcher
                .submit(|| self.transport.send(request.clone()))
                .await
                .and_then(BackendResponse::error_for_status);

            let err = match result {
                Ok(response) => {
                    metrics::record_backend_request(request.method.as_str(), "success", start);
                    return Ok(response);
                }
                Err(e) => e,
            };

            let retrying = err.is_transient() && attempt < max_attempts;
            metrics::record_backend_request(
                request.method.as_str(),
                if retrying { "retried" } else { err.kind() },
                start,
            );

            tracing::warn!(
                method = %request.method,
                path = %request.path,
                attempt = attempt,
                max_attempts = max_attempts,
                transient = err.is_transient(),
                error = %err,
                "Backend call failed"
            );

            if !retrying {
                return Err(err);
            }

            let backoff = calculate_backoff(attempt, self.backoff_step);
            metrics::record_retry(request.method.as_str());
            tracing::info!(
                path = %request.path,
                attempt = attempt,
                delay = ?backoff,
                "Retrying backend call"
            );
            tokio::time::sleep(backoff).await;
        }
    }
}
