//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Compose the backend execution layer (dispatcher, token cache, executor)
//! - Create Axum Router with all handlers
//! - Wire up middleware (request ID, tracing, timeout, body limit)
//! - Serve until the shutdown signal fires

use axum::{
    body::Body,
    extract::DefaultBodyLimit,
    http::Request,
    routing::get,
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::admin::setup_admin_router;
use crate::backend::{BackendError, HttpTransport, S4Client, Transport};
use crate::config::ProxyConfig;
use crate::csrf::{BackendTokenFetcher, CsrfTokenCache};
use crate::http::handlers;
use crate::http::request::{MakeRequestUuidV4, RequestIdExt};
use crate::resilience::{Dispatcher, RequestExecutor};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub client: Arc<S4Client>,
    pub dispatcher: Arc<Dispatcher>,
    pub config: Arc<ProxyConfig>,
}

/// HTTP server for the integration proxy.
pub struct HttpServer {
    router: Router,
    state: AppState,
}

impl HttpServer {
    /// Create a server talking to the configured S/4HANA system.
    pub fn new(config: ProxyConfig) -> Result<Self, BackendError> {
        let transport = HttpTransport::new(&config.backend)?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    /// Create a server over an arbitrary transport.
    pub fn with_transport(config: ProxyConfig, transport: Arc<dyn Transport>) -> Self {
        let config = Arc::new(config);

        // One dispatcher shared by token fetches and regular calls
        let dispatcher = Arc::new(Dispatcher::new(config.dispatcher.max_concurrent));
        let fetcher = BackendTokenFetcher::new(
            dispatcher.clone(),
            transport.clone(),
            config.timeouts.token_fetch(),
        );
        let tokens = CsrfTokenCache::new(Arc::new(fetcher), config.tokens.freshness());
        let executor = Arc::new(RequestExecutor::new(dispatcher.clone(), transport, &config.retries));
        let client = Arc::new(S4Client::new(executor, tokens, config.timeouts.clone()));

        let state = AppState {
            client,
            dispatcher,
            config: config.clone(),
        };

        let router = Self::build_router(&config, state.clone());
        Self { router, state }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &ProxyConfig, state: AppState) -> Router {
        let api = Router::new()
            .route("/health", get(handlers::health))
            .route(
                "/api/{service}/{*entity}",
                get(handlers::read_entity)
                    .post(handlers::create_entity)
                    .patch(handlers::update_entity)
                    .delete(handlers::delete_entity),
            )
            .with_state(state.clone());

        let router = if config.admin.enabled {
            api.merge(setup_admin_router(state))
        } else {
            api
        };

        router
            .layer(DefaultBodyLimit::max(config.listener.max_body_size))
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::x_request_id(MakeRequestUuidV4))
                    .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                        tracing::info_span!(
                            "request",
                            method = %request.method(),
                            uri = %request.uri(),
                            request_id = %request.headers().request_id()
                        )
                    }))
                    .layer(PropagateRequestIdLayer::x_request_id())
                    .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs))),
            )
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            max_concurrent = self.state.dispatcher.max_concurrent(),
            services = self.state.config.services.len(),
            "HTTP server starting"
        );

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Shared state, e.g. for inspecting the dispatcher.
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &ProxyConfig {
        &self.state.config
    }
}
