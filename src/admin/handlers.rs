use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use crate::csrf::CachedTokenInfo;
use crate::http::server::AppState;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub dispatcher: DispatcherStatus,
    pub token_freshness_ms: u64,
    pub tokens: Vec<CachedTokenInfo>,
    pub services: Vec<ServiceStatus>,
}

#[derive(Serialize)]
pub struct DispatcherStatus {
    pub max_concurrent: usize,
    pub in_flight: usize,
    pub queued: usize,
}

#[derive(Serialize)]
pub struct ServiceStatus {
    pub name: String,
    pub path: String,
}

#[derive(Serialize)]
pub struct InvalidateResult {
    pub service: String,
    pub path: String,
    pub invalidated: bool,
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    let tokens = state.client.tokens();

    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        dispatcher: DispatcherStatus {
            max_concurrent: state.dispatcher.max_concurrent(),
            in_flight: state.dispatcher.in_flight(),
            queued: state.dispatcher.queued(),
        },
        token_freshness_ms: tokens.freshness().as_millis() as u64,
        tokens: tokens.snapshot(),
        services: state
            .config
            .services
            .iter()
            .map(|s| ServiceStatus {
                name: s.name.clone(),
                path: s.path.clone(),
            })
            .collect(),
    })
}

/// `DELETE /admin/tokens/{service}`: drop the cached CSRF token of a service alias.
pub async fn invalidate_token(
    State(state): State<AppState>,
    Path(service): Path<String>,
) -> Result<Json<InvalidateResult>, StatusCode> {
    let path = state
        .config
        .service(&service)
        .map(|s| s.path.clone())
        .ok_or(StatusCode::NOT_FOUND)?;

    let invalidated = state.client.tokens().invalidate(&path);

    Ok(Json(InvalidateResult {
        service,
        path,
        invalidated,
    }))
}
