//! Proxy route handlers.
//!
//! One generic handler per verb replaces the per-entity read routes: the
//! `{service}` segment is a configured alias, everything after it is the
//! OData resource path forwarded verbatim.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};

use crate::http::response::ApiError;
use crate::http::server::AppState;
use crate::observability::metrics;

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// `GET /api/{service}/{*entity}`
pub async fn read_entity(
    State(state): State<AppState>,
    Path((service, entity)): Path<(String, String)>,
    Query(query): Query<Vec<(String, String)>>,
) -> Response {
    let result = async {
        let path = service_path(&state, &service)?;
        let data = state.client.read(path, &entity, &query).await?;
        Ok::<_, ApiError>(Json(data).into_response())
    }
    .await;
    finish("read", result)
}

/// `POST /api/{service}/{*entity}`
pub async fn create_entity(
    State(state): State<AppState>,
    Path((service, entity)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Response {
    let result = async {
        let path = service_path(&state, &service)?;
        let data = state.client.create(path, &entity, body).await?;
        Ok::<_, ApiError>((StatusCode::CREATED, Json(data)).into_response())
    }
    .await;
    finish("create", result)
}

/// `PATCH /api/{service}/{*entity}`
pub async fn update_entity(
    State(state): State<AppState>,
    Path((service, entity)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Response {
    let result = async {
        let path = service_path(&state, &service)?;
        let data = state.client.update(path, &entity, body).await?;
        Ok::<_, ApiError>(no_content_or_json(data))
    }
    .await;
    finish("update", result)
}

/// `DELETE /api/{service}/{*entity}`
pub async fn delete_entity(
    State(state): State<AppState>,
    Path((service, entity)): Path<(String, String)>,
) -> Response {
    let result = async {
        let path = service_path(&state, &service)?;
        let data = state.client.delete(path, &entity).await?;
        Ok::<_, ApiError>(no_content_or_json(data))
    }
    .await;
    finish("delete", result)
}

fn service_path<'a>(state: &'a AppState, alias: &str) -> Result<&'a str, ApiError> {
    state
        .config
        .service(alias)
        .map(|s| s.path.as_str())
        .ok_or_else(|| ApiError::UnknownService(alias.to_string()))
}

fn no_content_or_json(data: Value) -> Response {
    if data.is_null() {
        StatusCode::NO_CONTENT.into_response()
    } else {
        Json(data).into_response()
    }
}

fn finish(route: &'static str, result: Result<Response, ApiError>) -> Response {
    let response = result.unwrap_or_else(|e| e.into_response());
    metrics::record_proxy_request(route, response.status().as_u16());
    response
}
