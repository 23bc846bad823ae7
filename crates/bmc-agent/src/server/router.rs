//! HTTP Router
//!
//! Read-only JSON surface over the entity catalog.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use entity_runtime::EntityError;

use super::state::AppState;

/// Create the application router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/entities", get(list_entities))
        .route("/entities/:name", get(get_entity))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Errors surfaced to HTTP clients
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("entity not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Internal(String),
}

impl From<EntityError> for ApiError {
    fn from(err: EntityError) -> Self {
        match err {
            EntityError::NotFound(name) => ApiError::NotFound(name),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(ErrorBody { error: self.to_string() })).into_response()
    }
}

/// Health check response
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    entities: usize,
    populated: usize,
}

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        entities: state.manager().len(),
        populated: state.populated(),
    })
}

async fn list_entities(State(state): State<AppState>) -> Json<Vec<String>> {
    let names = state
        .manager()
        .resource_names()
        .into_iter()
        .map(str::to_string)
        .collect();
    Json(names)
}

/// Render one resource. Population may hit the bus, so it runs off the
/// async workers.
async fn get_entity(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    let body = tokio::task::spawn_blocking(move || state.render_entity(&name))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))??;
    Ok(Json(body.as_ref().clone()).into_response())
}
