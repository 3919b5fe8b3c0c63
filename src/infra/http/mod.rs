mod middleware;

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    middleware as axum_middleware,
    response::{IntoResponse, Response},
    routing::get,
};

use crate::application::{AppError, HealthStatus, Orchestrator};

pub use middleware::RequestContext;

/// Shared state of the operational router.
pub type HttpState = Arc<Orchestrator>;

/// Operational endpoints: `/health` and per-metric summaries.
pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/health/metrics/{name}", get(metric_summary))
        .with_state(state)
        .layer(axum_middleware::from_fn(middleware::log_responses))
        .layer(axum_middleware::from_fn(middleware::set_request_context))
}

async fn health(State(state): State<HttpState>) -> Response {
    let report = state.health();
    let status = match report.status {
        HealthStatus::Ok => StatusCode::OK,
        HealthStatus::Draining => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(report)).into_response()
}

async fn metric_summary(
    State(state): State<HttpState>,
    Path(name): Path<String>,
) -> Result<Response, AppError> {
    let summary = state.metric_summary(&name).ok_or(AppError::NotFound)?;
    Ok(Json(summary).into_response())
}
