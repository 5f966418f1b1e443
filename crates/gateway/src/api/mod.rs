//! HTTP control plane.

pub mod tasks;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/tasks/process", post(tasks::process))
        .route("/v1/tasks/:user_id/status", get(tasks::status))
        .route("/v1/tasks/:user_id/cancel", post(tasks::cancel))
        .route("/v1/tasks/:user_id/steer", post(tasks::steer))
        .route("/v1/tasks/:user_id/checkpoints", get(tasks::checkpoints))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

/// Standardized JSON error response: `{ "error": "<message>" }`.
pub(crate) fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}
