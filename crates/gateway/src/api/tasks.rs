//! Task control endpoints.
//!
//! - `POST /v1/tasks/process`              — start a task for a user
//! - `GET  /v1/tasks/:user_id/status`      — full task state snapshot
//! - `POST /v1/tasks/:user_id/cancel`      — cancel the running task
//! - `POST /v1/tasks/:user_id/steer`       — queue a steering instruction
//! - `GET  /v1/tasks/:user_id/checkpoints` — list persisted checkpoints

use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde::Deserialize;

use dr_checkpoint::{TaskState, TaskStatus, LATEST_SLOT};
use dr_domain::Message;
use dr_providers::{ReasoningLevel, ResponseFormat};

use super::api_error;
use crate::runtime::{process_task, TaskLaunch};
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/tasks/process
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct TaskRequest {
    /// Explicit task id; a fresh UUID is minted when absent.
    #[serde(default)]
    pub task_id: Option<String>,
    pub chat_id: String,
    pub user_id: String,
    pub model_alias: String,
    /// Full conversation (system + history + user turn).
    #[serde(default)]
    pub messages: Vec<Message>,
    /// Shorthand: appended as the final user turn.
    #[serde(default)]
    pub prompt: Option<String>,
    /// Per-provider credential strings, forwarded opaquely.
    #[serde(default)]
    pub credentials: HashMap<String, String>,
    #[serde(default)]
    pub auto_resume: Option<bool>,
    #[serde(default)]
    pub reasoning_level: Option<ReasoningLevel>,
    #[serde(default)]
    pub response_format: Option<ResponseFormat>,
}

pub async fn process(
    State(app): State<AppState>,
    Json(body): Json<TaskRequest>,
) -> impl IntoResponse {
    if body.user_id.trim().is_empty() || body.chat_id.trim().is_empty() {
        return api_error(StatusCode::BAD_REQUEST, "user_id and chat_id are required");
    }
    if body.model_alias.trim().is_empty() {
        return api_error(StatusCode::BAD_REQUEST, "model_alias is required");
    }

    let mut messages = body.messages;
    if let Some(prompt) = body.prompt.filter(|p| !p.trim().is_empty()) {
        messages.push(Message::user(prompt));
    }
    if messages.is_empty() {
        return api_error(StatusCode::BAD_REQUEST, "messages or prompt required");
    }

    let control = app.controls.control(&body.user_id);
    if control.is_running() {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(serde_json::json!({
                "status": "busy",
                "error": "a task is already processing for this user",
            })),
        )
            .into_response();
    }

    let task_id = body
        .task_id
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let mut state = TaskState::new(
        task_id.clone(),
        body.user_id,
        body.chat_id,
        body.model_alias,
        messages,
    );
    state.auto_resume = body.auto_resume.unwrap_or(false);

    let launch = TaskLaunch {
        state,
        reasoning_level: body.reasoning_level,
        response_format: body.response_format,
        credentials: body.credentials,
    };

    let app_clone = app.clone();
    tokio::spawn(async move {
        process_task(app_clone, launch).await;
    });

    Json(serde_json::json!({ "status": "started", "task_id": task_id })).into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/tasks/:user_id/status
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn status(
    State(app): State<AppState>,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    // The live snapshot is fresher than the store while a loop runs.
    if let Some(snapshot) = app
        .controls
        .existing(&user_id)
        .and_then(|c| c.snapshot())
    {
        return Json(serde_json::to_value(&snapshot).unwrap_or_default()).into_response();
    }

    match app.store.get(&user_id, LATEST_SLOT).await {
        Ok(Some(state)) => Json(serde_json::to_value(&state).unwrap_or_default()).into_response(),
        Ok(None) => Json(serde_json::json!({ "status": "not_found" })).into_response(),
        Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/tasks/:user_id/cancel
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn cancel(
    State(app): State<AppState>,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    let running = app
        .controls
        .existing(&user_id)
        .filter(|c| c.is_running());

    let Some(control) = running else {
        let current = app
            .controls
            .existing(&user_id)
            .and_then(|c| c.snapshot())
            .map(|s| s.status.as_str().to_string())
            .unwrap_or_else(|| "idle".into());
        return Json(serde_json::json!({
            "status": "not_processing",
            "current": current,
        }))
        .into_response();
    };

    // Signal the loop; it exits silently at the next boundary and any
    // in-flight tool result is discarded.
    control.cancel();

    // The cancel handler owns the user-facing bookkeeping.
    if let Ok(Some(mut state)) = app.store.get(&user_id, LATEST_SLOT).await {
        state.status = TaskStatus::Cancelled;
        state.touch();
        control.update_snapshot(&state);
        let _ = app.store.put(&user_id, LATEST_SLOT, &state).await;

        if let Some(id) = state.status_message_id {
            app.emitter.delete_message(&state.chat_id, id).await;
        }
        app.emitter
            .send_message(&state.chat_id, "\u{274c} Task cancelled.", None)
            .await;
    }

    Json(serde_json::json!({ "status": "cancelled" })).into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/tasks/:user_id/steer
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct SteerRequest {
    #[serde(default)]
    pub instruction: String,
}

pub async fn steer(
    State(app): State<AppState>,
    Path(user_id): Path<String>,
    Json(body): Json<SteerRequest>,
) -> impl IntoResponse {
    let instruction = body.instruction.trim().to_string();
    if instruction.is_empty() {
        return api_error(StatusCode::BAD_REQUEST, "instruction must not be empty");
    }

    match app.controls.existing(&user_id).filter(|c| c.is_running()) {
        Some(control) => {
            let queued = control.push_steering(instruction);
            Json(serde_json::json!({ "status": "steered", "queued": queued })).into_response()
        }
        None => Json(serde_json::json!({ "status": "not_processing" })).into_response(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/tasks/:user_id/checkpoints
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn checkpoints(
    State(app): State<AppState>,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    match app.store.list(&user_id).await {
        Ok(listing) => Json(serde_json::json!({ "checkpoints": listing })).into_response(),
        Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}
