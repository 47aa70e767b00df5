use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use axum_helpers::{ErrorResponse, ValidatedJson};
use std::sync::Arc;

use super::TasksState;
use crate::error::TaskResult;
use crate::models::{CreateTaskRequest, TaskAcceptedResponse};

/// Liveness text for the tasks API
#[utoipa::path(
    get,
    path = "/tasks",
    tag = "tasks",
    responses(
        (status = 200, description = "API is up", body = String, content_type = "text/plain")
    )
)]
pub async fn tasks_status() -> &'static str {
    "Tasks API is running"
}

/// Queue a task-created event
#[utoipa::path(
    post,
    path = "/tasks",
    tag = "tasks",
    request_body = CreateTaskRequest,
    responses(
        (status = 202, description = "Task queued for processing", body = TaskAcceptedResponse),
        (status = 400, description = "Invalid request", body = ErrorResponse),
        (status = 500, description = "Queue error", body = ErrorResponse),
        (status = 503, description = "Queue temporarily unavailable", body = ErrorResponse)
    )
)]
pub async fn create_task(
    State(state): State<Arc<TasksState>>,
    ValidatedJson(input): ValidatedJson<CreateTaskRequest>,
) -> TaskResult<impl IntoResponse> {
    let event = state.publisher.publish_request(&input).await?;
    Ok((StatusCode::ACCEPTED, Json(TaskAcceptedResponse::from(&event))))
}
