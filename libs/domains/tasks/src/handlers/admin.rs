use axum::{
    Json,
    extract::{Path, State},
};
use axum_helpers::ErrorResponse;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::TasksState;
use crate::error::TaskResult;
use crate::models::{DeadLetterInspection, ReplayOutcome};

/// Dead-letter count per configured subscription
#[utoipa::path(
    get,
    path = "/admin/deadletters",
    tag = "admin",
    responses(
        (status = 200, description = "Counts by subscription", body = BTreeMap<String, u64>),
        (status = 500, description = "Queue error", body = ErrorResponse)
    )
)]
pub async fn list_dead_letters(
    State(state): State<Arc<TasksState>>,
) -> TaskResult<Json<BTreeMap<String, u64>>> {
    Ok(Json(state.admin.list().await?))
}

/// Peek every dead-lettered message of a subscription
#[utoipa::path(
    get,
    path = "/admin/deadletters/{subscription}",
    tag = "admin",
    params(
        ("subscription" = String, Path, description = "Subscription name, e.g. audit")
    ),
    responses(
        (status = 200, description = "Dead-lettered messages, oldest first", body = DeadLetterInspection),
        (status = 400, description = "Unknown subscription", body = ErrorResponse),
        (status = 500, description = "Queue error", body = ErrorResponse)
    )
)]
pub async fn get_dead_letters(
    State(state): State<Arc<TasksState>>,
    Path(subscription): Path<String>,
) -> TaskResult<Json<DeadLetterInspection>> {
    Ok(Json(state.admin.inspect(&subscription).await?))
}

/// Re-publish a subscription's dead-lettered messages to the topic
#[utoipa::path(
    post,
    path = "/admin/deadletters/{subscription}/replay",
    tag = "admin",
    params(
        ("subscription" = String, Path, description = "Subscription name, e.g. audit")
    ),
    responses(
        (status = 200, description = "Replay tally", body = ReplayOutcome),
        (status = 400, description = "Unknown subscription", body = ErrorResponse),
        (status = 500, description = "Queue error", body = ErrorResponse)
    )
)]
pub async fn replay_dead_letters(
    State(state): State<Arc<TasksState>>,
    Path(subscription): Path<String>,
) -> TaskResult<Json<ReplayOutcome>> {
    Ok(Json(state.admin.replay(&subscription).await?))
}
