use axum::response::{IntoResponse, Response};
use axum_helpers::AppError;
use service_bus::{BusError, TerminalAction};
use thiserror::Error;
use validator::ValidationErrors;

#[derive(Debug, Error)]
pub enum TaskError {
    /// Producer input failed validation; nothing was published
    #[error("Invalid input: {0}")]
    Validation(#[from] ValidationErrors),

    /// Message body is not a task-created event; retrying cannot help
    #[error("Failed to decode task event: {0}")]
    Decode(#[source] serde_json::Error),

    /// The queue backend failed (see [`TaskError::is_transient`])
    #[error("Queue error: {0}")]
    Transport(#[from] BusError),

    /// Subscription is not in the configured set
    #[error("Subscription '{0}' does not exist.")]
    NotFound(String),

    /// Anything the other kinds do not cover; treated as retryable
    #[error("Unexpected error: {0}")]
    Unclassified(String),
}

pub type TaskResult<T> = Result<T, TaskError>;

impl TaskError {
    /// Whether the queue reported the failure as retryable
    pub fn is_transient(&self) -> bool {
        matches!(self, TaskError::Transport(e) if e.is_transient())
    }

    /// How a consumer settles a message that failed with this error.
    /// Only decode failures are terminal; everything else is retried.
    pub fn terminal_action(&self) -> TerminalAction {
        match self {
            TaskError::Decode(e) => {
                TerminalAction::dead_letter(crate::consumer::DESERIALIZATION_FAILED, e.to_string())
            }
            _ => TerminalAction::Abandon,
        }
    }
}

/// Convert TaskError to AppError for standardized error responses
impl From<TaskError> for AppError {
    fn from(err: TaskError) -> Self {
        match err {
            TaskError::Validation(errors) => AppError::ValidationError(errors),
            TaskError::NotFound(name) => {
                AppError::BadRequest(format!("Subscription '{}' does not exist.", name))
            }
            TaskError::Transport(e) if e.is_transient() => {
                AppError::ServiceUnavailable(format!("Queue temporarily unavailable: {}", e))
            }
            TaskError::Transport(e) => AppError::InternalServerError(format!("Queue error: {}", e)),
            TaskError::Decode(e) => {
                AppError::InternalServerError(format!("Failed to decode task event: {}", e))
            }
            TaskError::Unclassified(msg) => AppError::InternalServerError(msg),
        }
    }
}

impl IntoResponse for TaskError {
    fn into_response(self) -> Response {
        let app_error: AppError = self.into();
        app_error.into_response()
    }
}
