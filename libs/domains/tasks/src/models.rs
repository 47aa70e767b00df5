use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use service_bus::ReceivedMessage;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::error::{TaskError, TaskResult};

/// "A task was created" event, the payload of every message on the bus.
///
/// Immutable once built: `task_id` and `created_at` are set by
/// [`TaskCreatedEvent::new`] and never change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TaskCreatedEvent {
    /// Unique identifier (UUID v4)
    pub task_id: Uuid,
    pub title: String,
    pub description: String,
    /// Who the task is for
    pub assigned_to: String,
    /// When the event was created (UTC, RFC 3339)
    pub created_at: DateTime<Utc>,
}

impl TaskCreatedEvent {
    /// Transport subject identifying this event kind
    pub const SUBJECT: &'static str = "TaskCreated";

    /// Application property used by subscriptions to filter on assignment
    pub const REQUIRES_ASSIGNED_TO: &'static str = "requires_assigned_to";

    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        assigned_to: impl Into<String>,
    ) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            title: title.into(),
            description: description.into(),
            assigned_to: assigned_to.into(),
            created_at: Utc::now(),
        }
    }

    pub fn decode(body: &[u8]) -> TaskResult<Self> {
        serde_json::from_slice(body).map_err(TaskError::Decode)
    }
}

/// DTO for publishing a task
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateTaskRequest {
    #[validate(length(min = 2, message = "Title must be at least 2 characters"))]
    #[schema(example = "Write release notes")]
    pub title: String,
    #[validate(length(min = 1, message = "Description must not be empty"))]
    #[schema(example = "Summarise the changes shipped this sprint")]
    pub description: String,
    #[validate(length(min = 1, message = "Assignee must not be empty"))]
    #[schema(example = "John Doe")]
    pub assigned_to: String,
}

/// Body of a `202 Accepted` publish response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TaskAcceptedResponse {
    pub task_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub message: String,
}

impl From<&TaskCreatedEvent> for TaskAcceptedResponse {
    fn from(event: &TaskCreatedEvent) -> Self {
        Self {
            task_id: event.task_id,
            created_at: event.created_at,
            message: "Task queued for processing".to_string(),
        }
    }
}

/// Read-only view of one dead-lettered message.
///
/// Exactly one of `body` and `raw_body` is set: the decoded event when the
/// payload is a [`TaskCreatedEvent`], the payload text otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DeadLetterRecord {
    pub message_id: Option<String>,
    pub subject: Option<String>,
    pub enqueued_time: DateTime<Utc>,
    pub dead_letter_reason: Option<String>,
    pub dead_letter_error_description: Option<String>,
    pub delivery_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<TaskCreatedEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_body: Option<String>,
}

impl From<&ReceivedMessage> for DeadLetterRecord {
    fn from(message: &ReceivedMessage) -> Self {
        let (body, raw_body) = match TaskCreatedEvent::decode(&message.body) {
            Ok(event) => (Some(event), None),
            Err(_) => (None, Some(message.body_as_str().into_owned())),
        };

        Self {
            message_id: message.message_id.clone(),
            subject: message.subject.clone(),
            enqueued_time: message.enqueued_time,
            dead_letter_reason: message.dead_letter_reason.clone(),
            dead_letter_error_description: message.dead_letter_error_description.clone(),
            delivery_count: message.delivery_count,
            body,
            raw_body,
        }
    }
}

/// Every dead-lettered message of one subscription, oldest first
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DeadLetterInspection {
    pub subscription: String,
    pub total_count: usize,
    pub messages: Vec<DeadLetterRecord>,
}

/// One message that could not be replayed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ReplayFailure {
    pub message_id: String,
    pub error_description: String,
}

/// Tally of one replay run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ReplayOutcome {
    pub successful: usize,
    pub failed: usize,
    pub errors: Vec<ReplayFailure>,
}

impl ReplayOutcome {
    pub fn record_success(&mut self) {
        self.successful += 1;
    }

    pub fn record_failure(&mut self, message_id: impl Into<String>, error: impl ToString) {
        self.failed += 1;
        self.errors.push(ReplayFailure {
            message_id: message_id.into(),
            error_description: error.to_string(),
        });
    }

    pub fn total(&self) -> usize {
        self.successful + self.failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use service_bus::OutboundMessage;
    use validator::Validate;

    fn dead_lettered(body: &[u8]) -> ReceivedMessage {
        ReceivedMessage {
            body: body.to_vec(),
            subject: Some(TaskCreatedEvent::SUBJECT.into()),
            content_type: Some("application/json".into()),
            message_id: Some("m-1".into()),
            correlation_id: None,
            application_properties: Default::default(),
            sequence_number: Some(1),
            delivery_count: 10,
            enqueued_time: Utc::now(),
            dead_letter_reason: Some("MaxDeliveryCountExceeded".into()),
            dead_letter_error_description: Some("too many deliveries".into()),
            lock_token: None,
        }
    }

    #[test]
    fn test_event_round_trip() {
        let event = TaskCreatedEvent::new("Write docs", "Cover the replay endpoint", "John Doe");
        let bytes = OutboundMessage::json(&event).unwrap().body;
        assert_eq!(TaskCreatedEvent::decode(&bytes).unwrap(), event);
    }

    #[test]
    fn test_event_wire_keys_are_snake_case() {
        let event = TaskCreatedEvent::new("Write docs", "d", "a");
        let value = serde_json::to_value(&event).unwrap();
        for key in ["task_id", "title", "description", "assigned_to", "created_at"] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
    }

    #[test]
    fn test_create_request_validation() {
        let valid = CreateTaskRequest {
            title: "ok".into(),
            description: "d".into(),
            assigned_to: "a".into(),
        };
        assert!(valid.validate().is_ok());

        let invalid = CreateTaskRequest {
            title: "x".into(),
            description: String::new(),
            assigned_to: String::new(),
        };
        let errors = invalid.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("title"));
        assert!(fields.contains_key("description"));
        assert!(fields.contains_key("assigned_to"));
    }

    #[test]
    fn test_record_keeps_decoded_body() {
        let event = TaskCreatedEvent::new("Write docs", "d", "a");
        let record = DeadLetterRecord::from(&dead_lettered(&serde_json::to_vec(&event).unwrap()));

        assert_eq!(record.body, Some(event));
        assert!(record.raw_body.is_none());

        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("raw_body").is_none());
        assert_eq!(json["delivery_count"], 10);
    }

    #[test]
    fn test_record_falls_back_to_raw_body() {
        let record = DeadLetterRecord::from(&dead_lettered(b"{not json"));

        assert!(record.body.is_none());
        assert_eq!(record.raw_body.as_deref(), Some("{not json"));

        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("body").is_none());
        assert_eq!(json["dead_letter_reason"], "MaxDeliveryCountExceeded");
    }

    #[test]
    fn test_replay_outcome_tally() {
        let mut outcome = ReplayOutcome::default();
        outcome.record_success();
        outcome.record_failure("m-2", "lock lost");

        assert_eq!(outcome.total(), 2);
        assert_eq!(outcome.errors[0].message_id, "m-2");
        assert_eq!(outcome.errors[0].error_description, "lock lost");
    }
}
