//! Classification of task-created messages into terminal actions.
//!
//! | Outcome of handling              | Action       |
//! |----------------------------------|--------------|
//! | body is not a `TaskCreatedEvent` | dead-letter  |
//! | side effect succeeded            | complete     |
//! | side effect failed (any reason)  | abandon      |
//!
//! Abandoned messages come back with a higher delivery count until the
//! receiver's `max_delivery_count` moves them to the dead-letter sub-queue.

use async_trait::async_trait;
use service_bus::{MessageHandler, ReceivedMessage, TerminalAction};
use std::sync::Arc;
use tracing::{debug, error, warn};

#[cfg(test)]
use mockall::automock;

use crate::error::TaskResult;
use crate::models::TaskCreatedEvent;

/// Dead-letter reason for bodies that cannot be decoded
pub const DESERIALIZATION_FAILED: &str = "DeserializationFailed";

/// What a worker does with each decoded event
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TaskSideEffect: Send + Sync {
    async fn apply(&self, event: &TaskCreatedEvent) -> TaskResult<()>;

    fn name(&self) -> &'static str;
}

/// [`MessageHandler`] that decodes a task event and runs one side effect on it
pub struct TaskEventHandler {
    effect: Arc<dyn TaskSideEffect>,
}

impl TaskEventHandler {
    pub fn new(effect: Arc<dyn TaskSideEffect>) -> Self {
        Self { effect }
    }

    /// Decode and apply, returning how the message should be settled
    pub async fn handle(&self, message: &ReceivedMessage) -> TerminalAction {
        let message_id = message.display_id();

        let event = match TaskCreatedEvent::decode(&message.body) {
            Ok(event) => event,
            Err(e) => {
                error!(
                    message_id = %message_id,
                    handler = self.effect.name(),
                    error = %e,
                    "Message body is not a task event, dead-lettering"
                );
                return e.terminal_action();
            }
        };

        match self.effect.apply(&event).await {
            Ok(()) => {
                debug!(message_id = %message_id, task_id = %event.task_id, "Task event handled");
                TerminalAction::Complete
            }
            Err(e) if e.is_transient() => {
                warn!(
                    message_id = %message_id,
                    delivery_count = message.delivery_count,
                    error = %e,
                    "Transient failure, abandoning for redelivery"
                );
                TerminalAction::Abandon
            }
            Err(e) => {
                error!(
                    message_id = %message_id,
                    delivery_count = message.delivery_count,
                    error = %e,
                    "Unexpected failure, abandoning for redelivery"
                );
                TerminalAction::Abandon
            }
        }
    }
}

#[async_trait]
impl MessageHandler for TaskEventHandler {
    async fn on_message(&self, message: &ReceivedMessage) -> TerminalAction {
        self.handle(message).await
    }

    fn name(&self) -> &'static str {
        self.effect.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TaskError;
    use chrono::Utc;
    use service_bus::{BusError, OutboundMessage};

    fn received(body: Vec<u8>) -> ReceivedMessage {
        ReceivedMessage {
            body,
            subject: Some(TaskCreatedEvent::SUBJECT.into()),
            content_type: Some("application/json".into()),
            message_id: Some("m-1".into()),
            correlation_id: None,
            application_properties: Default::default(),
            sequence_number: Some(1),
            delivery_count: 1,
            enqueued_time: Utc::now(),
            dead_letter_reason: None,
            dead_letter_error_description: None,
            lock_token: None,
        }
    }

    fn task_message() -> ReceivedMessage {
        let event = TaskCreatedEvent::new("Write docs", "d", "John Doe");
        received(OutboundMessage::json(&event).unwrap().body)
    }

    fn handler_with(effect: MockTaskSideEffect) -> TaskEventHandler {
        TaskEventHandler::new(Arc::new(effect))
    }

    #[tokio::test]
    async fn test_undecodable_bodies_are_dead_lettered() {
        let mut effect = MockTaskSideEffect::new();
        effect.expect_apply().never();
        effect.expect_name().return_const("audit");
        let handler = handler_with(effect);

        let bodies: [&[u8]; 4] = [
            b"",
            b"{not json",
            br#"{"title":"missing everything else"}"#,
            br#"[1, 2, 3]"#,
        ];
        for body in bodies {
            let action = handler.handle(&received(body.to_vec())).await;
            match action {
                TerminalAction::DeadLetter { reason, .. } => {
                    assert_eq!(reason, DESERIALIZATION_FAILED)
                }
                other => panic!("expected dead-letter, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_success_completes() {
        let mut effect = MockTaskSideEffect::new();
        effect
            .expect_apply()
            .withf(|event| event.assigned_to == "John Doe")
            .times(1)
            .returning(|_| Ok(()));
        effect.expect_name().return_const("audit");

        let action = handler_with(effect).handle(&task_message()).await;
        assert_eq!(action, TerminalAction::Complete);
    }

    #[tokio::test]
    async fn test_transient_failure_abandons() {
        let mut effect = MockTaskSideEffect::new();
        effect
            .expect_apply()
            .returning(|_| Err(TaskError::from(BusError::transient("connection reset"))));
        effect.expect_name().return_const("email");

        let action = handler_with(effect).handle(&task_message()).await;
        assert_eq!(action, TerminalAction::Abandon);
    }

    #[tokio::test]
    async fn test_unclassified_failure_abandons() {
        let mut effect = MockTaskSideEffect::new();
        effect
            .expect_apply()
            .returning(|_| Err(TaskError::Unclassified("smtp said no".into())));
        effect.expect_name().return_const("email");

        let action = handler_with(effect).handle(&task_message()).await;
        assert_eq!(action, TerminalAction::Abandon);
    }

    #[tokio::test]
    async fn test_handler_name_comes_from_effect() {
        let mut effect = MockTaskSideEffect::new();
        effect.expect_name().return_const("analytics");

        let handler = handler_with(effect);
        assert_eq!(MessageHandler::name(&handler), "analytics");
    }
}
