use service_bus::{MessageSender, OutboundMessage};
use std::sync::Arc;
use tracing::{info, instrument};
use validator::Validate;

use crate::error::TaskResult;
use crate::models::{CreateTaskRequest, TaskCreatedEvent};

/// Builds task-created events and sends them to one queue or topic.
///
/// Does not retry. A transient failure comes back as a transport error the
/// caller may choose to retry.
#[derive(Clone)]
pub struct TaskPublisher {
    sender: Arc<dyn MessageSender>,
}

impl TaskPublisher {
    pub fn new(sender: Arc<dyn MessageSender>) -> Self {
        Self { sender }
    }

    /// Queue or topic this publisher sends to
    pub fn entity(&self) -> &str {
        self.sender.entity()
    }

    /// Validate, build and send one event. Nothing is sent when validation fails.
    #[instrument(skip_all, fields(entity = %self.sender.entity(), title = %title))]
    pub async fn publish(
        &self,
        title: &str,
        description: &str,
        assigned_to: &str,
    ) -> TaskResult<TaskCreatedEvent> {
        CreateTaskRequest {
            title: title.to_string(),
            description: description.to_string(),
            assigned_to: assigned_to.to_string(),
        }
        .validate()?;

        let event = TaskCreatedEvent::new(title, description, assigned_to);
        let message = OutboundMessage::json(&event)?
            .with_subject(TaskCreatedEvent::SUBJECT)
            .with_message_id(event.task_id.to_string())
            .with_property(
                TaskCreatedEvent::REQUIRES_ASSIGNED_TO,
                !event.assigned_to.is_empty(),
            );

        self.sender.send(message).await?;

        info!(task_id = %event.task_id, assigned_to = %event.assigned_to, "Task event published");
        Ok(event)
    }

    pub async fn publish_request(&self, request: &CreateTaskRequest) -> TaskResult<TaskCreatedEvent> {
        self.publish(&request.title, &request.description, &request.assigned_to)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TaskError;
    use service_bus::{BusClient, EntityPath, InMemoryBus, MessageReceiver, ReceiverOptions};
    use std::collections::HashSet;
    use std::time::Duration;

    async fn queue_publisher() -> (InMemoryBus, TaskPublisher) {
        let bus = InMemoryBus::new();
        let sender = bus.queue_sender("tasks").await.unwrap();
        (bus, TaskPublisher::new(sender))
    }

    #[tokio::test]
    async fn test_publish_sets_wire_metadata() {
        let (bus, publisher) = queue_publisher().await;
        let event = publisher
            .publish("Write docs", "Cover the replay endpoint", "John Doe")
            .await
            .unwrap();

        let receiver = bus
            .receiver(EntityPath::queue("tasks"), ReceiverOptions::default())
            .await
            .unwrap();
        let received = receiver
            .receive(1, Duration::from_millis(50))
            .await
            .unwrap()
            .pop()
            .unwrap();

        assert_eq!(received.subject.as_deref(), Some("TaskCreated"));
        assert_eq!(received.content_type.as_deref(), Some("application/json"));
        assert_eq!(received.message_id, Some(event.task_id.to_string()));
        assert_eq!(
            received.application_properties.get("requires_assigned_to"),
            Some(&serde_json::json!(true))
        );
        assert_eq!(TaskCreatedEvent::decode(&received.body).unwrap(), event);
    }

    #[tokio::test]
    async fn test_task_ids_are_unique() {
        let (_bus, publisher) = queue_publisher().await;

        let mut ids = HashSet::new();
        for i in 0..50 {
            let event = publisher
                .publish(&format!("Task {i}"), "d", "a")
                .await
                .unwrap();
            assert!(ids.insert(event.task_id));
        }
    }

    #[tokio::test]
    async fn test_invalid_input_is_not_sent() {
        let (bus, publisher) = queue_publisher().await;

        let err = publisher.publish("x", "d", "a").await.unwrap_err();
        assert!(matches!(err, TaskError::Validation(_)));

        let err = publisher.publish("Write docs", "", "").await.unwrap_err();
        assert!(matches!(err, TaskError::Validation(_)));

        assert_eq!(bus.message_count(&EntityPath::queue("tasks")).await, 0);
    }

    #[tokio::test]
    async fn test_topic_publish_fans_out() {
        let bus = InMemoryBus::new();
        for sub in ["analytics", "audit", "email"] {
            bus.ensure_subscription("task-events", sub).await.unwrap();
        }
        let publisher = TaskPublisher::new(bus.topic_sender("task-events").await.unwrap());
        assert_eq!(publisher.entity(), "task-events");

        publisher.publish("Write docs", "d", "a").await.unwrap();

        for sub in ["analytics", "audit", "email"] {
            let path = EntityPath::subscription("task-events", sub);
            assert_eq!(bus.message_count(&path).await, 1);
        }
    }
}
