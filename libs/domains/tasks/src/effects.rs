//! Side effects run by each worker kind.
//!
//! These stand in for real integrations (an analytics sink, an audit store,
//! an SMTP relay). Each waits briefly and logs the event's fields.

use async_trait::async_trait;
use service_bus::EntityPath;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::TaskBusConfig;
use crate::consumer::TaskSideEffect;
use crate::error::TaskResult;
use crate::models::TaskCreatedEvent;

const SIMULATED_LATENCY: Duration = Duration::from_millis(50);

/// Which consumer a worker process runs
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString, strum::AsRefStr,
)]
#[strum(serialize_all = "lowercase")]
pub enum WorkerKind {
    Analytics,
    Audit,
    Email,
    /// Single-queue mode of the first tutorial phase
    Tasks,
}

impl WorkerKind {
    /// Subscription or queue this kind reads from
    pub fn entity_path(&self, config: &TaskBusConfig) -> EntityPath {
        match self {
            WorkerKind::Tasks => EntityPath::queue(&config.queue),
            kind => EntityPath::subscription(&config.topic, kind.as_ref()),
        }
    }

    pub fn is_subscription(&self) -> bool {
        !matches!(self, WorkerKind::Tasks)
    }

    pub fn side_effect(&self) -> Arc<dyn TaskSideEffect> {
        match self {
            WorkerKind::Analytics => Arc::new(AnalyticsRecorder),
            WorkerKind::Audit => Arc::new(AuditTrail),
            WorkerKind::Email => Arc::new(EmailNotifier),
            WorkerKind::Tasks => Arc::new(TaskLogger),
        }
    }
}

pub struct AnalyticsRecorder;

#[async_trait]
impl TaskSideEffect for AnalyticsRecorder {
    async fn apply(&self, event: &TaskCreatedEvent) -> TaskResult<()> {
        tokio::time::sleep(SIMULATED_LATENCY).await;
        info!(
            task_id = %event.task_id,
            assigned_to = %event.assigned_to,
            title_length = event.title.len(),
            created_at = %event.created_at,
            "Recorded task_created analytics event"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "analytics"
    }
}

pub struct AuditTrail;

#[async_trait]
impl TaskSideEffect for AuditTrail {
    async fn apply(&self, event: &TaskCreatedEvent) -> TaskResult<()> {
        tokio::time::sleep(SIMULATED_LATENCY).await;
        info!(
            task_id = %event.task_id,
            title = %event.title,
            assigned_to = %event.assigned_to,
            created_at = %event.created_at,
            "Audit entry written"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "audit"
    }
}

pub struct EmailNotifier;

#[async_trait]
impl TaskSideEffect for EmailNotifier {
    async fn apply(&self, event: &TaskCreatedEvent) -> TaskResult<()> {
        tokio::time::sleep(SIMULATED_LATENCY).await;
        info!(
            task_id = %event.task_id,
            to = %event.assigned_to,
            subject = %format!("New task: {}", event.title),
            "Notification email sent"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "email"
    }
}

pub struct TaskLogger;

#[async_trait]
impl TaskSideEffect for TaskLogger {
    async fn apply(&self, event: &TaskCreatedEvent) -> TaskResult<()> {
        info!(
            task_id = %event.task_id,
            title = %event.title,
            description = %event.description,
            assigned_to = %event.assigned_to,
            created_at = %event.created_at,
            "Task received"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "tasks"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_parse_kind() {
        assert_eq!(WorkerKind::from_str("audit").unwrap(), WorkerKind::Audit);
        assert_eq!(WorkerKind::from_str("tasks").unwrap(), WorkerKind::Tasks);
        assert!(WorkerKind::from_str("billing").is_err());
        assert_eq!(WorkerKind::Email.to_string(), "email");
    }

    #[test]
    fn test_entity_paths() {
        let config = TaskBusConfig::default();
        assert_eq!(
            WorkerKind::Analytics.entity_path(&config).to_string(),
            "task-events/Subscriptions/analytics"
        );
        assert_eq!(WorkerKind::Tasks.entity_path(&config).to_string(), "tasks");
        assert!(!WorkerKind::Tasks.is_subscription());
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_effect_succeeds() {
        let event = TaskCreatedEvent::new("Write docs", "d", "John Doe");
        for kind in [
            WorkerKind::Analytics,
            WorkerKind::Audit,
            WorkerKind::Email,
            WorkerKind::Tasks,
        ] {
            let effect = kind.side_effect();
            assert_eq!(effect.name(), kind.as_ref());
            effect.apply(&event).await.unwrap();
        }
    }
}
