//! Addressing for queues, topic subscriptions and their dead-letter sub-queues.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Path segment the broker uses for a dead-letter sub-queue
pub const DEAD_LETTER_QUEUE_SUFFIX: &str = "$deadletterqueue";

/// Which queue of an entity a receiver reads from
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
pub enum SubQueue {
    #[default]
    Active,
    DeadLetter,
}

/// A queue, or a subscription of a topic, plus the sub-queue to read.
///
/// Displays in the broker's path form:
///
/// ```text
/// tasks
/// tasks/$deadletterqueue
/// task-events/Subscriptions/audit
/// task-events/Subscriptions/audit/$deadletterqueue
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityPath {
    entity: String,
    subscription: Option<String>,
    sub_queue: SubQueue,
}

impl EntityPath {
    pub fn queue(name: impl Into<String>) -> Self {
        Self {
            entity: name.into(),
            subscription: None,
            sub_queue: SubQueue::Active,
        }
    }

    pub fn subscription(topic: impl Into<String>, subscription: impl Into<String>) -> Self {
        Self {
            entity: topic.into(),
            subscription: Some(subscription.into()),
            sub_queue: SubQueue::Active,
        }
    }

    pub fn with_sub_queue(mut self, sub_queue: SubQueue) -> Self {
        self.sub_queue = sub_queue;
        self
    }

    /// The dead-letter sub-queue of this entity
    pub fn dead_letter(&self) -> Self {
        self.clone().with_sub_queue(SubQueue::DeadLetter)
    }

    /// The active queue of this entity
    pub fn active(&self) -> Self {
        self.clone().with_sub_queue(SubQueue::Active)
    }

    /// Queue name, or topic name for a subscription
    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn subscription_name(&self) -> Option<&str> {
        self.subscription.as_deref()
    }

    pub fn sub_queue(&self) -> SubQueue {
        self.sub_queue
    }

    pub fn is_dead_letter(&self) -> bool {
        self.sub_queue == SubQueue::DeadLetter
    }

    /// Label used for metrics and log fields (subscription name, else queue name)
    pub fn label(&self) -> &str {
        self.subscription.as_deref().unwrap_or(&self.entity)
    }
}

impl fmt::Display for EntityPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.entity)?;
        if let Some(sub) = &self.subscription {
            write!(f, "/Subscriptions/{}", sub)?;
        }
        if self.is_dead_letter() {
            write!(f, "/{}", DEAD_LETTER_QUEUE_SUFFIX)?;
        }
        Ok(())
    }
}

/// Message counts for one subscription
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionProperties {
    pub active_message_count: u64,
    pub dead_letter_message_count: u64,
}
