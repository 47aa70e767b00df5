//! Sender, receiver and client traits implemented by each backend.

use crate::config::ReceiverOptions;
use crate::entity::{EntityPath, SubscriptionProperties};
use crate::error::BusResult;
use crate::message::{OutboundMessage, ReceivedMessage};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Sends messages to one queue or topic.
#[async_trait]
pub trait MessageSender: Send + Sync {
    /// Queue or topic name
    fn entity(&self) -> &str;

    async fn send(&self, message: OutboundMessage) -> BusResult<()>;
}

/// Peek-lock receiver bound to one entity path.
///
/// Messages returned by [`receive`](Self::receive) are locked to this receiver
/// until they are settled or the lock duration elapses.
#[async_trait]
pub trait MessageReceiver: Send + Sync {
    fn entity_path(&self) -> &EntityPath;

    /// Receive up to `max_messages`, waiting at most `max_wait` for the first one.
    /// An empty batch means nothing arrived in time.
    async fn receive(
        &self,
        max_messages: usize,
        max_wait: Duration,
    ) -> BusResult<Vec<ReceivedMessage>>;

    /// Read without locking, starting at `from_sequence_number` (or the oldest
    /// message when `None`), in sequence order.
    async fn peek(
        &self,
        from_sequence_number: Option<i64>,
        max_messages: usize,
    ) -> BusResult<Vec<ReceivedMessage>>;

    /// Remove the message from the entity for good.
    async fn complete(&self, message: &ReceivedMessage) -> BusResult<()>;

    /// Release the lock. The message is redelivered once the lock duration
    /// has passed, with its delivery count incremented.
    async fn abandon(&self, message: &ReceivedMessage) -> BusResult<()>;

    /// Move the message to the entity's dead-letter sub-queue.
    async fn dead_letter(
        &self,
        message: &ReceivedMessage,
        reason: &str,
        description: &str,
    ) -> BusResult<()>;

    /// Release the receiver. Later calls fail with `BusError::Closed`.
    async fn close(&self) -> BusResult<()>;
}

/// Entry point to a queue backend.
#[async_trait]
pub trait BusClient: Send + Sync {
    async fn queue_sender(&self, queue: &str) -> BusResult<Arc<dyn MessageSender>>;

    /// A topic sender fans each message out to every subscription of the topic.
    async fn topic_sender(&self, topic: &str) -> BusResult<Arc<dyn MessageSender>>;

    async fn receiver(
        &self,
        path: EntityPath,
        options: ReceiverOptions,
    ) -> BusResult<Arc<dyn MessageReceiver>>;

    /// Create the subscription if it does not exist yet.
    async fn ensure_subscription(&self, topic: &str, subscription: &str) -> BusResult<()>;

    async fn subscription_properties(
        &self,
        topic: &str,
        subscription: &str,
    ) -> BusResult<SubscriptionProperties>;

    /// Cheap round trip to the backend for readiness probes.
    async fn health_check(&self) -> BusResult<()>;
}
