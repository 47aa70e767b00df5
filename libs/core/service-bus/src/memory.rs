//! In-memory queue backend for tests and single-process demos.
//!
//! Same observable semantics as the Redis backend:
//! - topics fan out to their subscriptions
//! - per-entity sequence numbers, oldest first
//! - peek-lock with lock expiry, abandon and max-delivery dead-lettering
//!
//! Timing uses `tokio::time`, so tests can drive lock expiry with a paused clock.

use crate::client::{BusClient, MessageReceiver, MessageSender};
use crate::config::{MAX_DELIVERY_COUNT_EXCEEDED, ReceiverOptions};
use crate::entity::{EntityPath, SubscriptionProperties};
use crate::error::{BusError, BusResult};
use crate::message::{LockToken, OutboundMessage, ReceivedMessage};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

/// Thread-safe in-memory bus. Clones share the same entities.
#[derive(Clone, Default)]
pub struct InMemoryBus {
    shared: Arc<Shared>,
}

#[derive(Default)]
struct Shared {
    state: Mutex<BusState>,
    /// Woken whenever a message becomes available somewhere
    arrivals: Notify,
}

#[derive(Default)]
struct BusState {
    /// topic -> subscription names
    topics: HashMap<String, BTreeSet<String>>,
    entities: HashMap<EntityPath, EntityLog>,
}

#[derive(Default)]
struct EntityLog {
    last_sequence: i64,
    messages: BTreeMap<i64, Stored>,
}

struct Stored {
    /// `delivery_count` holds deliveries so far; `lock_token` is always `None`
    message: ReceivedMessage,
    lock: Option<Lock>,
    visible_at: Instant,
}

struct Lock {
    token: LockToken,
    until: Instant,
}

impl Stored {
    fn is_available(&self, now: Instant) -> bool {
        let unlocked = self.lock.as_ref().is_none_or(|lock| lock.until <= now);
        unlocked && self.visible_at <= now
    }

    /// When this message could next be handed out, if it is not available now
    fn wakes_at(&self) -> Instant {
        match &self.lock {
            Some(lock) => lock.until.max(self.visible_at),
            None => self.visible_at,
        }
    }
}

impl EntityLog {
    fn append(&mut self, mut message: ReceivedMessage, now: Instant) -> i64 {
        self.last_sequence += 1;
        message.sequence_number = Some(self.last_sequence);
        message.lock_token = None;
        self.messages.insert(
            self.last_sequence,
            Stored {
                message,
                lock: None,
                visible_at: now,
            },
        );
        self.last_sequence
    }
}

impl BusState {
    fn subscription_exists(&self, topic: &str, subscription: &str) -> bool {
        self.topics
            .get(topic)
            .is_some_and(|subs| subs.contains(subscription))
    }

    fn ensure_entity(&mut self, path: &EntityPath) -> &mut EntityLog {
        self.entities.entry(path.clone()).or_default()
    }

    /// Lock up to `max` available messages. Messages past the delivery limit
    /// are moved to the dead-letter sub-queue instead. Returns the batch and
    /// whether anything was dead-lettered.
    fn lock_available(
        &mut self,
        path: &EntityPath,
        max: usize,
        options: &ReceiverOptions,
        now: Instant,
    ) -> (Vec<ReceivedMessage>, bool) {
        let Some(log) = self.entities.get_mut(path) else {
            return (Vec::new(), false);
        };

        let mut batch = Vec::new();
        let mut exhausted = Vec::new();

        for (seq, stored) in log.messages.iter_mut() {
            if batch.len() >= max {
                break;
            }
            if !stored.is_available(now) {
                continue;
            }
            if !path.is_dead_letter() && stored.message.delivery_count >= options.max_delivery_count
            {
                exhausted.push(*seq);
                continue;
            }

            stored.message.delivery_count += 1;
            let token = LockToken(Uuid::new_v4().to_string());
            stored.lock = Some(Lock {
                token: token.clone(),
                until: now + options.lock_duration,
            });

            let mut message = stored.message.clone();
            message.lock_token = Some(token);
            batch.push(message);
        }

        let exhausted: Vec<ReceivedMessage> = exhausted
            .into_iter()
            .filter_map(|seq| log.messages.remove(&seq))
            .map(|stored| stored.message)
            .collect();

        let moved = !exhausted.is_empty();
        for mut message in exhausted {
            warn!(
                entity = %path,
                message_id = %message.display_id(),
                delivery_count = message.delivery_count,
                "Max delivery count exceeded, dead-lettering"
            );
            message.dead_letter_reason = Some(MAX_DELIVERY_COUNT_EXCEEDED.to_string());
            message.dead_letter_error_description = Some(format!(
                "Message could not be consumed after {} delivery attempts.",
                message.delivery_count
            ));
            self.dead_letter_log(path).append(message, now);
        }

        (batch, moved)
    }

    fn dead_letter_log(&mut self, path: &EntityPath) -> &mut EntityLog {
        self.ensure_entity(&path.dead_letter())
    }

    fn next_wake(&self, path: &EntityPath) -> Option<Instant> {
        self.entities
            .get(path)?
            .messages
            .values()
            .map(Stored::wakes_at)
            .min()
    }

    /// Find the stored message whose lock `message` carries
    fn locked_mut(
        &mut self,
        path: &EntityPath,
        message: &ReceivedMessage,
        now: Instant,
    ) -> BusResult<&mut Stored> {
        let token = message
            .lock_token
            .as_ref()
            .ok_or_else(|| BusError::NotLocked(message.display_id()))?;
        let lock_lost = || BusError::LockLost(message.display_id());

        let seq = message.sequence_number.ok_or_else(lock_lost)?;
        let stored = self
            .entities
            .get_mut(path)
            .and_then(|log| log.messages.get_mut(&seq))
            .ok_or_else(lock_lost)?;

        let held = matches!(&stored.lock, Some(lock) if lock.token == *token && lock.until > now);
        if held {
            Ok(stored)
        } else {
            Err(lock_lost())
        }
    }
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of messages currently stored in `path`, locked or not
    pub async fn message_count(&self, path: &EntityPath) -> usize {
        let state = self.shared.state.lock().await;
        state
            .entities
            .get(path)
            .map(|log| log.messages.len())
            .unwrap_or(0)
    }

    /// Append a raw message to `path`, bypassing senders. Lets tests seed
    /// dead-letter sub-queues with bodies no producer would send.
    pub async fn inject(&self, path: &EntityPath, message: ReceivedMessage) -> i64 {
        let seq = {
            let mut state = self.shared.state.lock().await;
            state.ensure_entity(path).append(message, Instant::now())
        };
        self.shared.arrivals.notify_waiters();
        seq
    }
}

#[async_trait]
impl BusClient for InMemoryBus {
    async fn queue_sender(&self, queue: &str) -> BusResult<Arc<dyn MessageSender>> {
        Ok(Arc::new(InMemorySender {
            shared: self.shared.clone(),
            target: Target::Queue(queue.to_string()),
        }))
    }

    async fn topic_sender(&self, topic: &str) -> BusResult<Arc<dyn MessageSender>> {
        Ok(Arc::new(InMemorySender {
            shared: self.shared.clone(),
            target: Target::Topic(topic.to_string()),
        }))
    }

    async fn receiver(
        &self,
        path: EntityPath,
        options: ReceiverOptions,
    ) -> BusResult<Arc<dyn MessageReceiver>> {
        {
            let mut state = self.shared.state.lock().await;
            match path.subscription_name() {
                Some(sub) if !state.subscription_exists(path.entity(), sub) => {
                    return Err(BusError::EntityNotFound(path.to_string()));
                }
                Some(_) => {}
                None => {
                    state.ensure_entity(&path);
                }
            }
        }

        debug!(entity = %path, "Created in-memory receiver");
        Ok(Arc::new(InMemoryReceiver {
            shared: self.shared.clone(),
            path,
            options,
            closed: AtomicBool::new(false),
        }))
    }

    async fn ensure_subscription(&self, topic: &str, subscription: &str) -> BusResult<()> {
        let mut state = self.shared.state.lock().await;
        state
            .topics
            .entry(topic.to_string())
            .or_default()
            .insert(subscription.to_string());

        let path = EntityPath::subscription(topic, subscription);
        state.ensure_entity(&path);
        state.ensure_entity(&path.dead_letter());
        Ok(())
    }

    async fn subscription_properties(
        &self,
        topic: &str,
        subscription: &str,
    ) -> BusResult<SubscriptionProperties> {
        let state = self.shared.state.lock().await;
        let path = EntityPath::subscription(topic, subscription);
        if !state.subscription_exists(topic, subscription) {
            return Err(BusError::EntityNotFound(path.to_string()));
        }

        let count = |p: &EntityPath| {
            state
                .entities
                .get(p)
                .map(|log| log.messages.len() as u64)
                .unwrap_or(0)
        };

        Ok(SubscriptionProperties {
            active_message_count: count(&path),
            dead_letter_message_count: count(&path.dead_letter()),
        })
    }

    async fn health_check(&self) -> BusResult<()> {
        Ok(())
    }
}

enum Target {
    Queue(String),
    Topic(String),
}

struct InMemorySender {
    shared: Arc<Shared>,
    target: Target,
}

#[async_trait]
impl MessageSender for InMemorySender {
    fn entity(&self) -> &str {
        match &self.target {
            Target::Queue(name) | Target::Topic(name) => name,
        }
    }

    async fn send(&self, message: OutboundMessage) -> BusResult<()> {
        let now = Instant::now();
        let enqueued = Utc::now();
        {
            let mut state = self.shared.state.lock().await;
            match &self.target {
                Target::Queue(queue) => {
                    let received = ReceivedMessage::from_outbound(message, 0, enqueued);
                    state
                        .ensure_entity(&EntityPath::queue(queue))
                        .append(received, now);
                }
                Target::Topic(topic) => {
                    let subscriptions: Vec<String> = state
                        .topics
                        .get(topic)
                        .map(|subs| subs.iter().cloned().collect())
                        .unwrap_or_default();

                    if subscriptions.is_empty() {
                        debug!(topic = %topic, "No subscriptions, message dropped");
                    }

                    for sub in subscriptions {
                        let received = ReceivedMessage::from_outbound(message.clone(), 0, enqueued);
                        state
                            .ensure_entity(&EntityPath::subscription(topic, &sub))
                            .append(received, now);
                    }
                }
            }
        }
        self.shared.arrivals.notify_waiters();
        Ok(())
    }
}

struct InMemoryReceiver {
    shared: Arc<Shared>,
    path: EntityPath,
    options: ReceiverOptions,
    closed: AtomicBool,
}

impl InMemoryReceiver {
    fn ensure_open(&self) -> BusResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BusError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl MessageReceiver for InMemoryReceiver {
    fn entity_path(&self) -> &EntityPath {
        &self.path
    }

    async fn receive(
        &self,
        max_messages: usize,
        max_wait: Duration,
    ) -> BusResult<Vec<ReceivedMessage>> {
        self.ensure_open()?;
        if max_messages == 0 {
            return Ok(Vec::new());
        }

        let deadline = Instant::now() + max_wait;

        loop {
            // Register interest before looking, so a send between the check
            // and the wait still wakes us.
            let arrived = self.shared.arrivals.notified();

            let next_wake = {
                let mut state = self.shared.state.lock().await;
                let (batch, moved) =
                    state.lock_available(&self.path, max_messages, &self.options, Instant::now());
                if moved {
                    self.shared.arrivals.notify_waiters();
                }
                if !batch.is_empty() {
                    return Ok(batch);
                }
                state.next_wake(&self.path)
            };

            if Instant::now() >= deadline {
                return Ok(Vec::new());
            }

            let wake = next_wake.map_or(deadline, |at| at.min(deadline));
            tokio::select! {
                _ = arrived => {}
                _ = tokio::time::sleep_until(wake) => {}
            }
            self.ensure_open()?;
        }
    }

    async fn peek(
        &self,
        from_sequence_number: Option<i64>,
        max_messages: usize,
    ) -> BusResult<Vec<ReceivedMessage>> {
        self.ensure_open()?;
        let state = self.shared.state.lock().await;
        let Some(log) = state.entities.get(&self.path) else {
            return Ok(Vec::new());
        };

        Ok(log
            .messages
            .range(from_sequence_number.unwrap_or(i64::MIN)..)
            .take(max_messages)
            .map(|(_, stored)| stored.message.clone())
            .collect())
    }

    async fn complete(&self, message: &ReceivedMessage) -> BusResult<()> {
        self.ensure_open()?;
        let mut state = self.shared.state.lock().await;
        state.locked_mut(&self.path, message, Instant::now())?;
        if let (Some(seq), Some(log)) = (message.sequence_number, state.entities.get_mut(&self.path))
        {
            log.messages.remove(&seq);
        }
        Ok(())
    }

    async fn abandon(&self, message: &ReceivedMessage) -> BusResult<()> {
        self.ensure_open()?;
        let now = Instant::now();
        let mut state = self.shared.state.lock().await;
        let stored = state.locked_mut(&self.path, message, now)?;
        stored.lock = None;
        stored.visible_at = now + self.options.lock_duration;
        Ok(())
    }

    async fn dead_letter(
        &self,
        message: &ReceivedMessage,
        reason: &str,
        description: &str,
    ) -> BusResult<()> {
        self.ensure_open()?;
        let now = Instant::now();
        {
            let mut state = self.shared.state.lock().await;
            state.locked_mut(&self.path, message, now)?;

            let stored = message
                .sequence_number
                .and_then(|seq| state.entities.get_mut(&self.path)?.messages.remove(&seq));

            if let Some(stored) = stored {
                let mut dead = stored.message;
                dead.dead_letter_reason = Some(reason.to_string());
                dead.dead_letter_error_description = Some(description.to_string());
                state.dead_letter_log(&self.path).append(dead, now);
            }
        }
        self.shared.arrivals.notify_waiters();
        Ok(())
    }

    async fn close(&self) -> BusResult<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!(entity = %self.path, "Closed in-memory receiver");
        }
        Ok(())
    }
}
