//! Dead-letter inspection and replay for the configured subscriptions.

use service_bus::{
    BusClient, BusResult, EntityPath, MessageReceiver, MessageSender, ReceivedMessage,
    ReceiverOptions,
};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

use crate::config::TaskBusConfig;
use crate::error::{TaskError, TaskResult};
use crate::models::{DeadLetterInspection, DeadLetterRecord, ReplayOutcome};

/// Reads and replays the dead-letter sub-queues of one topic's subscriptions.
///
/// Only subscriptions in the configured set are accepted; any other name
/// fails with [`TaskError::NotFound`] before the backend is touched.
#[derive(Clone)]
pub struct DeadLetterAdmin {
    client: Arc<dyn BusClient>,
    topic: String,
    subscriptions: BTreeSet<String>,
    receiver_options: ReceiverOptions,
    peek_batch_size: usize,
    replay_batch_size: usize,
    replay_wait: Duration,
}

impl DeadLetterAdmin {
    pub fn new(client: Arc<dyn BusClient>, config: &TaskBusConfig) -> Self {
        Self {
            client,
            topic: config.topic.clone(),
            subscriptions: config.subscriptions.clone(),
            receiver_options: config.receiver_options(),
            peek_batch_size: config.peek_batch_size.max(1),
            replay_batch_size: config.replay_batch_size.max(1),
            replay_wait: config.replay_wait,
        }
    }

    pub fn subscriptions(&self) -> impl Iterator<Item = &str> {
        self.subscriptions.iter().map(String::as_str)
    }

    fn dead_letter_path(&self, subscription: &str) -> TaskResult<EntityPath> {
        if !self.subscriptions.contains(subscription) {
            return Err(TaskError::NotFound(subscription.to_string()));
        }
        Ok(EntityPath::subscription(&self.topic, subscription).dead_letter())
    }

    /// Dead-letter count of every configured subscription
    pub async fn list(&self) -> TaskResult<BTreeMap<String, u64>> {
        let mut counts = BTreeMap::new();
        for subscription in &self.subscriptions {
            let properties = self
                .client
                .subscription_properties(&self.topic, subscription)
                .await?;
            counts.insert(subscription.clone(), properties.dead_letter_message_count);
        }
        Ok(counts)
    }

    /// Every dead-lettered message of `subscription`, oldest first, without
    /// locking or removing anything.
    #[instrument(skip(self))]
    pub async fn inspect(&self, subscription: &str) -> TaskResult<DeadLetterInspection> {
        let messages = self.peek_all(subscription).await?;
        let records: Vec<DeadLetterRecord> = messages.iter().map(DeadLetterRecord::from).collect();

        Ok(DeadLetterInspection {
            subscription: subscription.to_string(),
            total_count: records.len(),
            messages: records,
        })
    }

    pub async fn peek_all(&self, subscription: &str) -> TaskResult<Vec<ReceivedMessage>> {
        let path = self.dead_letter_path(subscription)?;
        let receiver = self
            .client
            .receiver(path, self.receiver_options.clone())
            .await?;

        let result = self.peek_pages(receiver.as_ref()).await;
        close(receiver.as_ref()).await;
        Ok(result?)
    }

    /// Page through the sub-queue until a page comes back short.
    async fn peek_pages(&self, receiver: &dyn MessageReceiver) -> BusResult<Vec<ReceivedMessage>> {
        let mut messages = Vec::new();
        let mut from_sequence_number = None;

        loop {
            let page = receiver
                .peek(from_sequence_number, self.peek_batch_size)
                .await?;
            let full = page.len() >= self.peek_batch_size;
            let last_sequence = page.last().and_then(|m| m.sequence_number);
            messages.extend(page);

            if !full {
                break;
            }
            match last_sequence {
                Some(seq) => from_sequence_number = Some(seq + 1),
                None => {
                    warn!(
                        entity = %receiver.entity_path(),
                        peeked = messages.len(),
                        "Last peeked message has no sequence number, stopping"
                    );
                    break;
                }
            }
        }

        Ok(messages)
    }

    /// Re-publish every dead-lettered message of `subscription` to the topic.
    ///
    /// A message is completed only after its copy was sent. Any failure
    /// abandons it so a later run can try again, and is recorded in the
    /// outcome without stopping the run.
    #[instrument(skip(self))]
    pub async fn replay(&self, subscription: &str) -> TaskResult<ReplayOutcome> {
        let path = self.dead_letter_path(subscription)?;
        let receiver = self
            .client
            .receiver(path, self.receiver_options.clone())
            .await?;

        let result = match self.client.topic_sender(&self.topic).await {
            Ok(sender) => self.replay_batches(receiver.as_ref(), sender.as_ref()).await,
            Err(e) => Err(e.into()),
        };
        close(receiver.as_ref()).await;

        let outcome = result?;
        info!(
            subscription = %subscription,
            successful = outcome.successful,
            failed = outcome.failed,
            "Dead-letter replay finished"
        );
        Ok(outcome)
    }

    async fn replay_batches(
        &self,
        receiver: &dyn MessageReceiver,
        sender: &dyn MessageSender,
    ) -> TaskResult<ReplayOutcome> {
        let mut outcome = ReplayOutcome::default();
        // A message abandoned in this run can come back once its lock window
        // passes; it is not attempted twice.
        let mut attempted: HashSet<String> = HashSet::new();

        loop {
            let batch = match receiver
                .receive(self.replay_batch_size, self.replay_wait)
                .await
            {
                Ok(batch) => batch,
                Err(e) if outcome.total() > 0 => {
                    warn!(error = %e, "Receive failed mid-replay, returning partial outcome");
                    break;
                }
                Err(e) => return Err(e.into()),
            };
            if batch.is_empty() {
                break;
            }

            let mut fresh = 0;
            for message in &batch {
                let key = replay_key(message);
                if !attempted.insert(key) {
                    abandon(receiver, message).await;
                    continue;
                }
                fresh += 1;

                match replay_one(receiver, sender, message).await {
                    Ok(()) => outcome.record_success(),
                    Err(e) => {
                        warn!(message_id = %message.display_id(), error = %e, "Replay failed");
                        abandon(receiver, message).await;
                        outcome.record_failure(message.display_id(), &e);
                    }
                }
            }

            if fresh == 0 {
                break;
            }
        }

        Ok(outcome)
    }
}

async fn replay_one(
    receiver: &dyn MessageReceiver,
    sender: &dyn MessageSender,
    message: &ReceivedMessage,
) -> BusResult<()> {
    sender.send(message.to_outbound()).await?;
    receiver.complete(message).await
}

fn replay_key(message: &ReceivedMessage) -> String {
    match message.sequence_number {
        Some(seq) => seq.to_string(),
        None => message.display_id(),
    }
}

async fn abandon(receiver: &dyn MessageReceiver, message: &ReceivedMessage) {
    if let Err(e) = receiver.abandon(message).await {
        warn!(message_id = %message.display_id(), error = %e, "Abandon failed, lock will expire");
    }
}

async fn close(receiver: &dyn MessageReceiver) {
    if let Err(e) = receiver.close().await {
        warn!(entity = %receiver.entity_path(), error = %e, "Failed to close receiver");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TaskCreatedEvent;
    use async_trait::async_trait;
    use chrono::Utc;
    use service_bus::{BusError, InMemoryBus, OutboundMessage, SubscriptionProperties};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    const TOPIC: &str = "task-events";

    /// Records what the admin asks of the backend and injects failures
    #[derive(Default)]
    struct Probe {
        peeks: Mutex<Vec<(Option<i64>, usize)>>,
        receives: Mutex<Vec<usize>>,
        fail_complete: AtomicBool,
        strip_sequence: AtomicBool,
        fail_send_ids: Mutex<HashSet<String>>,
    }

    struct ProbedBus {
        inner: InMemoryBus,
        probe: Arc<Probe>,
    }

    struct ProbedReceiver {
        inner: Arc<dyn MessageReceiver>,
        probe: Arc<Probe>,
    }

    struct ProbedSender {
        inner: Arc<dyn MessageSender>,
        probe: Arc<Probe>,
    }

    #[async_trait]
    impl MessageReceiver for ProbedReceiver {
        fn entity_path(&self) -> &EntityPath {
            self.inner.entity_path()
        }

        async fn receive(&self, max: usize, wait: Duration) -> BusResult<Vec<ReceivedMessage>> {
            let batch = self.inner.receive(max, wait).await?;
            self.probe.receives.lock().unwrap().push(batch.len());
            Ok(batch)
        }

        async fn peek(&self, from: Option<i64>, max: usize) -> BusResult<Vec<ReceivedMessage>> {
            self.probe.peeks.lock().unwrap().push((from, max));
            let mut page = self.inner.peek(from, max).await?;
            if self.probe.strip_sequence.load(Ordering::SeqCst) {
                page.iter_mut().for_each(|m| m.sequence_number = None);
            }
            Ok(page)
        }

        async fn complete(&self, message: &ReceivedMessage) -> BusResult<()> {
            if self.probe.fail_complete.load(Ordering::SeqCst) {
                return Err(BusError::LockLost(message.display_id()));
            }
            self.inner.complete(message).await
        }

        async fn abandon(&self, message: &ReceivedMessage) -> BusResult<()> {
            self.inner.abandon(message).await
        }

        async fn dead_letter(&self, message: &ReceivedMessage, r: &str, d: &str) -> BusResult<()> {
            self.inner.dead_letter(message, r, d).await
        }

        async fn close(&self) -> BusResult<()> {
            self.inner.close().await
        }
    }

    #[async_trait]
    impl MessageSender for ProbedSender {
        fn entity(&self) -> &str {
            self.inner.entity()
        }

        async fn send(&self, message: OutboundMessage) -> BusResult<()> {
            let failing = message
                .message_id
                .as_ref()
                .is_some_and(|id| self.probe.fail_send_ids.lock().unwrap().contains(id));
            if failing {
                return Err(BusError::transient("topic is throttled"));
            }
            self.inner.send(message).await
        }
    }

    #[async_trait]
    impl BusClient for ProbedBus {
        async fn queue_sender(&self, queue: &str) -> BusResult<Arc<dyn MessageSender>> {
            self.inner.queue_sender(queue).await
        }

        async fn topic_sender(&self, topic: &str) -> BusResult<Arc<dyn MessageSender>> {
            Ok(Arc::new(ProbedSender {
                inner: self.inner.topic_sender(topic).await?,
                probe: self.probe.clone(),
            }))
        }

        async fn receiver(
            &self,
            path: EntityPath,
            options: ReceiverOptions,
        ) -> BusResult<Arc<dyn MessageReceiver>> {
            Ok(Arc::new(ProbedReceiver {
                inner: self.inner.receiver(path, options).await?,
                probe: self.probe.clone(),
            }))
        }

        async fn ensure_subscription(&self, topic: &str, subscription: &str) -> BusResult<()> {
            self.inner.ensure_subscription(topic, subscription).await
        }

        async fn subscription_properties(
            &self,
            topic: &str,
            subscription: &str,
        ) -> BusResult<SubscriptionProperties> {
            self.inner.subscription_properties(topic, subscription).await
        }

        async fn health_check(&self) -> BusResult<()> {
            self.inner.health_check().await
        }
    }

    async fn setup() -> (InMemoryBus, Arc<Probe>, DeadLetterAdmin) {
        let bus = InMemoryBus::new();
        for sub in ["analytics", "audit", "email"] {
            bus.ensure_subscription(TOPIC, sub).await.unwrap();
        }
        let probe = Arc::new(Probe::default());
        let client = Arc::new(ProbedBus {
            inner: bus.clone(),
            probe: probe.clone(),
        });
        let admin = DeadLetterAdmin::new(client, &TaskBusConfig::default());
        (bus, probe, admin)
    }

    fn dlq(subscription: &str) -> EntityPath {
        EntityPath::subscription(TOPIC, subscription).dead_letter()
    }

    fn dead_lettered(id: &str, body: Vec<u8>) -> ReceivedMessage {
        ReceivedMessage {
            body,
            subject: Some(TaskCreatedEvent::SUBJECT.into()),
            content_type: Some("application/json".into()),
            message_id: Some(id.into()),
            correlation_id: Some(format!("corr-{id}")),
            application_properties: Default::default(),
            sequence_number: None,
            delivery_count: 10,
            enqueued_time: Utc::now(),
            dead_letter_reason: Some("MaxDeliveryCountExceeded".into()),
            dead_letter_error_description: Some("too many deliveries".into()),
            lock_token: None,
        }
    }

    async fn seed(bus: &InMemoryBus, subscription: &str, count: usize) {
        for i in 0..count {
            let event = TaskCreatedEvent::new(format!("Task {i}"), "d", "a");
            let body = serde_json::to_vec(&event).unwrap();
            bus.inject(&dlq(subscription), dead_lettered(&format!("m-{i}"), body))
                .await;
        }
    }

    #[tokio::test]
    async fn test_unknown_subscription_is_rejected() {
        let (_bus, probe, admin) = setup().await;

        let err = admin.inspect("billing").await.unwrap_err();
        assert!(matches!(err, TaskError::NotFound(ref name) if name == "billing"));
        assert_eq!(err.to_string(), "Subscription 'billing' does not exist.");

        assert!(matches!(
            admin.replay("billing").await,
            Err(TaskError::NotFound(_))
        ));
        assert!(probe.peeks.lock().unwrap().is_empty());
        assert!(probe.receives.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_counts_configured_subscriptions() {
        let (bus, _probe, admin) = setup().await;
        seed(&bus, "audit", 3).await;
        seed(&bus, "email", 1).await;

        let counts = admin.list().await.unwrap();
        assert_eq!(counts.len(), 3);
        assert_eq!(counts["analytics"], 0);
        assert_eq!(counts["audit"], 3);
        assert_eq!(counts["email"], 1);
    }

    #[tokio::test]
    async fn test_inspect_keeps_order_and_raw_bodies() {
        let (bus, _probe, admin) = setup().await;
        seed(&bus, "audit", 2).await;
        bus.inject(&dlq("audit"), dead_lettered("bad", b"{not json".to_vec()))
            .await;

        let inspection = admin.inspect("audit").await.unwrap();
        assert_eq!(inspection.subscription, "audit");
        assert_eq!(inspection.total_count, 3);

        let ids: Vec<_> = inspection
            .messages
            .iter()
            .map(|r| r.message_id.as_deref().unwrap())
            .collect();
        assert_eq!(ids, vec!["m-0", "m-1", "bad"]);
        assert!(inspection.messages[0].body.is_some());
        assert_eq!(inspection.messages[2].raw_body.as_deref(), Some("{not json"));

        // Peeking is non-destructive
        assert_eq!(bus.message_count(&dlq("audit")).await, 3);
        assert_eq!(admin.inspect("audit").await.unwrap().total_count, 3);
    }

    #[tokio::test]
    async fn test_full_page_triggers_another_peek() {
        let (bus, probe, admin) = setup().await;
        seed(&bus, "email", 100).await;

        let inspection = admin.inspect("email").await.unwrap();
        assert_eq!(inspection.total_count, 100);
        assert_eq!(
            *probe.peeks.lock().unwrap(),
            vec![(None, 100), (Some(101), 100)]
        );
    }

    #[tokio::test]
    async fn test_missing_sequence_number_stops_paging() {
        let (bus, probe, _) = setup().await;
        seed(&bus, "audit", 5).await;
        probe.strip_sequence.store(true, Ordering::SeqCst);

        let config = TaskBusConfig {
            peek_batch_size: 2,
            ..TaskBusConfig::default()
        };
        let client = Arc::new(ProbedBus {
            inner: bus.clone(),
            probe: probe.clone(),
        });
        let admin = DeadLetterAdmin::new(client, &config);

        let inspection = admin.inspect("audit").await.unwrap();
        assert_eq!(inspection.total_count, 2);
        assert_eq!(probe.peeks.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_replay_drains_in_batches() {
        let (bus, probe, admin) = setup().await;
        seed(&bus, "audit", 12).await;

        let outcome = admin.replay("audit").await.unwrap();

        assert_eq!(outcome.successful, 12);
        assert_eq!(outcome.failed, 0);
        assert_eq!(outcome.total(), 12);
        assert_eq!(*probe.receives.lock().unwrap(), vec![10, 2, 0]);
        assert_eq!(bus.message_count(&dlq("audit")).await, 0);

        // Copies go back through the topic to every subscription
        for sub in ["analytics", "audit", "email"] {
            let live = EntityPath::subscription(TOPIC, sub);
            assert_eq!(bus.message_count(&live).await, 12);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_replay_keeps_metadata() {
        let (bus, _probe, admin) = setup().await;
        seed(&bus, "email", 1).await;

        admin.replay("email").await.unwrap();

        let receiver = bus
            .receiver(
                EntityPath::subscription(TOPIC, "email"),
                ReceiverOptions::default(),
            )
            .await
            .unwrap();
        let copy = receiver
            .receive(1, Duration::from_millis(10))
            .await
            .unwrap()
            .pop()
            .unwrap();
        assert_eq!(copy.message_id.as_deref(), Some("m-0"));
        assert_eq!(copy.correlation_id.as_deref(), Some("corr-m-0"));
        assert_eq!(copy.subject.as_deref(), Some("TaskCreated"));
        assert_eq!(copy.content_type.as_deref(), Some("application/json"));
        assert_eq!(copy.delivery_count, 1);
        assert!(copy.dead_letter_reason.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_complete_counts_only_as_failure() {
        let (bus, probe, admin) = setup().await;
        seed(&bus, "audit", 2).await;
        probe.fail_complete.store(true, Ordering::SeqCst);

        let outcome = admin.replay("audit").await.unwrap();

        assert_eq!(outcome.successful, 0);
        assert_eq!(outcome.failed, 2);
        assert_eq!(outcome.errors[0].message_id, "m-0");
        assert!(outcome.errors[0].error_description.contains("lock"));
        assert_eq!(bus.message_count(&dlq("audit")).await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_failure_does_not_stop_the_rest() {
        let (bus, probe, admin) = setup().await;
        seed(&bus, "audit", 3).await;
        probe.fail_send_ids.lock().unwrap().insert("m-1".to_string());

        let outcome = admin.replay("audit").await.unwrap();

        assert_eq!(outcome.successful, 2);
        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.errors[0].message_id, "m-1");
        assert_eq!(bus.message_count(&dlq("audit")).await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_lock_does_not_replay_twice() {
        let (bus, probe, _) = setup().await;
        seed(&bus, "audit", 1).await;
        probe.fail_send_ids.lock().unwrap().insert("m-0".to_string());

        let config = TaskBusConfig {
            lock_duration: Duration::from_secs(1),
            ..TaskBusConfig::default()
        };
        let client = Arc::new(ProbedBus {
            inner: bus.clone(),
            probe: probe.clone(),
        });
        let admin = DeadLetterAdmin::new(client, &config);

        let outcome = admin.replay("audit").await.unwrap();
        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.errors.len(), 1);
    }
}
