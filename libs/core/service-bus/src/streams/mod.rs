//! Redis Streams queue backend.
//!
//! Layout for key prefix `taskbus`:
//!
//! ```text
//! taskbus:queue:tasks                          queue stream
//! taskbus:queue:tasks:dlq                      its dead-letter sub-queue
//! taskbus:topic:task-events:subscriptions      SET of subscription names
//! taskbus:topic:task-events:sub:audit          subscription stream
//! taskbus:topic:task-events:sub:audit:dlq      its dead-letter sub-queue
//! <stream>:seq                                 sequence counter per stream
//! ```
//!
//! Every stream is read through one consumer group. Pending entries are the
//! locked messages: their idle time is the lock age and the group's delivery
//! counter is the delivery count.

mod codec;
mod receiver;
mod scripts;
mod sender;

use crate::client::{BusClient, MessageReceiver, MessageSender};
use crate::config::ReceiverOptions;
use crate::entity::{EntityPath, SubscriptionProperties};
use crate::error::{BusError, BusResult};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisResult};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub use receiver::RedisReceiver;
pub use sender::RedisSender;

/// Settings for [`RedisBus`]
#[derive(Debug, Clone)]
pub struct RedisBusConfig {
    /// Prefix for every key the bus creates
    pub key_prefix: String,

    /// Consumer group used on every stream
    pub consumer_group: String,

    /// Pause between reads while a receive call waits for messages
    pub poll_interval: Duration,
}

impl Default for RedisBusConfig {
    fn default() -> Self {
        Self {
            key_prefix: "taskbus".to_string(),
            consumer_group: "taskbus".to_string(),
            poll_interval: Duration::from_millis(250),
        }
    }
}

impl RedisBusConfig {
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub(crate) fn stream_key(&self, path: &EntityPath) -> String {
        let base = match path.subscription_name() {
            Some(sub) => format!("{}{}", self.subscription_prefix(path.entity()), sub),
            None => format!("{}:queue:{}", self.key_prefix, path.entity()),
        };
        if path.is_dead_letter() {
            format!("{}:dlq", base)
        } else {
            base
        }
    }

    pub(crate) fn registry_key(&self, topic: &str) -> String {
        format!("{}:topic:{}:subscriptions", self.key_prefix, topic)
    }

    pub(crate) fn subscription_prefix(&self, topic: &str) -> String {
        format!("{}:topic:{}:sub:", self.key_prefix, topic)
    }
}

pub(crate) fn sequence_key(stream_key: &str) -> String {
    format!("{}:seq", stream_key)
}

/// `XGROUP CREATE ... MKSTREAM`, tolerating a group that already exists.
/// Starts at ID 0 so entries added before the group are still delivered.
pub(crate) async fn ensure_group(
    conn: &mut ConnectionManager,
    stream_key: &str,
    group: &str,
) -> BusResult<()> {
    let result: RedisResult<()> = redis::cmd("XGROUP")
        .arg("CREATE")
        .arg(stream_key)
        .arg(group)
        .arg("0")
        .arg("MKSTREAM")
        .query_async(conn)
        .await;

    match result {
        Ok(_) => {
            info!(stream = %stream_key, group = %group, "Created consumer group");
            Ok(())
        }
        Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
        Err(e) => Err(BusError::Redis(e)),
    }
}

/// Queue client over a shared `ConnectionManager`
#[derive(Clone)]
pub struct RedisBus {
    redis: ConnectionManager,
    config: Arc<RedisBusConfig>,
}

impl RedisBus {
    pub fn new(redis: ConnectionManager) -> Self {
        Self::with_config(redis, RedisBusConfig::default())
    }

    pub fn with_config(redis: ConnectionManager, config: RedisBusConfig) -> Self {
        Self {
            redis,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &RedisBusConfig {
        &self.config
    }

    /// Create the consumer group for a stream if it does not exist
    async fn ensure_group(&self, stream_key: &str) -> BusResult<()> {
        let mut conn = self.redis.clone();
        ensure_group(&mut conn, stream_key, &self.config.consumer_group).await
    }

    async fn subscription_exists(&self, topic: &str, subscription: &str) -> BusResult<bool> {
        let mut conn = self.redis.clone();
        let exists: bool = conn
            .sismember(self.config.registry_key(topic), subscription)
            .await?;
        Ok(exists)
    }
}

#[async_trait]
impl BusClient for RedisBus {
    async fn queue_sender(&self, queue: &str) -> BusResult<Arc<dyn MessageSender>> {
        Ok(Arc::new(RedisSender::queue(
            self.redis.clone(),
            self.config.clone(),
            queue,
        )))
    }

    async fn topic_sender(&self, topic: &str) -> BusResult<Arc<dyn MessageSender>> {
        Ok(Arc::new(RedisSender::topic(
            self.redis.clone(),
            self.config.clone(),
            topic,
        )))
    }

    async fn receiver(
        &self,
        path: EntityPath,
        options: ReceiverOptions,
    ) -> BusResult<Arc<dyn MessageReceiver>> {
        if let Some(sub) = path.subscription_name() {
            if !self.subscription_exists(path.entity(), sub).await? {
                return Err(BusError::EntityNotFound(path.to_string()));
            }
        }

        let stream_key = self.config.stream_key(&path);
        self.ensure_group(&stream_key).await?;

        Ok(Arc::new(RedisReceiver::new(
            self.redis.clone(),
            self.config.clone(),
            path,
            options,
        )))
    }

    async fn ensure_subscription(&self, topic: &str, subscription: &str) -> BusResult<()> {
        let mut conn = self.redis.clone();
        let added: i64 = conn
            .sadd(self.config.registry_key(topic), subscription)
            .await?;

        let path = EntityPath::subscription(topic, subscription);
        self.ensure_group(&self.config.stream_key(&path)).await?;
        self.ensure_group(&self.config.stream_key(&path.dead_letter()))
            .await?;

        if added > 0 {
            info!(topic = %topic, subscription = %subscription, "Registered subscription");
        } else {
            debug!(topic = %topic, subscription = %subscription, "Subscription already registered");
        }
        Ok(())
    }

    async fn subscription_properties(
        &self,
        topic: &str,
        subscription: &str,
    ) -> BusResult<SubscriptionProperties> {
        let path = EntityPath::subscription(topic, subscription);
        if !self.subscription_exists(topic, subscription).await? {
            return Err(BusError::EntityNotFound(path.to_string()));
        }

        let mut conn = self.redis.clone();
        let active: u64 = conn.xlen(self.config.stream_key(&path)).await?;
        let dead: u64 = conn.xlen(self.config.stream_key(&path.dead_letter())).await?;

        Ok(SubscriptionProperties {
            active_message_count: active,
            dead_letter_message_count: dead,
        })
    }

    async fn health_check(&self) -> BusResult<()> {
        let mut conn = self.redis.clone();
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        if pong != "PONG" {
            return Err(BusError::transient(format!(
                "Redis PING returned unexpected response: {}",
                pong
            )));
        }
        Ok(())
    }
}
