use super::{RedisBusConfig, codec, ensure_group, scripts, sequence_key};
use crate::client::MessageReceiver;
use crate::config::{MAX_DELIVERY_COUNT_EXCEEDED, ReceiverOptions};
use crate::entity::EntityPath;
use crate::error::{BusError, BusResult};
use crate::message::ReceivedMessage;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::{StreamClaimReply, StreamPendingCountReply, StreamRangeReply, StreamReadReply};
use redis::RedisResult;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

/// Peek-lock receiver over one stream and its consumer group
pub struct RedisReceiver {
    redis: ConnectionManager,
    config: Arc<RedisBusConfig>,
    path: EntityPath,
    options: ReceiverOptions,
    stream_key: String,
    consumer_id: String,
    closed: AtomicBool,
}

impl RedisReceiver {
    pub(crate) fn new(
        redis: ConnectionManager,
        config: Arc<RedisBusConfig>,
        path: EntityPath,
        options: ReceiverOptions,
    ) -> Self {
        let stream_key = config.stream_key(&path);
        Self {
            redis,
            config,
            path,
            options,
            stream_key,
            consumer_id: format!("receiver-{}", Uuid::now_v7()),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> BusResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BusError::Closed);
        }
        Ok(())
    }

    fn lock_ms(&self) -> u64 {
        self.options.lock_duration.as_millis() as u64
    }

    fn group(&self) -> &str {
        &self.config.consumer_group
    }

    /// The stream was deleted and recreated by a later XADD, which drops the group
    async fn recreate_group(&self) -> BusResult<()> {
        warn!(entity = %self.path, stream = %self.stream_key, "Consumer group missing, recreating");
        let mut conn = self.redis.clone();
        ensure_group(&mut conn, &self.stream_key, self.group()).await
    }

    async fn try_receive(&self, max: usize) -> BusResult<Vec<ReceivedMessage>> {
        let mut batch = self.reclaim_expired(max).await?;
        if batch.len() < max {
            batch.extend(self.read_new(max - batch.len()).await?);
        }
        Ok(batch)
    }

    /// Take over entries whose lock expired, or dead-letter them once they
    /// have used up their deliveries.
    async fn reclaim_expired(&self, max: usize) -> BusResult<Vec<ReceivedMessage>> {
        let mut conn = self.redis.clone();

        let pending: RedisResult<StreamPendingCountReply> = redis::cmd("XPENDING")
            .arg(&self.stream_key)
            .arg(self.group())
            .arg("IDLE")
            .arg(self.lock_ms())
            .arg("-")
            .arg("+")
            .arg(max)
            .query_async(&mut conn)
            .await;

        let pending = match pending {
            Ok(reply) => reply.ids,
            Err(e) if e.to_string().contains("NOGROUP") => {
                self.recreate_group().await?;
                return Ok(Vec::new());
            }
            Err(e) => return Err(BusError::Redis(e)),
        };

        let mut claimed = Vec::new();
        for entry in pending {
            let times_delivered = entry.times_delivered as u64;

            if !self.path.is_dead_letter()
                && times_delivered >= u64::from(self.options.max_delivery_count)
            {
                self.move_exhausted(&entry.id, times_delivered).await?;
                continue;
            }

            let reply: StreamClaimReply = redis::cmd("XCLAIM")
                .arg(&self.stream_key)
                .arg(self.group())
                .arg(&self.consumer_id)
                .arg(self.lock_ms())
                .arg(&entry.id)
                .query_async(&mut conn)
                .await?;

            for stream_id in reply.ids {
                let mut message = codec::decode(&stream_id)?;
                let deliveries = times_delivered + 1;
                message.delivery_count += deliveries as u32;
                message.lock_token = Some(codec::lock_token(&stream_id.id, deliveries));
                claimed.push(message);
            }
        }

        if !claimed.is_empty() {
            warn!(
                entity = %self.path,
                count = claimed.len(),
                "Reclaimed messages with expired locks"
            );
        }
        Ok(claimed)
    }

    async fn move_exhausted(&self, id: &str, times_delivered: u64) -> BusResult<()> {
        let dlq_key = self.config.stream_key(&self.path.dead_letter());
        let mut conn = self.redis.clone();

        let moved: i64 = scripts::DEAD_LETTER
            .key(&self.stream_key)
            .key(&dlq_key)
            .key(sequence_key(&dlq_key))
            .arg(self.group())
            .arg(id)
            .arg("idle")
            .arg(&self.consumer_id)
            .arg(times_delivered)
            .arg(self.lock_ms())
            .arg(MAX_DELIVERY_COUNT_EXCEEDED)
            .arg(format!(
                "Message could not be consumed after {} delivery attempts.",
                times_delivered
            ))
            .arg(times_delivered)
            .invoke_async(&mut conn)
            .await?;

        if moved == 1 {
            warn!(
                entity = %self.path,
                stream_id = %id,
                delivery_count = times_delivered,
                "Max delivery count exceeded, dead-lettered"
            );
        }
        Ok(())
    }

    async fn read_new(&self, count: usize) -> BusResult<Vec<ReceivedMessage>> {
        let mut conn = self.redis.clone();

        let result: RedisResult<Option<StreamReadReply>> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(self.group())
            .arg(&self.consumer_id)
            .arg("COUNT")
            .arg(count)
            .arg("STREAMS")
            .arg(&self.stream_key)
            .arg(">")
            .query_async(&mut conn)
            .await;

        let reply = match result {
            Ok(Some(reply)) => reply,
            Ok(None) => return Ok(Vec::new()),
            Err(e) if e.to_string().contains("NOGROUP") => {
                self.recreate_group().await?;
                return Ok(Vec::new());
            }
            Err(e) => return Err(BusError::Redis(e)),
        };

        let mut messages = Vec::new();
        for key in reply.keys {
            for stream_id in key.ids {
                let mut message = codec::decode(&stream_id)?;
                message.delivery_count += 1;
                message.lock_token = Some(codec::lock_token(&stream_id.id, 1));
                messages.push(message);
            }
        }
        Ok(messages)
    }

    /// Stream ID and delivery counter from the message's lock token
    fn lock_of<'a>(&self, message: &'a ReceivedMessage) -> BusResult<(&'a str, u64)> {
        let token = message
            .lock_token
            .as_ref()
            .ok_or_else(|| BusError::NotLocked(message.display_id()))?;
        codec::parse_lock_token(token).ok_or_else(|| BusError::LockLost(message.display_id()))
    }

    fn settled(&self, result: i64, message: &ReceivedMessage) -> BusResult<()> {
        if result == 1 {
            Ok(())
        } else {
            Err(BusError::LockLost(message.display_id()))
        }
    }
}

#[async_trait]
impl MessageReceiver for RedisReceiver {
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
            let batch = self.try_receive(max_messages).await?;
            let now = Instant::now();
            if !batch.is_empty() || now >= deadline {
                return Ok(batch);
            }

            tokio::time::sleep(self.config.poll_interval.min(deadline - now)).await;
            self.ensure_open()?;
        }
    }

    async fn peek(
        &self,
        from_sequence_number: Option<i64>,
        max_messages: usize,
    ) -> BusResult<Vec<ReceivedMessage>> {
        self.ensure_open()?;
        let mut conn = self.redis.clone();

        let start = from_sequence_number
            .map(codec::stream_id_for)
            .unwrap_or_else(|| "-".to_string());

        let reply: StreamRangeReply = redis::cmd("XRANGE")
            .arg(&self.stream_key)
            .arg(start)
            .arg("+")
            .arg("COUNT")
            .arg(max_messages)
            .query_async(&mut conn)
            .await?;

        reply.ids.iter().map(codec::decode).collect()
    }

    async fn complete(&self, message: &ReceivedMessage) -> BusResult<()> {
        self.ensure_open()?;
        let (id, deliveries) = self.lock_of(message)?;
        let mut conn = self.redis.clone();

        let result: i64 = scripts::COMPLETE
            .key(&self.stream_key)
            .arg(self.group())
            .arg(id)
            .arg(&self.consumer_id)
            .arg(deliveries)
            .arg(self.lock_ms())
            .invoke_async(&mut conn)
            .await?;

        debug!(entity = %self.path, stream_id = %id, "Completed message");
        self.settled(result, message)
    }

    async fn abandon(&self, message: &ReceivedMessage) -> BusResult<()> {
        self.ensure_open()?;
        let (id, deliveries) = self.lock_of(message)?;
        let mut conn = self.redis.clone();

        let result: i64 = scripts::ABANDON
            .key(&self.stream_key)
            .arg(self.group())
            .arg(id)
            .arg(&self.consumer_id)
            .arg(deliveries)
            .arg(self.lock_ms())
            .invoke_async(&mut conn)
            .await?;

        debug!(entity = %self.path, stream_id = %id, "Abandoned message");
        self.settled(result, message)
    }

    async fn dead_letter(
        &self,
        message: &ReceivedMessage,
        reason: &str,
        description: &str,
    ) -> BusResult<()> {
        self.ensure_open()?;
        let (id, deliveries) = self.lock_of(message)?;
        let dlq_key = self.config.stream_key(&self.path.dead_letter());
        let mut conn = self.redis.clone();

        let result: i64 = scripts::DEAD_LETTER
            .key(&self.stream_key)
            .key(&dlq_key)
            .key(sequence_key(&dlq_key))
            .arg(self.group())
            .arg(id)
            .arg("owner")
            .arg(&self.consumer_id)
            .arg(deliveries)
            .arg(self.lock_ms())
            .arg(reason)
            .arg(description)
            .arg(message.delivery_count)
            .invoke_async(&mut conn)
            .await?;

        debug!(entity = %self.path, stream_id = %id, reason = %reason, "Dead-lettered message");
        self.settled(result, message)
    }

    async fn close(&self) -> BusResult<()> {
        // Pending entries stay with the group and are reclaimed by the next
        // receiver once their lock expires.
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!(entity = %self.path, consumer = %self.consumer_id, "Closed receiver");
        }
        Ok(())
    }
}
