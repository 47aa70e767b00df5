use super::{RedisBusConfig, codec, scripts, sequence_key};
use crate::client::MessageSender;
use crate::entity::EntityPath;
use crate::error::BusResult;
use crate::message::OutboundMessage;
use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use std::sync::Arc;
use tracing::debug;

enum Target {
    Queue { stream_key: String },
    Topic { registry_key: String, sub_prefix: String },
}

/// Sender for a queue stream or a topic's subscription streams
pub struct RedisSender {
    redis: ConnectionManager,
    entity: String,
    target: Target,
}

impl RedisSender {
    pub(crate) fn queue(
        redis: ConnectionManager,
        config: Arc<RedisBusConfig>,
        queue: &str,
    ) -> Self {
        Self {
            redis,
            entity: queue.to_string(),
            target: Target::Queue {
                stream_key: config.stream_key(&EntityPath::queue(queue)),
            },
        }
    }

    pub(crate) fn topic(
        redis: ConnectionManager,
        config: Arc<RedisBusConfig>,
        topic: &str,
    ) -> Self {
        Self {
            redis,
            entity: topic.to_string(),
            target: Target::Topic {
                registry_key: config.registry_key(topic),
                sub_prefix: config.subscription_prefix(topic),
            },
        }
    }
}

#[async_trait]
impl MessageSender for RedisSender {
    fn entity(&self) -> &str {
        &self.entity
    }

    async fn send(&self, message: OutboundMessage) -> BusResult<()> {
        let fields = codec::encode(&message, Utc::now())?;
        let mut conn = self.redis.clone();

        match &self.target {
            Target::Queue { stream_key } => {
                let mut invocation = scripts::APPEND.prepare_invoke();
                invocation.key(stream_key).key(sequence_key(stream_key));
                for (field, value) in &fields {
                    invocation.arg(*field).arg(value.as_slice());
                }
                let seq: i64 = invocation.invoke_async(&mut conn).await?;

                debug!(
                    queue = %self.entity,
                    message_id = ?message.message_id,
                    sequence_number = seq,
                    "Sent message"
                );
            }
            Target::Topic {
                registry_key,
                sub_prefix,
            } => {
                let mut invocation = scripts::PUBLISH.prepare_invoke();
                invocation.key(registry_key).arg(sub_prefix);
                for (field, value) in &fields {
                    invocation.arg(*field).arg(value.as_slice());
                }
                let reached: i64 = invocation.invoke_async(&mut conn).await?;

                debug!(
                    topic = %self.entity,
                    message_id = ?message.message_id,
                    subscriptions = reached,
                    "Published message"
                );
            }
        }

        Ok(())
    }
}
