use core_config::{env_list_or, env_or_default, env_parse_or, ConfigError, FromEnv};
use service_bus::ReceiverOptions;
use std::collections::BTreeSet;
use std::time::Duration;

/// Entity names and admin tuning shared by the API and the workers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskBusConfig {
    /// Topic the API publishes to and replays into
    pub topic: String,
    /// Queue used by the console producer and the `tasks` worker
    pub queue: String,
    /// Subscriptions the admin endpoints accept
    pub subscriptions: BTreeSet<String>,
    pub max_delivery_count: u32,
    pub lock_duration: Duration,
    pub peek_batch_size: usize,
    pub replay_batch_size: usize,
    pub replay_wait: Duration,
}

impl Default for TaskBusConfig {
    fn default() -> Self {
        Self {
            topic: "task-events".to_string(),
            queue: "tasks".to_string(),
            subscriptions: ["analytics", "audit", "email"]
                .into_iter()
                .map(String::from)
                .collect(),
            max_delivery_count: 10,
            lock_duration: Duration::from_secs(30),
            peek_batch_size: 100,
            replay_batch_size: 10,
            replay_wait: Duration::from_secs(5),
        }
    }
}

impl TaskBusConfig {
    pub fn receiver_options(&self) -> ReceiverOptions {
        ReceiverOptions::default()
            .with_lock_duration(self.lock_duration)
            .with_max_delivery_count(self.max_delivery_count)
    }

    pub fn is_known_subscription(&self, name: &str) -> bool {
        self.subscriptions.contains(name)
    }
}

fn positive(key: &str, value: usize) -> Result<usize, ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            details: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
}

impl FromEnv for TaskBusConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let subscriptions: BTreeSet<String> =
            env_list_or("TASKBUS_SUBSCRIPTIONS", &["analytics", "audit", "email"])
                .into_iter()
                .collect();
        if subscriptions.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "TASKBUS_SUBSCRIPTIONS".to_string(),
                details: "at least one subscription is required".to_string(),
            });
        }

        Ok(Self {
            topic: env_or_default("TASKBUS_TOPIC", &defaults.topic),
            queue: env_or_default("TASKBUS_QUEUE", &defaults.queue),
            subscriptions,
            max_delivery_count: env_parse_or(
                "TASKBUS_MAX_DELIVERY_COUNT",
                defaults.max_delivery_count,
            )?,
            lock_duration: Duration::from_secs(env_parse_or("TASKBUS_LOCK_DURATION_SECS", 30)?),
            peek_batch_size: positive(
                "TASKBUS_PEEK_BATCH_SIZE",
                env_parse_or("TASKBUS_PEEK_BATCH_SIZE", defaults.peek_batch_size)?,
            )?,
            replay_batch_size: positive(
                "TASKBUS_REPLAY_BATCH_SIZE",
                env_parse_or("TASKBUS_REPLAY_BATCH_SIZE", defaults.replay_batch_size)?,
            )?,
            replay_wait: Duration::from_secs(env_parse_or("TASKBUS_REPLAY_WAIT_SECS", 5)?),
        })
    }
}
