//! Receiver and processor configuration

use std::time::Duration;

/// Reason recorded when the broker dead-letters a message that was
/// delivered too many times.
pub const MAX_DELIVERY_COUNT_EXCEEDED: &str = "MaxDeliveryCountExceeded";

/// Peek-lock settings for a receiver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiverOptions {
    /// How long a received message stays invisible to other receivers
    pub lock_duration: Duration,

    /// Deliveries allowed before the broker dead-letters the message.
    /// Not enforced on dead-letter sub-queues.
    pub max_delivery_count: u32,
}

impl Default for ReceiverOptions {
    fn default() -> Self {
        Self {
            lock_duration: Duration::from_secs(30),
            max_delivery_count: 10,
        }
    }
}

impl ReceiverOptions {
    pub fn with_lock_duration(mut self, lock_duration: Duration) -> Self {
        self.lock_duration = lock_duration;
        self
    }

    pub fn with_max_delivery_count(mut self, max_delivery_count: u32) -> Self {
        self.max_delivery_count = max_delivery_count;
        self
    }
}

/// Configuration for [`MessageProcessor`](crate::MessageProcessor)
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Messages handled at the same time. Default 1 (serial).
    pub max_concurrent_calls: usize,

    /// Upper bound on one receive call before the loop checks for shutdown again
    pub max_wait_time: Duration,

    pub receiver: ReceiverOptions,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_calls: 1,
            max_wait_time: Duration::from_secs(5),
            receiver: ReceiverOptions::default(),
        }
    }
}

impl ProcessorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Values below 1 are raised to 1
    pub fn with_max_concurrent_calls(mut self, max: usize) -> Self {
        self.max_concurrent_calls = max.max(1);
        self
    }

    pub fn with_max_wait_time(mut self, wait: Duration) -> Self {
        self.max_wait_time = wait;
        self
    }

    pub fn with_receiver_options(mut self, options: ReceiverOptions) -> Self {
        self.receiver = options;
        self
    }
}
