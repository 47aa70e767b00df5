//! Service Bus
//!
//! Brokered messaging with peek-lock delivery: queues, topics with
//! subscriptions, and a dead-letter sub-queue per entity.
//!
//! ## Features
//!
//! - **Peek-lock**: received messages stay locked until completed, abandoned
//!   or dead-lettered; an expired lock makes the message available again
//! - **Delivery limit**: a message received `max_delivery_count` times is
//!   moved to the dead-letter sub-queue as `MaxDeliveryCountExceeded`
//! - **Fan-out**: a message sent to a topic is copied to every subscription
//! - **Backends**: [`RedisBus`] on Redis Streams, [`InMemoryBus`] for tests
//!   and local runs
//! - **Processor**: [`MessageProcessor`] drives a [`MessageHandler`] with
//!   bounded concurrency and graceful shutdown
//! - **Health endpoints and Prometheus metrics**
//!
//! ## Example
//!
//! ```ignore
//! use service_bus::{BusClient, EntityPath, MessageProcessor, ProcessorConfig, RedisBus};
//!
//! let bus: Arc<dyn BusClient> = Arc::new(RedisBus::new(redis));
//! bus.ensure_subscription("task-events", "audit").await?;
//!
//! let processor = MessageProcessor::new(
//!     bus,
//!     EntityPath::subscription("task-events", "audit"),
//!     AuditHandler,
//!     ProcessorConfig::new(),
//! );
//! processor.run(shutdown_rx).await?;
//! ```

mod client;
mod config;
mod entity;
mod error;
mod health;
mod memory;
mod message;
pub mod metrics;
mod processor;
mod streams;

pub use client::{BusClient, MessageReceiver, MessageSender};
pub use config::{ProcessorConfig, ReceiverOptions, MAX_DELIVERY_COUNT_EXCEEDED};
pub use entity::{EntityPath, SubQueue, SubscriptionProperties, DEAD_LETTER_QUEUE_SUFFIX};
pub use error::{BusError, BusResult, ErrorCategory};
pub use health::{health_router, HealthResponse, HealthState};
pub use memory::InMemoryBus;
pub use message::{ApplicationProperties, LockToken, OutboundMessage, ReceivedMessage};
pub use metrics::{init_metrics, BusMetrics};
pub use processor::{ErrorSource, MessageHandler, MessageProcessor, ProcessorState, TerminalAction};
pub use streams::{RedisBus, RedisBusConfig, RedisReceiver, RedisSender};
