//! Connection management for the queue backend.
//!
//! The task bus stores topics, subscriptions and dead-letter sub-queues in Redis
//! Streams. This crate owns how a process gets a healthy `ConnectionManager`:
//!
//! - [`redis::RedisConfig`] loads `REDIS_URL`/`REDIS_HOST` (with the `config` feature)
//! - [`redis::connect_from_config_with_retry`] retries startup connects with backoff
//! - [`redis::check_health`] backs readiness probes
//!
//! ```ignore
//! use core_config::FromEnv;
//! use database::redis::{connect_from_config_with_retry, RedisConfig};
//! use database::common::RetryConfig;
//!
//! let config = RedisConfig::from_env()?;
//! let conn = connect_from_config_with_retry(&config, Some(RetryConfig::for_startup())).await?;
//! ```

pub mod common;

#[cfg(feature = "redis")]
pub mod redis;

pub use common::{DatabaseError, DatabaseResult};
