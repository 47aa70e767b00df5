//! Queue client error types and error categorization
//!
//! The category decides what a caller does next:
//! - **Transient**: the backend may succeed on retry (connection drop, timeout)
//! - **Permanent**: retrying the same call cannot help

use std::time::Duration;
use thiserror::Error;

/// Category of error for determining retry behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorCategory {
    Transient,
    Permanent,
}

impl ErrorCategory {
    const MAX_BACKOFF_SECS: u64 = 30;

    /// Delay before the next receive after `consecutive_errors` failures in a row.
    ///
    /// 2s, 4s, 8s, 16s, then 30s from the fifth failure on. Permanent errors
    /// wait a flat second so a bad reply cannot spin the loop.
    pub fn backoff_delay(&self, consecutive_errors: u32) -> Duration {
        match self {
            ErrorCategory::Permanent => Duration::from_secs(1),
            ErrorCategory::Transient => Duration::from_secs(std::cmp::min(
                2u64.pow(consecutive_errors.min(5)),
                Self::MAX_BACKOFF_SECS,
            )),
        }
    }
}

/// Server replies that clear up on their own (restart, failover, busy script)
const TRANSIENT_REPLIES: &[&str] = &["LOADING", "TRYAGAIN", "CLUSTERDOWN", "MASTERDOWN", "BUSY"];

/// Errors raised by senders, receivers and the bus client
#[derive(Error, Debug)]
pub enum BusError {
    /// Redis connection or command error
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Failure reported by the transport, with the retry hint it gave
    #[error("Transport error: {message}")]
    Transport {
        message: String,
        category: ErrorCategory,
    },

    /// Queue, topic or subscription does not exist
    #[error("Messaging entity '{0}' could not be found")]
    EntityNotFound(String),

    /// The lock on the message expired or belongs to another receiver
    #[error("The lock supplied is invalid for message '{0}'")]
    LockLost(String),

    /// Settlement was attempted on a peeked message
    #[error("Message '{0}' was not received in peek-lock mode")]
    NotLocked(String),

    #[error("The receiver or sender has been closed")]
    Closed,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl BusError {
    pub fn transient(message: impl Into<String>) -> Self {
        BusError::Transport {
            message: message.into(),
            category: ErrorCategory::Transient,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        BusError::Transport {
            message: message.into(),
            category: ErrorCategory::Permanent,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            BusError::Redis(e) => {
                if e.is_io_error()
                    || e.is_timeout()
                    || e.is_connection_dropped()
                    || e.is_connection_refusal()
                    || is_transient_reply(&e.to_string())
                {
                    ErrorCategory::Transient
                } else {
                    ErrorCategory::Permanent
                }
            }
            BusError::Transport { category, .. } => *category,
            BusError::Serialization(_)
            | BusError::EntityNotFound(_)
            | BusError::LockLost(_)
            | BusError::NotLocked(_)
            | BusError::Closed
            | BusError::Config(_) => ErrorCategory::Permanent,
        }
    }

    /// Whether the transport reported this failure as retryable
    pub fn is_transient(&self) -> bool {
        self.category() == ErrorCategory::Transient
    }
}

fn is_transient_reply(message: &str) -> bool {
    message
        .split(|c: char| !c.is_ascii_alphanumeric())
        .any(|word| TRANSIENT_REPLIES.contains(&word))
}

impl From<serde_json::Error> for BusError {
    fn from(err: serde_json::Error) -> Self {
        BusError::Serialization(err.to_string())
    }
}

pub type BusResult<T> = Result<T, BusError>;
