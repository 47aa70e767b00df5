//! Outbound and received message types

use crate::error::BusResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// User-defined properties carried alongside the body (scalar JSON values)
pub type ApplicationProperties = BTreeMap<String, Value>;

/// A message ready to be sent to a queue or topic.
///
/// ```ignore
/// let message = OutboundMessage::json(&event)?
///     .with_subject("TaskCreated")
///     .with_message_id(event.task_id.to_string())
///     .with_property("requires_assigned_to", true);
/// sender.send(message).await?;
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub body: Vec<u8>,
    pub subject: Option<String>,
    pub content_type: Option<String>,
    pub message_id: Option<String>,
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub application_properties: ApplicationProperties,
}

impl OutboundMessage {
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            ..Default::default()
        }
    }

    /// Serialize `value` as the body and set content type `application/json`
    pub fn json<T: Serialize>(value: &T) -> BusResult<Self> {
        Ok(Self::new(serde_json::to_vec(value)?).with_content_type("application/json"))
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.application_properties.insert(key.into(), value.into());
        self
    }
}

/// Opaque handle tying a received message to the lock its receiver holds
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LockToken(pub(crate) String);

impl LockToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A message handed out by `receive` (locked) or `peek` (unlocked).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceivedMessage {
    pub body: Vec<u8>,
    pub subject: Option<String>,
    pub content_type: Option<String>,
    pub message_id: Option<String>,
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub application_properties: ApplicationProperties,
    /// Broker-assigned, strictly increasing per entity
    pub sequence_number: Option<i64>,
    /// Number of times the message has been handed to a receiver, starting at 1
    pub delivery_count: u32,
    pub enqueued_time: DateTime<Utc>,
    pub dead_letter_reason: Option<String>,
    pub dead_letter_error_description: Option<String>,
    /// `None` for peeked messages
    pub lock_token: Option<LockToken>,
}

impl ReceivedMessage {
    /// Message id for logs, or the sequence number when the sender set none
    pub fn display_id(&self) -> String {
        match (&self.message_id, self.sequence_number) {
            (Some(id), _) => id.clone(),
            (None, Some(seq)) => format!("seq:{}", seq),
            (None, None) => "<unknown>".to_string(),
        }
    }

    pub fn body_as_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Copy of this message for re-sending: body, subject, correlation id,
    /// message id and content type are kept. Broker state is not.
    pub fn to_outbound(&self) -> OutboundMessage {
        OutboundMessage {
            body: self.body.clone(),
            subject: self.subject.clone(),
            content_type: self.content_type.clone(),
            message_id: self.message_id.clone(),
            correlation_id: self.correlation_id.clone(),
            application_properties: ApplicationProperties::new(),
        }
    }

    pub(crate) fn from_outbound(
        message: OutboundMessage,
        sequence_number: i64,
        enqueued_time: DateTime<Utc>,
    ) -> Self {
        Self {
            body: message.body,
            subject: message.subject,
            content_type: message.content_type,
            message_id: message.message_id,
            correlation_id: message.correlation_id,
            application_properties: message.application_properties,
            sequence_number: Some(sequence_number),
            delivery_count: 0,
            enqueued_time,
            dead_letter_reason: None,
            dead_letter_error_description: None,
            lock_token: None,
        }
    }
}
