//! Stream entry layout for messages.
//!
//! Each message is one stream entry whose ID is `{sequence_number}-0`, so the
//! sequence number survives the round trip through Redis without a side index.

use crate::error::{BusError, BusResult};
use crate::message::{ApplicationProperties, LockToken, OutboundMessage, ReceivedMessage};
use chrono::{DateTime, Utc};
use redis::streams::StreamId;

pub(crate) const BODY: &str = "body";
pub(crate) const SUBJECT: &str = "subject";
pub(crate) const CONTENT_TYPE: &str = "content_type";
pub(crate) const MESSAGE_ID: &str = "message_id";
pub(crate) const CORRELATION_ID: &str = "correlation_id";
pub(crate) const PROPERTIES: &str = "properties";
pub(crate) const ENQUEUED_TIME: &str = "enqueued_time";
pub(crate) const DEAD_LETTER_REASON: &str = "dead_letter_reason";
pub(crate) const DEAD_LETTER_DESCRIPTION: &str = "dead_letter_error_description";
/// Deliveries the message had before it was copied into this stream
pub(crate) const PRIOR_DELIVERIES: &str = "prior_deliveries";

/// Flatten a message into field/value pairs for `XADD`
pub(crate) fn encode(
    message: &OutboundMessage,
    enqueued_time: DateTime<Utc>,
) -> BusResult<Vec<(&'static str, Vec<u8>)>> {
    let mut fields: Vec<(&'static str, Vec<u8>)> = vec![
        (BODY, message.body.clone()),
        (
            ENQUEUED_TIME,
            enqueued_time.timestamp_millis().to_string().into_bytes(),
        ),
    ];

    let optional = [
        (SUBJECT, &message.subject),
        (CONTENT_TYPE, &message.content_type),
        (MESSAGE_ID, &message.message_id),
        (CORRELATION_ID, &message.correlation_id),
    ];
    for (key, value) in optional {
        if let Some(value) = value {
            fields.push((key, value.clone().into_bytes()));
        }
    }

    if !message.application_properties.is_empty() {
        fields.push((
            PROPERTIES,
            serde_json::to_vec(&message.application_properties)?,
        ));
    }

    Ok(fields)
}

/// Sequence number encoded in a stream ID (`"42-0"` -> `42`)
pub(crate) fn sequence_of(id: &str) -> Option<i64> {
    id.split_once('-')
        .map_or(id, |(ms, _)| ms)
        .parse()
        .ok()
}

/// Stream ID at which a given sequence number starts
pub(crate) fn stream_id_for(sequence_number: i64) -> String {
    format!("{}-0", sequence_number)
}

/// Rebuild a message from an entry. `delivery_count` is set to the deliveries
/// recorded before this stream; receivers add their own count on top.
pub(crate) fn decode(entry: &StreamId) -> BusResult<ReceivedMessage> {
    let body: Vec<u8> = entry.get(BODY).unwrap_or_default();

    let enqueued_time = entry
        .get::<String>(ENQUEUED_TIME)
        .and_then(|ms| ms.parse::<i64>().ok())
        .and_then(DateTime::from_timestamp_millis)
        .ok_or_else(|| {
            BusError::Serialization(format!("entry {} has no valid {}", entry.id, ENQUEUED_TIME))
        })?;

    let application_properties = match entry.get::<Vec<u8>>(PROPERTIES) {
        Some(raw) => serde_json::from_slice::<ApplicationProperties>(&raw)?,
        None => ApplicationProperties::new(),
    };

    let prior_deliveries = entry
        .get::<String>(PRIOR_DELIVERIES)
        .and_then(|n| n.parse().ok())
        .unwrap_or(0);

    Ok(ReceivedMessage {
        body,
        subject: entry.get(SUBJECT),
        content_type: entry.get(CONTENT_TYPE),
        message_id: entry.get(MESSAGE_ID),
        correlation_id: entry.get(CORRELATION_ID),
        application_properties,
        sequence_number: sequence_of(&entry.id),
        delivery_count: prior_deliveries,
        enqueued_time,
        dead_letter_reason: entry.get(DEAD_LETTER_REASON),
        dead_letter_error_description: entry.get(DEAD_LETTER_DESCRIPTION),
        lock_token: None,
    })
}

/// Lock tokens pin the stream ID and the delivery counter the lock was taken at
pub(crate) fn lock_token(id: &str, times_delivered: u64) -> LockToken {
    LockToken(format!("{}/{}", id, times_delivered))
}

pub(crate) fn parse_lock_token(token: &LockToken) -> Option<(&str, u64)> {
    let (id, deliveries) = token.as_str().rsplit_once('/')?;
    Some((id, deliveries.parse().ok()?))
}
