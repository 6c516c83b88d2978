// Copyright 2025 Cowboy AI, LLC.

//! Inbound wire envelope from the message bus

use crate::record::NewEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while decoding an inbound envelope
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// Envelope bytes could not be parsed
    #[error("Malformed envelope: {0}")]
    Malformed(String),

    /// Envelope parsed but carries no business payload
    #[error("Envelope {event_id} carries no payload")]
    MissingPayload {
        /// Producer-assigned id of the payload-less envelope
        event_id: String,
    },
}

/// The wire envelope carried by each bus message
///
/// Only the envelope is parsed by the core; the business payload inside it
/// stays opaque and is persisted verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEnvelope {
    /// Globally unique, producer-assigned event identifier
    pub event_id: String,
    /// Event type tag
    pub event_type: String,
    /// Event outcome tag (e.g. created/updated/deleted upstream)
    pub event_outcome: String,
    /// Correlation/activity tag
    #[serde(default)]
    pub activity_code: Option<String>,
    /// Opaque business payload; absent means the message is dropped
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
    /// When the producer emitted the notification
    #[serde(default)]
    pub origin_timestamp: Option<DateTime<Utc>>,
    /// Producer-side user tag
    #[serde(default)]
    pub origin_user: Option<String>,
}

impl ChangeEnvelope {
    /// Decode an envelope from raw message bytes
    pub fn decode(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        serde_json::from_slice(bytes).map_err(|e| EnvelopeError::Malformed(e.to_string()))
    }

    /// Convert into an event ready for the deduplication gate
    ///
    /// Fails with `MissingPayload` when the envelope carries no business
    /// payload; such messages are acknowledged and discarded, never persisted.
    pub fn into_new_event(self) -> Result<NewEvent, EnvelopeError> {
        let payload = match &self.payload {
            Some(value) => serde_json::to_vec(value)
                .map_err(|e| EnvelopeError::Malformed(e.to_string()))?,
            None => {
                return Err(EnvelopeError::MissingPayload {
                    event_id: self.event_id,
                })
            }
        };

        Ok(NewEvent {
            event_id: self.event_id,
            event_type: self.event_type,
            event_outcome: self.event_outcome,
            activity_code: self.activity_code,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn decode_full_envelope() {
        let bytes = br#"{
            "event_id": "E1",
            "event_type": "UPDATE_X",
            "event_outcome": "UPDATED",
            "activity_code": "ACT-7",
            "payload": {"field": 42}
        }"#;

        let envelope = ChangeEnvelope::decode(bytes).unwrap();
        assert_eq!(envelope.event_id, "E1");
        assert_eq!(envelope.event_type, "UPDATE_X");
        assert_eq!(envelope.activity_code, Some("ACT-7".to_string()));

        let event = envelope.into_new_event().unwrap();
        assert_eq!(event.payload, br#"{"field":42}"#.to_vec());
    }

    #[test]
    fn decode_rejects_garbage() {
        let result = ChangeEnvelope::decode(b"not json at all");
        assert!(matches!(result, Err(EnvelopeError::Malformed(_))));
    }

    #[test]
    fn decode_rejects_missing_identifier() {
        let bytes = br#"{"event_type": "UPDATE_X", "event_outcome": "UPDATED"}"#;
        assert!(matches!(
            ChangeEnvelope::decode(bytes),
            Err(EnvelopeError::Malformed(_))
        ));
    }

    #[test]
    fn payload_less_envelope_is_not_persistable() {
        let bytes = br#"{"event_id": "E2", "event_type": "UPDATE_X", "event_outcome": "DELETED"}"#;
        let envelope = ChangeEnvelope::decode(bytes).unwrap();

        match envelope.into_new_event() {
            Err(EnvelopeError::MissingPayload { event_id }) => assert_eq!(event_id, "E2"),
            other => panic!("expected MissingPayload, got {other:?}"),
        }
    }
}
