// Copyright 2025 Cowboy AI, LLC.

//! Durable event records and their lifecycle status

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a durable event record
///
/// A record is created as `Committed` and transitions to `Processed` exactly
/// once, when its handler has run to completion. There is no failure state:
/// a record whose handler failed stays `Committed` and is picked up again by
/// the recovery sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    /// Durably stored, not yet handled
    Committed,
    /// Handler ran to completion
    Processed,
}

impl EventStatus {
    /// Whether a transition from this status to `target` is allowed
    pub fn can_transition_to(&self, target: EventStatus) -> bool {
        matches!(
            (self, target),
            (EventStatus::Committed, EventStatus::Processed)
        )
    }
}

/// A change notification accepted from the bus but not yet persisted
///
/// Producer-assigned fields only; the store assigns the internal identity
/// and audit fields at persistence time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEvent {
    /// Producer-assigned unique identifier; the deduplication key
    pub event_id: String,
    /// Tag selecting the business handler
    pub event_type: String,
    /// Producer-supplied classification of what happened upstream
    pub event_outcome: String,
    /// Optional free-form correlation tag passed through from the producer
    pub activity_code: Option<String>,
    /// Opaque serialized business message, stored verbatim
    pub payload: Vec<u8>,
}

/// The durable unit of work
///
/// `payload` is immutable after insert; `status` and the `updated_*` audit
/// fields are the only mutable parts of a record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    /// Opaque unique identifier assigned at persistence time
    pub internal_id: Uuid,
    /// Producer-assigned unique identifier; unique across all records ever stored
    pub event_id: String,
    /// Tag selecting the business handler
    pub event_type: String,
    /// Producer-supplied classification of what happened upstream
    pub event_outcome: String,
    /// Optional correlation tag from the producer
    pub activity_code: Option<String>,
    /// Opaque serialized business message, never partially parsed by the core
    pub payload: Vec<u8>,
    /// Lifecycle status
    pub status: EventStatus,
    /// Principal that created the record
    pub created_by: String,
    /// When the record was created
    pub created_at: DateTime<Utc>,
    /// Principal that last updated the record
    pub updated_by: String,
    /// When the record was last updated
    pub updated_at: DateTime<Utc>,
}

impl EventRecord {
    /// Build a freshly committed record from an accepted event
    ///
    /// Used by store implementations at insert time; assigns the internal id
    /// and audit fields.
    pub fn commit(event: NewEvent, recorded_by: &str) -> Self {
        let now = Utc::now();
        Self {
            internal_id: Uuid::new_v4(),
            event_id: event.event_id,
            event_type: event.event_type,
            event_outcome: event.event_outcome,
            activity_code: event.activity_code,
            payload: event.payload,
            status: EventStatus::Committed,
            created_by: recorded_by.to_string(),
            created_at: now,
            updated_by: recorded_by.to_string(),
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(EventStatus::Committed, EventStatus::Processed => true; "committed to processed")]
    #[test_case(EventStatus::Committed, EventStatus::Committed => false; "committed to committed")]
    #[test_case(EventStatus::Processed, EventStatus::Committed => false; "processed back to committed")]
    #[test_case(EventStatus::Processed, EventStatus::Processed => false; "processed twice")]
    fn status_transitions(from: EventStatus, to: EventStatus) -> bool {
        from.can_transition_to(to)
    }

    #[test]
    fn status_serializes_as_screaming_snake() {
        assert_eq!(
            serde_json::to_string(&EventStatus::Committed).unwrap(),
            "\"COMMITTED\""
        );
        assert_eq!(
            serde_json::to_string(&EventStatus::Processed).unwrap(),
            "\"PROCESSED\""
        );
    }

    #[test]
    fn commit_assigns_identity_and_audit_fields() {
        let event = NewEvent {
            event_id: "E1".to_string(),
            event_type: "UPDATE_X".to_string(),
            event_outcome: "UPDATED".to_string(),
            activity_code: Some("ACT-7".to_string()),
            payload: b"{}".to_vec(),
        };

        let record = EventRecord::commit(event, "choreography");

        assert_eq!(record.event_id, "E1");
        assert_eq!(record.status, EventStatus::Committed);
        assert_eq!(record.created_by, "choreography");
        assert_eq!(record.updated_by, "choreography");
        assert_eq!(record.created_at, record.updated_at);
    }
}
