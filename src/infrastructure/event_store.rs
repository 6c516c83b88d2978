// Copyright 2025 Cowboy AI, LLC.

//! Event store trait and the deduplication gate contract

use crate::record::{EventRecord, EventStatus, NewEvent};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

/// Errors that can occur when working with the event store
///
/// A duplicate `event_id` is not an error: `insert_if_absent` reports it
/// through its return value so callers can distinguish duplicate delivery
/// from genuine failure.
#[derive(Debug, Error)]
pub enum EventStoreError {
    /// Failed to reach the backing store
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Failed to serialize or deserialize a stored record
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Requested record was not found
    #[error("Event not found: {0}")]
    EventNotFound(String),

    /// General storage operation failed
    #[error("Storage error: {0}")]
    StorageError(String),
}

impl From<serde_json::Error> for EventStoreError {
    fn from(err: serde_json::Error) -> Self {
        EventStoreError::SerializationError(err.to_string())
    }
}

/// Result of a retention purge pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeOutcome {
    /// Records deleted
    pub deleted: u64,
    /// Deleted records that were still `COMMITTED` (work dropped unprocessed)
    pub unprocessed_dropped: u64,
}

/// Persistence layer for durable event records
///
/// `insert_if_absent` doubles as the deduplication gate: the uniqueness of
/// `event_id` is enforced by the store itself, not checked in code, so a
/// concurrent duplicate insert can never create a second record.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Insert a record for `event` unless one with the same `event_id` exists
    ///
    /// Returns the record and `true` when this call created it, or the
    /// previously stored record and `false` on duplicate delivery. Any error
    /// is a genuine persistence failure; the caller must not acknowledge the
    /// inbound message in that case.
    async fn insert_if_absent(
        &self,
        event: NewEvent,
    ) -> Result<(EventRecord, bool), EventStoreError>;

    /// Look up a record by its producer-assigned event id
    async fn find_by_event_id(
        &self,
        event_id: &str,
    ) -> Result<Option<EventRecord>, EventStoreError>;

    /// List records with the given status, ordered by creation time ascending
    async fn list_by_status(
        &self,
        status: EventStatus,
    ) -> Result<Vec<EventRecord>, EventStoreError>;

    /// Transition a record `COMMITTED -> PROCESSED`
    ///
    /// Marking an already processed record is a no-op that returns the
    /// stored record unchanged.
    async fn mark_processed(
        &self,
        event_id: &str,
        updated_by: &str,
    ) -> Result<EventRecord, EventStoreError>;

    /// Delete all records created before `cutoff`, regardless of status
    async fn delete_created_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<PurgeOutcome, EventStoreError>;
}

/// In-memory event store for testing and local runs
///
/// Holds the whole table behind one `RwLock`, so the check-then-insert in
/// `insert_if_absent` is atomic.
#[derive(Debug)]
pub struct InMemoryEventStore {
    records: Arc<RwLock<HashMap<String, EventRecord>>>,
    recorded_by: String,
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryEventStore {
    /// Create an empty in-memory store
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            recorded_by: "choreography".to_string(),
        }
    }

    /// Number of records currently stored
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Whether the store holds no records
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn insert_if_absent(
        &self,
        event: NewEvent,
    ) -> Result<(EventRecord, bool), EventStoreError> {
        let mut records = self.records.write().await;

        if let Some(existing) = records.get(&event.event_id) {
            return Ok((existing.clone(), false));
        }

        let record = EventRecord::commit(event, &self.recorded_by);
        records.insert(record.event_id.clone(), record.clone());
        Ok((record, true))
    }

    async fn find_by_event_id(
        &self,
        event_id: &str,
    ) -> Result<Option<EventRecord>, EventStoreError> {
        let records = self.records.read().await;
        Ok(records.get(event_id).cloned())
    }

    async fn list_by_status(
        &self,
        status: EventStatus,
    ) -> Result<Vec<EventRecord>, EventStoreError> {
        let records = self.records.read().await;
        let mut matching: Vec<_> = records
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect();
        matching.sort_by_key(|r| r.created_at);
        Ok(matching)
    }

    async fn mark_processed(
        &self,
        event_id: &str,
        updated_by: &str,
    ) -> Result<EventRecord, EventStoreError> {
        let mut records = self.records.write().await;

        let record = records
            .get_mut(event_id)
            .ok_or_else(|| EventStoreError::EventNotFound(event_id.to_string()))?;

        if record.status.can_transition_to(EventStatus::Processed) {
            record.status = EventStatus::Processed;
            record.updated_by = updated_by.to_string();
            record.updated_at = Utc::now();
        }

        Ok(record.clone())
    }

    async fn delete_created_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<PurgeOutcome, EventStoreError> {
        let mut records = self.records.write().await;
        let mut outcome = PurgeOutcome::default();

        records.retain(|_, record| {
            if record.created_at < cutoff {
                outcome.deleted += 1;
                if record.status == EventStatus::Committed {
                    outcome.unprocessed_dropped += 1;
                }
                false
            } else {
                true
            }
        });

        Ok(outcome)
    }
}
