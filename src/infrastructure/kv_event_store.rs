// Copyright 2025 Cowboy AI, LLC.

//! JetStream KV-backed event store
//!
//! The bucket is keyed by the producer-assigned `event_id`; `Store::create`
//! refuses to overwrite an existing key, which is the uniqueness constraint
//! the deduplication gate relies on. No code-level existence check precedes
//! the insert.

use crate::infrastructure::event_store::{EventStore, EventStoreError, PurgeOutcome};
use crate::record::{EventRecord, EventStatus, NewEvent};
use async_nats::jetstream::{self, kv};
use async_nats::Client;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use tracing::{debug, info};

/// Configuration for the KV event store
#[derive(Debug, Clone)]
pub struct KvEventStoreConfig {
    /// KV bucket name
    pub bucket: String,
    /// Principal recorded in the audit fields
    pub recorded_by: String,
    /// History depth per key (1 = latest revision only)
    pub history: i64,
}

impl Default for KvEventStoreConfig {
    fn default() -> Self {
        Self {
            bucket: "event-records".to_string(),
            recorded_by: "choreography".to_string(),
            history: 1,
        }
    }
}

/// JetStream KV-backed implementation of the event store
pub struct KvEventStore {
    kv: kv::Store,
    recorded_by: String,
}

impl KvEventStore {
    /// Create or bind the KV bucket and return the store
    pub async fn new(client: Client, config: KvEventStoreConfig) -> Result<Self, EventStoreError> {
        let js = jetstream::new(client);

        let bucket_config = kv::Config {
            bucket: config.bucket.clone(),
            description: "Durable event records".to_string(),
            history: config.history,
            storage: jetstream::stream::StorageType::File,
            ..Default::default()
        };

        let kv = js
            .create_key_value(bucket_config)
            .await
            .map_err(|e| {
                EventStoreError::ConnectionError(format!(
                    "Failed to create KV bucket {}: {}",
                    config.bucket, e
                ))
            })?;

        info!("Event store bound to KV bucket: {}", config.bucket);

        Ok(Self {
            kv,
            recorded_by: config.recorded_by,
        })
    }

    async fn read_record(&self, key: &str) -> Result<Option<EventRecord>, EventStoreError> {
        match self.kv.get(key).await {
            Ok(Some(bytes)) => {
                let record: EventRecord = serde_json::from_slice(&bytes)?;
                Ok(Some(record))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(EventStoreError::StorageError(format!(
                "Failed to read record {key}: {e}"
            ))),
        }
    }

    async fn scan_records(&self) -> Result<Vec<EventRecord>, EventStoreError> {
        let mut keys = self
            .kv
            .keys()
            .await
            .map_err(|e| EventStoreError::StorageError(format!("Failed to list keys: {e}")))?
            .boxed();

        let mut records = Vec::new();
        while let Some(key) = keys.next().await {
            let key =
                key.map_err(|e| EventStoreError::StorageError(format!("Key scan failed: {e}")))?;
            if let Some(record) = self.read_record(&key).await? {
                records.push(record);
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl EventStore for KvEventStore {
    async fn insert_if_absent(
        &self,
        event: NewEvent,
    ) -> Result<(EventRecord, bool), EventStoreError> {
        let record = EventRecord::commit(event, &self.recorded_by);
        let bytes = serde_json::to_vec(&record)?;

        match self.kv.create(&record.event_id, bytes.into()).await {
            Ok(_) => {
                debug!(event_id = %record.event_id, "Committed event record");
                Ok((record, true))
            }
            Err(e) if e.kind() == kv::CreateErrorKind::AlreadyExists => {
                let existing = self.read_record(&record.event_id).await?.ok_or_else(|| {
                    EventStoreError::StorageError(format!(
                        "Record {} vanished between create and read",
                        record.event_id
                    ))
                })?;
                Ok((existing, false))
            }
            Err(e) => Err(EventStoreError::StorageError(format!(
                "Failed to insert record {}: {}",
                record.event_id, e
            ))),
        }
    }

    async fn find_by_event_id(
        &self,
        event_id: &str,
    ) -> Result<Option<EventRecord>, EventStoreError> {
        self.read_record(event_id).await
    }

    async fn list_by_status(
        &self,
        status: EventStatus,
    ) -> Result<Vec<EventRecord>, EventStoreError> {
        let mut matching: Vec<_> = self
            .scan_records()
            .await?
            .into_iter()
            .filter(|r| r.status == status)
            .collect();
        matching.sort_by_key(|r| r.created_at);
        Ok(matching)
    }

    async fn mark_processed(
        &self,
        event_id: &str,
        updated_by: &str,
    ) -> Result<EventRecord, EventStoreError> {
        let mut record = self
            .read_record(event_id)
            .await?
            .ok_or_else(|| EventStoreError::EventNotFound(event_id.to_string()))?;

        if !record.status.can_transition_to(EventStatus::Processed) {
            return Ok(record);
        }

        record.status = EventStatus::Processed;
        record.updated_by = updated_by.to_string();
        record.updated_at = Utc::now();

        let bytes = serde_json::to_vec(&record)?;
        self.kv
            .put(event_id, bytes.into())
            .await
            .map_err(|e| {
                EventStoreError::StorageError(format!("Failed to update record {event_id}: {e}"))
            })?;

        Ok(record)
    }

    async fn delete_created_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<PurgeOutcome, EventStoreError> {
        let mut outcome = PurgeOutcome::default();

        for record in self.scan_records().await? {
            if record.created_at >= cutoff {
                continue;
            }
            self.kv.purge(&record.event_id).await.map_err(|e| {
                EventStoreError::StorageError(format!(
                    "Failed to purge record {}: {}",
                    record.event_id, e
                ))
            })?;
            outcome.deleted += 1;
            if record.status == EventStatus::Committed {
                outcome.unprocessed_dropped += 1;
            }
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = KvEventStoreConfig::default();
        assert_eq!(config.bucket, "event-records");
        assert_eq!(config.recorded_by, "choreography");
        assert_eq!(config.history, 1);
    }
}
