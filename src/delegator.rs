// Copyright 2025 Cowboy AI, LLC.

//! Receive -> persist -> acknowledge -> dispatch sequencing for one message
//!
//! The protocol is two phases with no shared transaction. Phase 1 persists
//! through the deduplication gate and acknowledges the bus message; phase 2
//! hands the record to the choreographer. A phase 2 failure can never
//! un-acknowledge phase 1: the record sits at `COMMITTED` and the recovery
//! sweep resubmits it.

use crate::choreographer::Choreographer;
use crate::infrastructure::event_store::{EventStore, EventStoreError};
use crate::record::{EventRecord, NewEvent};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, warn};

/// Errors raised while acknowledging a bus message
#[derive(Debug, Error)]
pub enum AckError {
    /// The bus rejected or lost the acknowledgement
    #[error("Acknowledgement failed: {0}")]
    Bus(String),
}

/// Acknowledgement capability of one inbound bus message
///
/// Manual ack only; acknowledging signals "accepted into the durable
/// store", never "business-processed".
#[async_trait]
pub trait MessageAck: Send + Sync {
    /// Acknowledge the message to the bus
    async fn ack(&self) -> Result<(), AckError>;
}

/// How the delegator disposed of one inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelegationOutcome {
    /// Newly persisted and handed to the choreographer
    Accepted,
    /// Redelivery of an already accepted event; acknowledged, nothing else
    Duplicate,
}

/// Errors that leave the inbound message unacknowledged
#[derive(Debug, Error)]
pub enum DelegationError {
    /// Durable persistence failed; the bus will redeliver
    #[error("Persistence failed: {0}")]
    Persistence(#[from] EventStoreError),
}

/// Sequences the accept protocol for each inbound message
pub struct Delegator {
    store: Arc<dyn EventStore>,
    choreographer: Choreographer,
}

impl Delegator {
    /// Create a delegator over the given store and dispatcher
    pub fn new(store: Arc<dyn EventStore>, choreographer: Choreographer) -> Self {
        Self {
            store,
            choreographer,
        }
    }

    /// Run the two-phase accept protocol for one decoded event
    ///
    /// On a persistence error the message is left unacknowledged and the
    /// error returned; in every other case the message ends up acknowledged,
    /// independent of the dispatch outcome.
    pub async fn delegate(
        &self,
        event: NewEvent,
        ack: &dyn MessageAck,
    ) -> Result<DelegationOutcome, DelegationError> {
        match self.accept(event, ack).await? {
            Some(record) => {
                self.dispatch(record).await;
                Ok(DelegationOutcome::Accepted)
            }
            None => Ok(DelegationOutcome::Duplicate),
        }
    }

    /// Phase 1: durable insert through the gate, then acknowledge
    ///
    /// Returns the new record, or `None` for a duplicate delivery. The ack
    /// happens strictly after persistence; a lost ack means a redelivery
    /// that the gate absorbs, so it is logged and otherwise ignored.
    async fn accept(
        &self,
        event: NewEvent,
        ack: &dyn MessageAck,
    ) -> Result<Option<EventRecord>, DelegationError> {
        let event_id = event.event_id.clone();

        let (record, is_new) = match self.store.insert_if_absent(event).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(event_id = %event_id, "Persistence failed, leaving message unacknowledged: {e}");
                return Err(e.into());
            }
        };

        if let Err(e) = ack.ack().await {
            warn!(event_id = %event_id, "Ack failed after persistence, gate will absorb the redelivery: {e}");
        }

        if !is_new {
            debug!(event_id = %event_id, "Duplicate delivery absorbed");
            return Ok(None);
        }

        Ok(Some(record))
    }

    /// Phase 2: hand the record to the single-writer dispatcher
    ///
    /// Never fails the delegation: the message is already acknowledged, and
    /// a lost hand-off leaves the record `COMMITTED` for the recovery sweep.
    async fn dispatch(&self, record: EventRecord) {
        let event_id = record.event_id.clone();
        if let Err(e) = self.choreographer.submit(record).await {
            error!(event_id = %event_id, "Dispatch hand-off failed, recovery sweep will resubmit: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::choreographer::DEFAULT_QUEUE_CAPACITY;
    use crate::handler::HandlerRegistry;
    use crate::infrastructure::event_store::InMemoryEventStore;
    use crate::record::EventStatus;
    use chrono::{DateTime, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Records acknowledgements; optionally fails them
    struct RecordingAck {
        acks: AtomicUsize,
        fail: bool,
    }

    impl RecordingAck {
        fn new() -> Self {
            Self {
                acks: AtomicUsize::new(0),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                acks: AtomicUsize::new(0),
                fail: true,
            }
        }

        fn count(&self) -> usize {
            self.acks.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MessageAck for RecordingAck {
        async fn ack(&self) -> Result<(), AckError> {
            self.acks.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(AckError::Bus("connection reset".to_string()));
            }
            Ok(())
        }
    }

    fn new_event(event_id: &str) -> NewEvent {
        NewEvent {
            event_id: event_id.to_string(),
            event_type: "UPDATE_X".to_string(),
            event_outcome: "UPDATED".to_string(),
            activity_code: None,
            payload: b"{}".to_vec(),
        }
    }

    #[tokio::test]
    async fn fresh_event_is_persisted_acked_and_accepted() {
        let store = Arc::new(InMemoryEventStore::new());
        let (choreographer, _worker) = Choreographer::new(
            Arc::new(HandlerRegistry::new()),
            store.clone(),
            DEFAULT_QUEUE_CAPACITY,
        );
        let delegator = Delegator::new(store.clone(), choreographer);
        let ack = RecordingAck::new();

        let outcome = delegator.delegate(new_event("E1"), &ack).await.unwrap();

        assert_eq!(outcome, DelegationOutcome::Accepted);
        assert_eq!(ack.count(), 1);
        let stored = store.find_by_event_id("E1").await.unwrap().unwrap();
        assert_eq!(stored.status, EventStatus::Committed);
    }

    #[tokio::test]
    async fn redelivery_is_acked_without_second_record() {
        let store = Arc::new(InMemoryEventStore::new());
        let (choreographer, _worker) = Choreographer::new(
            Arc::new(HandlerRegistry::new()),
            store.clone(),
            DEFAULT_QUEUE_CAPACITY,
        );
        let delegator = Delegator::new(store.clone(), choreographer);

        let first = RecordingAck::new();
        delegator.delegate(new_event("E1"), &first).await.unwrap();
        let created_at: DateTime<Utc> = store
            .find_by_event_id("E1")
            .await
            .unwrap()
            .unwrap()
            .created_at;

        let second = RecordingAck::new();
        let outcome = delegator.delegate(new_event("E1"), &second).await.unwrap();

        assert_eq!(outcome, DelegationOutcome::Duplicate);
        assert_eq!(second.count(), 1);
        assert_eq!(store.len().await, 1);
        let stored = store.find_by_event_id("E1").await.unwrap().unwrap();
        assert_eq!(stored.created_at, created_at);
    }

    #[tokio::test]
    async fn failed_ack_still_accepts_the_event() {
        let store = Arc::new(InMemoryEventStore::new());
        let (choreographer, _worker) = Choreographer::new(
            Arc::new(HandlerRegistry::new()),
            store.clone(),
            DEFAULT_QUEUE_CAPACITY,
        );
        let delegator = Delegator::new(store.clone(), choreographer);
        let ack = RecordingAck::failing();

        let outcome = delegator.delegate(new_event("E1"), &ack).await.unwrap();

        assert_eq!(outcome, DelegationOutcome::Accepted);
        assert!(store.find_by_event_id("E1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn dispatch_hand_off_failure_does_not_unack() {
        let store = Arc::new(InMemoryEventStore::new());
        let (choreographer, worker) = Choreographer::new(
            Arc::new(HandlerRegistry::new()),
            store.clone(),
            DEFAULT_QUEUE_CAPACITY,
        );
        worker.abort();
        let _ = worker.await;

        let delegator = Delegator::new(store.clone(), choreographer);
        let ack = RecordingAck::new();

        // Choreographer is gone; the event must still be persisted and acked
        let outcome = delegator.delegate(new_event("E1"), &ack).await.unwrap();

        assert_eq!(outcome, DelegationOutcome::Accepted);
        assert_eq!(ack.count(), 1);
        let stored = store.find_by_event_id("E1").await.unwrap().unwrap();
        assert_eq!(stored.status, EventStatus::Committed);
    }
}
