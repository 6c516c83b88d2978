// Copyright 2025 Cowboy AI, LLC.

//! Single-writer dispatcher for committed event records
//!
//! All handler invocations funnel through one worker task fed by a channel,
//! so the backing store used by handlers never sees concurrent writes from
//! this pipeline. Serialization is structural (a single consumer), not a
//! mutex around multi-worker code.

use crate::handler::HandlerRegistry;
use crate::infrastructure::event_store::EventStore;
use crate::record::{EventRecord, EventStatus};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Default capacity of the dispatch queue
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Principal recorded on the processed transition
const WORKER_PRINCIPAL: &str = "choreographer";

/// Errors that can occur when submitting to the choreographer
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The worker has shut down and the intake channel is closed
    #[error("Choreographer is shut down; could not submit event {0}")]
    Closed(String),
}

/// Handle for submitting records to the single dispatch worker
///
/// Cheap to clone; submissions from any number of producers (delegator,
/// recovery sweeper) are served first-in-first-out by the one worker. The
/// worker stops once every clone of this handle has been dropped and the
/// queue is drained.
#[derive(Clone)]
pub struct Choreographer {
    tx: mpsc::Sender<EventRecord>,
}

impl Choreographer {
    /// Start the dispatch worker and return the submission handle
    pub fn new(
        registry: Arc<HandlerRegistry>,
        store: Arc<dyn EventStore>,
        queue_capacity: usize,
    ) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<EventRecord>(queue_capacity);

        let worker = tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                dispatch_one(&registry, store.as_ref(), record).await;
            }
            debug!("Choreographer worker drained and stopped");
        });

        (Self { tx }, worker)
    }

    /// Enqueue a record for dispatch
    ///
    /// Returns once the record is queued, not once it is handled; queue
    /// order is invocation order.
    pub async fn submit(&self, record: EventRecord) -> Result<(), DispatchError> {
        self.tx
            .send(record)
            .await
            .map_err(|e| DispatchError::Closed(e.0.event_id))
    }
}

/// Run one record through its handler and record the outcome
///
/// No error escapes this function: handler failures and unrecognized types
/// leave the record `COMMITTED` for the recovery sweep, and nothing
/// propagates back to the submitter.
async fn dispatch_one(registry: &HandlerRegistry, store: &dyn EventStore, record: EventRecord) {
    // A sweep resubmission may race an earlier dispatch of the same record;
    // handlers never run on a record that is already processed.
    match store.find_by_event_id(&record.event_id).await {
        Ok(Some(current)) if current.status == EventStatus::Processed => {
            debug!(event_id = %record.event_id, "Record already processed, skipping dispatch");
            return;
        }
        Ok(Some(_)) => {}
        Ok(None) => {
            warn!(event_id = %record.event_id, "Record no longer in store, skipping dispatch");
            return;
        }
        Err(e) => {
            error!(event_id = %record.event_id, "Status check failed, leaving record for sweep: {e}");
            return;
        }
    }

    let Some(handler) = registry.get(&record.event_type) else {
        warn!(
            event_id = %record.event_id,
            event_type = %record.event_type,
            "No handler registered for event type"
        );
        return;
    };

    match handler.handle(&record.payload, &record).await {
        Ok(()) => match store.mark_processed(&record.event_id, WORKER_PRINCIPAL).await {
            Ok(_) => debug!(event_id = %record.event_id, "Event processed"),
            Err(e) => error!(
                event_id = %record.event_id,
                "Handler succeeded but processed transition failed, sweep will re-run it: {e}"
            ),
        },
        Err(e) => {
            error!(
                event_id = %record.event_id,
                event_type = %record.event_type,
                "Handler failed, record stays committed: {e}"
            );
        }
    }
}
