// Copyright 2025 Cowboy AI, LLC.

//! # CIM Choreography
//!
//! Event choreography core for the Composable Information Machine: turns
//! unreliable, possibly-duplicated change notifications from a message bus
//! into reliably-processed, idempotent business events.
//!
//! The pipeline, leaf to root:
//! - **Event Store**: durable records with a store-enforced unique event id
//!   (the deduplication gate)
//! - **Subscriber**: durable, manually-acknowledged JetStream consumers over
//!   a fixed subscription table
//! - **Delegator**: persist -> acknowledge -> dispatch, as two phases with
//!   no shared transaction
//! - **Choreographer**: a single-writer dispatcher, so handlers never issue
//!   concurrent writes against their backing store
//! - **Handler Registry**: event-type tag to business handler, built once at
//!   startup
//! - **Recovery Sweeper / Retention Purger**: cluster-singleton scheduled
//!   jobs for crash recovery and storage hygiene
//!
//! ## Design Principles
//!
//! 1. **Ack after persistence**: acknowledgement means "accepted into the
//!    durable store", never "business-processed"
//! 2. **Dedup in the store**: the uniqueness constraint is the only
//!    inter-process synchronization primitive
//! 3. **Serialize, don't lock**: ordering comes from a single dispatch
//!    worker, not from a mutex around many
//! 4. **Failures stay committed**: a failed handler leaves the record
//!    eligible for the next sweep; nothing propagates back to the bus

#![warn(missing_docs)]

mod choreographer;
mod delegator;
mod envelope;
mod handler;
mod record;
mod recovery;
mod service;
mod subscriber;

pub mod infrastructure;

pub use choreographer::{Choreographer, DispatchError, DEFAULT_QUEUE_CAPACITY};
pub use delegator::{AckError, DelegationError, DelegationOutcome, Delegator, MessageAck};
pub use envelope::{ChangeEnvelope, EnvelopeError};
pub use handler::{EventHandler, HandlerError, HandlerRegistry};
pub use record::{EventRecord, EventStatus, NewEvent};
pub use recovery::{
    PurgerConfig, RecoverySweeper, RetentionPurger, SweepSummary, SweeperConfig,
};
pub use service::{ChoreographyConfig, ChoreographyService, ServiceError};
pub use subscriber::{StreamSubscription, SubscribeError, Subscriber, SubscriberConfig};
