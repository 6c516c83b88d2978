// Copyright 2025 Cowboy AI, LLC.

//! Infrastructure layer for cim-choreography
//!
//! This module contains all infrastructure concerns including:
//! - NATS client and JetStream integration
//! - Event store (the deduplication gate) and its KV implementation
//! - Cluster-wide locks for the scheduled jobs

pub mod cluster_lock;
pub mod event_store;
pub mod kv_event_store;
pub mod nats_client;

pub use cluster_lock::{
    ClusterLock, InMemoryClusterLock, KvClusterLock, KvClusterLockConfig, LockError,
};
pub use event_store::{EventStore, EventStoreError, InMemoryEventStore, PurgeOutcome};
pub use kv_event_store::{KvEventStore, KvEventStoreConfig};
pub use nats_client::{NatsClient, NatsConfig, NatsError};
