// Copyright 2025 Cowboy AI, LLC.

//! Integration tests against a live NATS server
//!
//! All tests here are ignored by default; run them with a local server:
//! `nats-server -js` then `cargo test -- --ignored`.

use cim_choreography::infrastructure::{
    ClusterLock, EventStore, KvClusterLock, KvClusterLockConfig, KvEventStore, KvEventStoreConfig,
};
use cim_choreography::{EventStatus, NewEvent};
use uuid::Uuid;

fn unique_bucket(prefix: &str) -> String {
    format!("{}-{}", prefix, Uuid::new_v4().simple())
}

fn new_event(event_id: &str) -> NewEvent {
    NewEvent {
        event_id: event_id.to_string(),
        event_type: "UPDATE_X".to_string(),
        event_outcome: "UPDATED".to_string(),
        activity_code: Some("ACT-1".to_string()),
        payload: br#"{"field": 42}"#.to_vec(),
    }
}

#[tokio::test]
#[ignore] // Requires NATS server to be running
async fn kv_store_deduplicates_and_transitions() -> anyhow::Result<()> {
    let client = async_nats::connect("nats://localhost:4222").await?;

    let store = KvEventStore::new(
        client,
        KvEventStoreConfig {
            bucket: unique_bucket("test-events"),
            ..Default::default()
        },
    )
    .await?;

    let (record, is_new) = store.insert_if_absent(new_event("E1")).await?;
    assert!(is_new);
    assert_eq!(record.status, EventStatus::Committed);

    // The bucket's create-if-absent is the uniqueness constraint
    let (duplicate, is_new) = store.insert_if_absent(new_event("E1")).await?;
    assert!(!is_new);
    assert_eq!(duplicate.internal_id, record.internal_id);

    let committed = store.list_by_status(EventStatus::Committed).await?;
    assert_eq!(committed.len(), 1);

    let processed = store.mark_processed("E1", "test").await?;
    assert_eq!(processed.status, EventStatus::Processed);
    assert!(store
        .list_by_status(EventStatus::Committed)
        .await?
        .is_empty());

    let outcome = store
        .delete_created_before(chrono::Utc::now() + chrono::Duration::seconds(1))
        .await?;
    assert_eq!(outcome.deleted, 1);
    assert_eq!(outcome.unprocessed_dropped, 0);
    assert!(store.find_by_event_id("E1").await?.is_none());

    Ok(())
}

#[tokio::test]
#[ignore] // Requires NATS server to be running
async fn kv_lock_excludes_other_replicas() -> anyhow::Result<()> {
    let client = async_nats::connect("nats://localhost:4222").await?;
    let bucket = unique_bucket("test-locks");

    let config = KvClusterLockConfig {
        bucket,
        ttl_secs: 60,
    };

    let replica_a = KvClusterLock::new(client.clone(), config.clone()).await?;
    let replica_b = KvClusterLock::new(client, config).await?;

    assert!(replica_a.try_acquire("recovery-sweep").await?);
    assert!(!replica_b.try_acquire("recovery-sweep").await?);

    // A releases; only then can B run a cycle
    replica_a.release("recovery-sweep").await?;
    assert!(replica_b.try_acquire("recovery-sweep").await?);

    // A releasing a lease it no longer holds must not free B's lease
    replica_a.release("recovery-sweep").await?;
    assert!(!replica_a.try_acquire("recovery-sweep").await?);
    replica_b.release("recovery-sweep").await?;

    Ok(())
}
