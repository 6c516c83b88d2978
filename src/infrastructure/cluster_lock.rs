// Copyright 2025 Cowboy AI, LLC.

//! Cluster-wide mutual exclusion for the scheduled jobs
//!
//! Exactly one replica of a horizontally-scaled deployment may run a sweep
//! or purge cycle at a time. The KV implementation leases a key per lock
//! name: key creation is the mutual-exclusion primitive, and the bucket's
//! `max_age` expires the lease of a holder that crashed without releasing.

use async_nats::jetstream::{self, kv};
use async_nats::Client;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

/// Errors that can occur during lock operations
#[derive(Debug, Error)]
pub enum LockError {
    /// Failed to create or bind the lock bucket
    #[error("Lock bucket error: {0}")]
    BucketError(String),

    /// Lock acquisition or release failed in the backing store
    #[error("Lock storage error: {0}")]
    StorageError(String),
}

/// Cluster-wide mutual-exclusion lock
///
/// `try_acquire` never blocks: a replica that does not get the lock simply
/// skips that cycle.
#[async_trait]
pub trait ClusterLock: Send + Sync {
    /// Attempt to acquire the named lock; `false` means another holder has it
    async fn try_acquire(&self, name: &str) -> Result<bool, LockError>;

    /// Release the named lock if this instance holds it
    async fn release(&self, name: &str) -> Result<(), LockError>;
}

/// Configuration for the KV cluster lock
#[derive(Debug, Clone)]
pub struct KvClusterLockConfig {
    /// KV bucket name holding the leases
    pub bucket: String,
    /// Lease time-to-live; an unreleased lease expires after this long
    pub ttl_secs: u64,
}

impl Default for KvClusterLockConfig {
    fn default() -> Self {
        Self {
            bucket: "choreography-locks".to_string(),
            ttl_secs: 60,
        }
    }
}

/// JetStream KV-based cluster lock
pub struct KvClusterLock {
    kv: kv::Store,
    holder: String,
}

impl KvClusterLock {
    /// Create or bind the lease bucket and return the lock
    pub async fn new(client: Client, config: KvClusterLockConfig) -> Result<Self, LockError> {
        let js = jetstream::new(client);

        let bucket_config = kv::Config {
            bucket: config.bucket.clone(),
            description: "Choreography scheduler leases".to_string(),
            history: 1,
            max_age: Duration::from_secs(config.ttl_secs),
            storage: jetstream::stream::StorageType::File,
            ..Default::default()
        };

        let kv = js.create_key_value(bucket_config).await.map_err(|e| {
            LockError::BucketError(format!(
                "Failed to create lock bucket {}: {}",
                config.bucket, e
            ))
        })?;

        Ok(Self {
            kv,
            holder: Uuid::new_v4().to_string(),
        })
    }
}

#[async_trait]
impl ClusterLock for KvClusterLock {
    async fn try_acquire(&self, name: &str) -> Result<bool, LockError> {
        match self.kv.create(name, Bytes::from(self.holder.clone())).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == kv::CreateErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(LockError::StorageError(format!(
                "Failed to acquire lock {name}: {e}"
            ))),
        }
    }

    async fn release(&self, name: &str) -> Result<(), LockError> {
        // Only delete a lease this instance owns; an expired lease may have
        // been re-acquired by another replica in the meantime.
        match self.kv.get(name).await {
            Ok(Some(bytes)) if bytes.as_ref() == self.holder.as_bytes() => {
                self.kv.purge(name).await.map_err(|e| {
                    LockError::StorageError(format!("Failed to release lock {name}: {e}"))
                })?;
            }
            Ok(_) => {
                debug!("Lock {} no longer held by this instance", name);
            }
            Err(e) => {
                return Err(LockError::StorageError(format!(
                    "Failed to read lock {name}: {e}"
                )))
            }
        }
        Ok(())
    }
}

/// In-memory cluster lock for testing
pub struct InMemoryClusterLock {
    holder: String,
    leases: Mutex<HashMap<String, String>>,
}

impl Default for InMemoryClusterLock {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryClusterLock {
    /// Create a lock instance with its own holder identity
    pub fn new() -> Self {
        Self {
            holder: Uuid::new_v4().to_string(),
            leases: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl ClusterLock for InMemoryClusterLock {
    async fn try_acquire(&self, name: &str) -> Result<bool, LockError> {
        let mut leases = self.leases.lock().await;
        if leases.contains_key(name) {
            return Ok(false);
        }
        leases.insert(name.to_string(), self.holder.clone());
        Ok(true)
    }

    async fn release(&self, name: &str) -> Result<(), LockError> {
        let mut leases = self.leases.lock().await;
        if leases.get(name) == Some(&self.holder) {
            leases.remove(name);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_acquire_fails_until_release() {
        let lock = InMemoryClusterLock::new();

        assert!(lock.try_acquire("sweep").await.unwrap());
        assert!(!lock.try_acquire("sweep").await.unwrap());

        lock.release("sweep").await.unwrap();
        assert!(lock.try_acquire("sweep").await.unwrap());
    }

    #[tokio::test]
    async fn locks_are_independent_by_name() {
        let lock = InMemoryClusterLock::new();

        assert!(lock.try_acquire("sweep").await.unwrap());
        assert!(lock.try_acquire("purge").await.unwrap());
    }

    #[test]
    fn kv_config_defaults() {
        let config = KvClusterLockConfig::default();
        assert_eq!(config.bucket, "choreography-locks");
        assert_eq!(config.ttl_secs, 60);
    }
}
