// Copyright 2025 Cowboy AI, LLC.

//! Wiring facade for the full choreography pipeline

use crate::choreographer::{Choreographer, DEFAULT_QUEUE_CAPACITY};
use crate::delegator::Delegator;
use crate::handler::HandlerRegistry;
use crate::infrastructure::cluster_lock::{ClusterLock, KvClusterLock, KvClusterLockConfig, LockError};
use crate::infrastructure::event_store::{EventStore, EventStoreError};
use crate::infrastructure::kv_event_store::{KvEventStore, KvEventStoreConfig};
use crate::infrastructure::nats_client::{NatsClient, NatsConfig, NatsError};
use crate::recovery::{PurgerConfig, RecoverySweeper, RetentionPurger, SweeperConfig};
use crate::subscriber::{SubscribeError, Subscriber, SubscriberConfig};
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::info;

/// Errors that can occur while starting the service
#[derive(Debug, Error)]
pub enum ServiceError {
    /// NATS connection failed
    #[error("NATS error: {0}")]
    Nats(#[from] NatsError),

    /// Event store could not be initialized
    #[error("Event store error: {0}")]
    Store(#[from] EventStoreError),

    /// Cluster lock could not be initialized
    #[error("Cluster lock error: {0}")]
    Lock(#[from] LockError),

    /// Subscriptions could not be established
    #[error("Subscription error: {0}")]
    Subscribe(#[from] SubscribeError),
}

/// Configuration for the whole pipeline
#[derive(Debug, Clone, Default)]
pub struct ChoreographyConfig {
    /// Bus connection
    pub nats: NatsConfig,
    /// Event record bucket
    pub store: KvEventStoreConfig,
    /// Scheduler lease bucket
    pub locks: KvClusterLockConfig,
    /// Subscription table and hand-off pool
    pub subscriber: SubscriberConfig,
    /// Recovery sweep schedule
    pub sweeper: SweeperConfig,
    /// Retention purge schedule
    pub purger: PurgerConfig,
}

/// A running choreography pipeline
///
/// Owns the background tasks: receive loops, the dispatch worker, and both
/// schedulers. Dropping the service without calling [`shutdown`] aborts
/// nothing; always shut down explicitly.
///
/// [`shutdown`]: ChoreographyService::shutdown
pub struct ChoreographyService {
    choreographer: Choreographer,
    dispatch_worker: JoinHandle<()>,
    subscriber_handles: Vec<JoinHandle<()>>,
    scheduler_handles: Vec<JoinHandle<()>>,
}

impl ChoreographyService {
    /// Connect to the bus and start every component of the pipeline
    pub async fn start(
        config: ChoreographyConfig,
        registry: HandlerRegistry,
    ) -> Result<Self, ServiceError> {
        let nats = NatsClient::connect(config.nats).await?;

        let store: Arc<dyn EventStore> =
            Arc::new(KvEventStore::new(nats.client().clone(), config.store).await?);
        let lock: Arc<dyn ClusterLock> =
            Arc::new(KvClusterLock::new(nats.client().clone(), config.locks).await?);

        let (choreographer, dispatch_worker) = Choreographer::new(
            Arc::new(registry),
            store.clone(),
            DEFAULT_QUEUE_CAPACITY,
        );

        let delegator = Arc::new(Delegator::new(store.clone(), choreographer.clone()));
        let subscriber = Subscriber::new(nats.client().clone(), delegator, config.subscriber);
        let subscriber_handles = subscriber.spawn().await?;

        let sweeper = Arc::new(RecoverySweeper::new(
            store.clone(),
            choreographer.clone(),
            lock.clone(),
            config.sweeper,
        ));
        let purger = Arc::new(RetentionPurger::new(store, lock, config.purger));
        let scheduler_handles = vec![sweeper.spawn(), purger.spawn()];

        info!("Choreography service started");

        Ok(Self {
            choreographer,
            dispatch_worker,
            subscriber_handles,
            scheduler_handles,
        })
    }

    /// Submission handle of the running dispatcher
    ///
    /// Exposed for operator tooling that needs to resubmit a record
    /// explicitly.
    pub fn choreographer(&self) -> &Choreographer {
        &self.choreographer
    }

    /// Stop receiving, drain the dispatch queue, and stop the schedulers
    pub async fn shutdown(self) {
        for handle in self.subscriber_handles {
            handle.abort();
            let _ = handle.await;
        }
        for handle in self.scheduler_handles {
            handle.abort();
            let _ = handle.await;
        }

        // Closing the last submission handle lets the worker drain and stop
        drop(self.choreographer);
        let _ = self.dispatch_worker.await;

        info!("Choreography service stopped");
    }
}
