// Copyright 2025 Cowboy AI, LLC.

//! Scheduled recovery sweep and retention purge
//!
//! Both jobs run on fixed intervals under the cluster lock, so exactly one
//! replica executes a cycle at a time. A replica that does not get the lock
//! skips that cycle. Each pass returns an explicit summary object scoped to
//! that invocation; there is no ambient state between runs.

use crate::choreographer::Choreographer;
use crate::infrastructure::cluster_lock::ClusterLock;
use crate::infrastructure::event_store::{EventStore, EventStoreError, PurgeOutcome};
use crate::record::EventStatus;
use chrono::{Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const SWEEP_LOCK: &str = "recovery-sweep";
const PURGE_LOCK: &str = "retention-purge";

/// Configuration for the recovery sweeper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweeperConfig {
    /// Seconds between sweep cycles
    pub interval_secs: u64,
    /// Committed records younger than this are left alone; avoids racing a
    /// delegator hand-off that is still in flight
    pub grace_secs: u64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            grace_secs: 120,
        }
    }
}

/// Configuration for the retention purger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurgerConfig {
    /// Seconds between purge cycles
    pub interval_secs: u64,
    /// Records older than this are deleted, regardless of status
    pub retention_secs: u64,
}

impl Default for PurgerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 3600,
            retention_secs: 30 * 24 * 60 * 60,
        }
    }
}

/// Result of one recovery sweep pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    /// Committed records examined
    pub scanned: u64,
    /// Records resubmitted to the choreographer
    pub resubmitted: u64,
    /// Records skipped because they are still within the grace period
    pub within_grace: u64,
    /// Resubmissions that failed (logged, never aborting the sweep)
    pub errors: u64,
}

/// Finds committed-but-unprocessed records and resubmits them
///
/// Crash and gap recovery: a record whose handler never completed (process
/// died, handler threw, dispatch hand-off was lost) stays `COMMITTED` and
/// re-enters the pipeline here, in creation order.
pub struct RecoverySweeper {
    store: Arc<dyn EventStore>,
    choreographer: Choreographer,
    lock: Arc<dyn ClusterLock>,
    config: SweeperConfig,
}

impl RecoverySweeper {
    /// Create a sweeper over the given store, dispatcher and lock
    pub fn new(
        store: Arc<dyn EventStore>,
        choreographer: Choreographer,
        lock: Arc<dyn ClusterLock>,
        config: SweeperConfig,
    ) -> Self {
        Self {
            store,
            choreographer,
            lock,
            config,
        }
    }

    /// Run one sweep pass, without the cluster lock
    ///
    /// Lists `COMMITTED` records in creation order, filters out those still
    /// within the grace period, and resubmits the rest. Per-record
    /// resubmission failures are counted and logged; they never abort the
    /// pass.
    pub async fn sweep_once(&self) -> Result<SweepSummary, EventStoreError> {
        let mut summary = SweepSummary::default();
        let cutoff = Utc::now() - ChronoDuration::seconds(self.config.grace_secs as i64);

        for record in self.store.list_by_status(EventStatus::Committed).await? {
            summary.scanned += 1;

            if record.updated_at > cutoff {
                summary.within_grace += 1;
                continue;
            }

            match self.choreographer.submit(record).await {
                Ok(()) => summary.resubmitted += 1,
                Err(e) => {
                    summary.errors += 1;
                    error!("Sweep resubmission failed: {e}");
                }
            }
        }

        Ok(summary)
    }

    /// Run the sweep schedule until the task is aborted
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(self.config.interval_secs));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                self.run_cycle().await;
            }
        })
    }

    async fn run_cycle(&self) {
        match self.lock.try_acquire(SWEEP_LOCK).await {
            Ok(true) => {
                match self.sweep_once().await {
                    Ok(summary) => info!(
                        scanned = summary.scanned,
                        resubmitted = summary.resubmitted,
                        within_grace = summary.within_grace,
                        errors = summary.errors,
                        "Recovery sweep complete"
                    ),
                    Err(e) => error!("Recovery sweep failed: {e}"),
                }
                if let Err(e) = self.lock.release(SWEEP_LOCK).await {
                    warn!("Failed to release sweep lock: {e}");
                }
            }
            Ok(false) => debug!("Sweep lock held by another replica, skipping cycle"),
            Err(e) => warn!("Could not acquire sweep lock: {e}"),
        }
    }
}

/// Deletes event records older than the retention window
///
/// Storage hygiene, not a correctness mechanism: age is the only criterion,
/// so unprocessed records past the window are dropped too (and reported).
pub struct RetentionPurger {
    store: Arc<dyn EventStore>,
    lock: Arc<dyn ClusterLock>,
    config: PurgerConfig,
}

impl RetentionPurger {
    /// Create a purger over the given store and lock
    pub fn new(
        store: Arc<dyn EventStore>,
        lock: Arc<dyn ClusterLock>,
        config: PurgerConfig,
    ) -> Self {
        Self {
            store,
            lock,
            config,
        }
    }

    /// Run one purge pass, without the cluster lock
    pub async fn purge_once(&self) -> Result<PurgeOutcome, EventStoreError> {
        let cutoff = Utc::now() - ChronoDuration::seconds(self.config.retention_secs as i64);
        let outcome = self.store.delete_created_before(cutoff).await?;

        if outcome.unprocessed_dropped > 0 {
            warn!(
                dropped = outcome.unprocessed_dropped,
                "Purge removed records that were never processed"
            );
        }

        Ok(outcome)
    }

    /// Run the purge schedule until the task is aborted
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(self.config.interval_secs));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                self.run_cycle().await;
            }
        })
    }

    async fn run_cycle(&self) {
        match self.lock.try_acquire(PURGE_LOCK).await {
            Ok(true) => {
                match self.purge_once().await {
                    Ok(outcome) => info!(deleted = outcome.deleted, "Retention purge complete"),
                    Err(e) => error!("Retention purge failed: {e}"),
                }
                if let Err(e) = self.lock.release(PURGE_LOCK).await {
                    warn!("Failed to release purge lock: {e}");
                }
            }
            Ok(false) => debug!("Purge lock held by another replica, skipping cycle"),
            Err(e) => warn!("Could not acquire purge lock: {e}"),
        }
    }
}
