//! Periodic status sweep.
//!
//! Each tick takes the tracker's window and writes it to the store in two
//! bulk updates: addresses in the window go UP, everything else goes DOWN.
//! Signals processed while the updates run land in the next window, so a
//! server seen only during a sweep is reported DOWN for that sweep and UP
//! on the next one.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use shared::types::ServerStatus;
use crate::store::{Membership, ServerStore, StoreError};
use crate::tracker::LivenessTracker;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconcilerState {
    #[default]
    Idle,
    Reconciling,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconcileReport {
    pub seen: usize,
    pub marked_up: u64,
    pub marked_down: u64,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcilerStatus {
    pub state: ReconcilerState,
    pub last_run: Option<ReconcileReport>,
}

pub struct Reconciler {
    tracker: Arc<LivenessTracker>,
    store: Arc<dyn ServerStore>,
    status: watch::Sender<ReconcilerStatus>,
}

impl Reconciler {
    pub fn new(tracker: Arc<LivenessTracker>, store: Arc<dyn ServerStore>) -> Self {
        let (status, _) = watch::channel(ReconcilerStatus::default());
        Self {
            tracker,
            store,
            status,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ReconcilerStatus> {
        self.status.subscribe()
    }

    /// One sweep. On failure the window is gone; the next tick starts from
    /// whatever has been marked since.
    pub async fn reconcile_once(&self) -> Result<ReconcileReport, StoreError> {
        self.status.send_modify(|s| s.state = ReconcilerState::Reconciling);

        let window = self.tracker.snapshot_and_clear();
        let result = self.apply(window).await;

        self.status.send_modify(|s| {
            s.state = ReconcilerState::Idle;
            if let Ok(report) = &result {
                s.last_run = Some(report.clone());
            }
        });
        result
    }

    async fn apply(&self, window: HashSet<String>) -> Result<ReconcileReport, StoreError> {
        let seen = window.len();
        let addresses: Vec<String> = window.into_iter().collect();

        let marked_up = self
            .store
            .set_status(addresses.clone(), Membership::In, ServerStatus::Up)
            .await?;
        let marked_down = self
            .store
            .set_status(addresses, Membership::NotIn, ServerStatus::Down)
            .await?;

        Ok(ReconcileReport {
            seen,
            marked_up,
            marked_down,
            finished_at: Utc::now(),
        })
    }

    /// Sweep every `period` until cancelled. The first sweep runs one
    /// period after start.
    pub async fn run(self, period: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.reconcile_once().await {
                        Ok(report) => tracing::info!(
                            "Reconciled {} seen servers: {} marked up, {} marked down",
                            report.seen,
                            report.marked_up,
                            report.marked_down
                        ),
                        Err(e) => tracing::error!("Reconciliation failed, skipping this window: {}", e),
                    }
                }
                _ = cancel.cancelled() => {
                    tracing::info!("Reconciler shutting down");
                    break;
                }
            }
        }
    }
}
