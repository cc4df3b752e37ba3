//! Sync scheduling - manual and periodic modes.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, error, info};

use offsync_common::{Error, Result};

use crate::report::SyncReport;

/// Sync mode configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Sync only when asked or when connectivity returns.
    #[default]
    Manual,
    /// Also sync at regular intervals.
    Periodic {
        #[serde(with = "secs")]
        interval: Duration,
    },
}

mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

/// Sync request types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncRequest {
    /// Explicit request from the caller.
    Sync,
    /// Connectivity was restored.
    Online,
    /// Shutdown the scheduler.
    Shutdown,
}

type Envelope = (SyncRequest, oneshot::Sender<Result<SyncReport>>);

/// Front end for requesting syncs from a running [`SyncSchedulerHandle`].
///
/// Every sync runs on the handle's task, one at a time, so overlapping
/// requests never replay the same queue snapshot twice.
pub struct SyncScheduler {
    mode: Arc<RwLock<SyncMode>>,
    request_tx: mpsc::Sender<Envelope>,
}

impl SyncScheduler {
    /// Create a new scheduler with the given mode.
    pub fn new(mode: SyncMode) -> (Self, SyncSchedulerHandle) {
        let (request_tx, request_rx) = mpsc::channel(100);
        let mode = Arc::new(RwLock::new(mode));

        let scheduler = Self {
            mode: mode.clone(),
            request_tx,
        };
        let handle = SyncSchedulerHandle { mode, request_rx };

        (scheduler, handle)
    }

    /// Request a sync and wait for its report.
    ///
    /// # Errors
    /// - `Error::SchedulerStopped` once the scheduler task has exited
    /// - Whatever the sync itself returned
    pub async fn request_sync(&self) -> Result<SyncReport> {
        self.request(SyncRequest::Sync).await
    }

    /// Signal that connectivity was restored and wait for the resulting sync.
    pub async fn notify_online(&self) -> Result<SyncReport> {
        self.request(SyncRequest::Online).await
    }

    async fn request(&self, request: SyncRequest) -> Result<SyncReport> {
        let (response_tx, response_rx) = oneshot::channel();

        self.request_tx
            .send((request, response_tx))
            .await
            .map_err(|_| Error::SchedulerStopped)?;

        response_rx
            .await
            .map_err(|_| Error::Cancelled)?
    }

    /// Change the sync mode. Takes effect after the current tick.
    pub async fn set_mode(&self, mode: SyncMode) {
        *self.mode.write().await = mode;
    }

    /// Get current sync mode.
    pub async fn get_mode(&self) -> SyncMode {
        self.mode.read().await.clone()
    }

    /// Stop the background task.
    pub async fn shutdown(&self) {
        let (response_tx, _) = oneshot::channel();
        let _ = self
            .request_tx
            .send((SyncRequest::Shutdown, response_tx))
            .await;
    }
}

/// Background side of the scheduler.
pub struct SyncSchedulerHandle {
    mode: Arc<RwLock<SyncMode>>,
    request_rx: mpsc::Receiver<Envelope>,
}

impl SyncSchedulerHandle {
    /// Run the scheduler loop until shutdown or until every
    /// [`SyncScheduler`] is dropped.
    ///
    /// This should be spawned in a tokio task. `sync_fn` is called whenever
    /// a sync is needed; calls never overlap.
    pub async fn run<F, Fut>(mut self, sync_fn: F)
    where
        F: Fn(SyncRequest) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<SyncReport>> + Send,
    {
        let mut current = self.interval_duration().await;
        let mut ticker = Self::create_interval(current);

        info!("Sync scheduler started");

        loop {
            tokio::select! {
                received = self.request_rx.recv() => {
                    let Some((request, response_tx)) = received else {
                        info!("All schedulers dropped, stopping");
                        break;
                    };
                    if request == SyncRequest::Shutdown {
                        info!("Received shutdown request");
                        break;
                    }

                    debug!("Processing sync request: {:?}", request);
                    let result = sync_fn(request).await;
                    let _ = response_tx.send(result);
                }

                _ = Self::wait_for_periodic(&mut ticker) => {
                    debug!("Triggering periodic sync");
                    match sync_fn(SyncRequest::Sync).await {
                        Ok(report) => {
                            if report.changed() || report.halted.is_some() {
                                info!(
                                    "Periodic sync completed: {} replayed, {} discarded, {} remaining",
                                    report.replayed, report.discarded, report.remaining
                                );
                            }
                        }
                        Err(e) => error!("Periodic sync failed: {}", e),
                    }
                }
            }

            // Recreate interval if mode changed
            let expected = self.interval_duration().await;
            if expected != current {
                debug!("Sync interval changed to {:?}", expected);
                current = expected;
                ticker = Self::create_interval(current);
            }
        }
    }

    fn create_interval(duration: Option<Duration>) -> Option<Interval> {
        duration.map(|d| {
            let mut ticker = interval(d);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.reset();
            ticker
        })
    }

    async fn interval_duration(&self) -> Option<Duration> {
        match &*self.mode.read().await {
            SyncMode::Periodic { interval } if !interval.is_zero() => Some(*interval),
            _ => None,
        }
    }

    async fn wait_for_periodic(ticker: &mut Option<Interval>) {
        match ticker {
            Some(ticker) => {
                ticker.tick().await;
            }
            None => std::future::pending::<()>().await,
        }
    }
}
