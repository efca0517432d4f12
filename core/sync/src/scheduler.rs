//! Sync scheduling - manual and periodic modes.
//!
//! Requests are processed one at a time by a single background task, which
//! is what keeps cycles from overlapping.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use fitsync_common::{Error, Result};
use fitsync_storage::{CloudStore, LocalStore};

use crate::engine::{PullSummary, PushSummary, SyncEngine, SyncReport};
use crate::retry::{Backoff, RetryConfig};
use crate::state::StateStore;

/// Sync mode configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncMode {
    /// Sync only when asked.
    Manual,
    /// Full sync at regular intervals, plus explicit requests.
    Periodic { interval: Duration },
}

impl SyncMode {
    fn interval(&self) -> Option<Duration> {
        match self {
            SyncMode::Manual => None,
            SyncMode::Periodic { interval } => Some(*interval),
        }
    }
}

/// Sync request types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncRequest {
    /// Pull then push.
    Full,
    /// Pull only.
    Pull,
    /// Push only.
    Push,
}

/// Result of a processed request.
#[derive(Debug)]
pub enum SyncResult {
    Full(SyncReport),
    Pull(PullSummary),
    Push(PushSummary),
}

impl SyncResult {
    /// Whether the request achieved anything.
    pub fn is_success(&self) -> bool {
        match self {
            SyncResult::Full(report) => report.is_success(),
            SyncResult::Pull(_) | SyncResult::Push(_) => true,
        }
    }
}

enum Command {
    Sync(SyncRequest, oneshot::Sender<Result<SyncResult>>),
    Shutdown,
}

/// Front end for submitting requests to the scheduler task.
#[derive(Clone)]
pub struct SyncScheduler {
    mode: Arc<watch::Sender<SyncMode>>,
    commands: mpsc::Sender<Command>,
}

impl SyncScheduler {
    /// Create a new scheduler with the given mode and default backoff.
    pub fn new(mode: SyncMode) -> (Self, SyncSchedulerHandle) {
        Self::with_retry(mode, RetryConfig::default())
    }

    /// Create a new scheduler with an explicit backoff policy for failed
    /// periodic cycles.
    pub fn with_retry(mode: SyncMode, retry: RetryConfig) -> (Self, SyncSchedulerHandle) {
        let (commands_tx, commands_rx) = mpsc::channel(100);
        let (mode_tx, mode_rx) = watch::channel(mode);

        let scheduler = Self {
            mode: Arc::new(mode_tx),
            commands: commands_tx,
        };

        let handle = SyncSchedulerHandle {
            mode: mode_rx,
            commands: commands_rx,
            backoff: Backoff::new(retry),
        };

        (scheduler, handle)
    }

    /// Request a full sync and wait for its report.
    pub async fn request_sync(&self) -> Result<SyncResult> {
        self.request(SyncRequest::Full).await
    }

    /// Submit a request and wait for its result.
    pub async fn request(&self, request: SyncRequest) -> Result<SyncResult> {
        let (response_tx, response_rx) = oneshot::channel();

        self.commands
            .send(Command::Sync(request, response_tx))
            .await
            .map_err(|_| Error::Unavailable("sync scheduler is not running".to_string()))?;

        response_rx
            .await
            .map_err(|_| Error::Unavailable("sync scheduler stopped before replying".to_string()))?
    }

    /// Change the sync mode. Takes effect immediately.
    pub fn set_mode(&self, mode: SyncMode) {
        self.mode.send_replace(mode);
    }

    /// Get current sync mode.
    pub fn mode(&self) -> SyncMode {
        self.mode.borrow().clone()
    }

    /// Stop the scheduler task after the current request.
    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown).await;
    }
}

/// The scheduler's background task.
pub struct SyncSchedulerHandle {
    mode: watch::Receiver<SyncMode>,
    commands: mpsc::Receiver<Command>,
    backoff: Backoff,
}

impl SyncSchedulerHandle {
    /// Run the scheduler loop until shutdown.
    ///
    /// This should be spawned in a tokio task. `sync_fn` is called for every
    /// explicit request and for every periodic cycle.
    pub async fn run<F, Fut>(self, sync_fn: F)
    where
        F: Fn(SyncRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<SyncResult>> + Send,
    {
        let Self {
            mut mode,
            mut commands,
            mut backoff,
        } = self;

        // A periodic schedule starts with an immediate cycle.
        let mut next_due = mode.borrow_and_update().interval().map(|_| Instant::now());

        info!("Sync scheduler started");

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Sync(request, response_tx)) => {
                        debug!("Processing sync request: {:?}", request);
                        let result = sync_fn(request).await;
                        let _ = response_tx.send(result);
                    }
                    Some(Command::Shutdown) | None => {
                        info!("Sync scheduler shutting down");
                        break;
                    }
                },

                changed = mode.changed() => {
                    if changed.is_err() {
                        info!("Sync scheduler shutting down");
                        break;
                    }
                    let current = mode.borrow_and_update().clone();
                    info!("Sync mode changed to {:?}", current);
                    backoff.reset();
                    next_due = current.interval().map(|_| Instant::now());
                }

                _ = wait_until(next_due) => {
                    debug!("Triggering periodic sync");
                    let succeeded = match sync_fn(SyncRequest::Full).await {
                        Ok(result) if result.is_success() => {
                            if let SyncResult::Full(report) = &result {
                                info!("Periodic sync completed: {}", report.summary());
                            }
                            true
                        }
                        Ok(result) => {
                            if let SyncResult::Full(report) = &result {
                                warn!("Periodic sync failed: {}", report.summary());
                            }
                            false
                        }
                        Err(e) => {
                            error!("Periodic sync failed: {}", e);
                            false
                        }
                    };

                    let interval = mode.borrow().interval();
                    next_due = interval.map(|interval| {
                        let delay = if succeeded {
                            backoff.reset();
                            interval
                        } else {
                            match backoff.next_delay() {
                                Some(delay) => {
                                    info!("Retrying sync in {:?}", delay);
                                    delay.min(interval)
                                }
                                None => {
                                    warn!(
                                        "Sync failed {} times in a row, waiting for next interval",
                                        backoff.failures()
                                    );
                                    backoff.reset();
                                    interval
                                }
                            }
                        };
                        Instant::now() + delay
                    });
                }
            }
        }
    }

    /// Run the scheduler loop against a sync engine.
    pub async fn run_engine<L, C, S>(self, engine: Arc<SyncEngine<L, C, S>>)
    where
        L: LocalStore + ?Sized + 'static,
        C: CloudStore + ?Sized + 'static,
        S: StateStore + 'static,
    {
        self.run(move |request| {
            let engine = Arc::clone(&engine);
            async move {
                match request {
                    SyncRequest::Full => engine.full_sync().await.map(SyncResult::Full),
                    SyncRequest::Pull => engine.pull_from_cloud().await.map(SyncResult::Pull),
                    SyncRequest::Push => engine.push_to_cloud().await.map(SyncResult::Push),
                }
            }
        })
        .await
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn push_result() -> Result<SyncResult> {
        Ok(SyncResult::Push(PushSummary {
            synced_at: Utc::now(),
            records_sent: 1,
        }))
    }

    #[tokio::test]
    async fn test_mode_change() {
        let (scheduler, _handle) = SyncScheduler::new(SyncMode::Manual);
        assert_eq!(scheduler.mode(), SyncMode::Manual);

        scheduler.set_mode(SyncMode::Periodic {
            interval: Duration::from_secs(60),
        });
        assert!(matches!(scheduler.mode(), SyncMode::Periodic { .. }));
    }

    #[tokio::test]
    async fn test_sync_request() {
        let (scheduler, handle) = SyncScheduler::new(SyncMode::Manual);

        let sync_count = Arc::new(AtomicU32::new(0));
        let count_clone = sync_count.clone();

        let handle_task = tokio::spawn(async move {
            handle
                .run(move |request| {
                    let count = count_clone.clone();
                    async move {
                        assert_eq!(request, SyncRequest::Push);
                        count.fetch_add(1, Ordering::SeqCst);
                        push_result()
                    }
                })
                .await;
        });

        let result = scheduler.request(SyncRequest::Push).await.unwrap();
        assert!(result.is_success());
        assert_eq!(sync_count.load(Ordering::SeqCst), 1);

        scheduler.shutdown().await;
        handle_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_request_after_shutdown_is_unavailable() {
        let (scheduler, handle) = SyncScheduler::new(SyncMode::Manual);
        let handle_task = tokio::spawn(handle.run(|_| async { push_result() }));

        scheduler.shutdown().await;
        handle_task.await.unwrap();

        let err = scheduler.request_sync().await.unwrap_err();
        assert!(matches!(err, Error::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_periodic_mode_runs_cycles() {
        let (scheduler, handle) = SyncScheduler::new(SyncMode::Periodic {
            interval: Duration::from_millis(10),
        });

        let sync_count = Arc::new(AtomicU32::new(0));
        let count_clone = sync_count.clone();
        let handle_task = tokio::spawn(handle.run(move |_| {
            let count = count_clone.clone();
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                push_result()
            }
        }));

        tokio::time::sleep(Duration::from_millis(200)).await;
        scheduler.shutdown().await;
        handle_task.await.unwrap();

        assert!(sync_count.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_failed_cycles_back_off_then_wait_for_interval() {
        let retry = RetryConfig::new(2)
            .with_initial_delay(Duration::from_millis(1))
            .with_jitter(false);
        let (scheduler, handle) = SyncScheduler::with_retry(
            SyncMode::Periodic {
                interval: Duration::from_secs(3600),
            },
            retry,
        );

        let sync_count = Arc::new(AtomicU32::new(0));
        let count_clone = sync_count.clone();
        let handle_task = tokio::spawn(handle.run(move |_| {
            let count = count_clone.clone();
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                Err(Error::Network("offline".to_string()))
            }
        }));

        tokio::time::sleep(Duration::from_millis(200)).await;
        scheduler.shutdown().await;
        handle_task.await.unwrap();

        // Initial cycle plus two quick retries; the next one is an hour out.
        assert_eq!(sync_count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_switching_to_periodic_triggers_cycle() {
        let (scheduler, handle) = SyncScheduler::new(SyncMode::Manual);

        let sync_count = Arc::new(AtomicU32::new(0));
        let count_clone = sync_count.clone();
        let handle_task = tokio::spawn(handle.run(move |_| {
            let count = count_clone.clone();
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                push_result()
            }
        }));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(sync_count.load(Ordering::SeqCst), 0);

        scheduler.set_mode(SyncMode::Periodic {
            interval: Duration::from_secs(3600),
        });
        tokio::time::sleep(Duration::from_millis(100)).await;

        scheduler.shutdown().await;
        handle_task.await.unwrap();
        assert_eq!(sync_count.load(Ordering::SeqCst), 1);
    }
}
