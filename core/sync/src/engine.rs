//! Core sync engine that orchestrates pull and push cycles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use fitsync_common::{DeviceId, Error, Result, SyncPayload};
use fitsync_storage::{CloudStore, ImportRequest, LocalStore};

use crate::conflict::{MergePolicy, MergeStrategy};
use crate::mapping::{self, ImportReport};
use crate::state::{ClientStateSnapshot, StateStore, SyncClientState};

/// Configuration for the sync engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Whether sync may run at all.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Account email attached to pushes.
    #[serde(default)]
    pub email: Option<String>,
    /// How pulled records are reconciled with local copies.
    #[serde(default)]
    pub merge_strategy: MergeStrategy,
}

fn default_enabled() -> bool {
    true
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            email: None,
            merge_strategy: MergeStrategy::default(),
        }
    }
}

/// Where the engine is in a sync cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncStatus {
    /// No cycle running; the last one (if any) fully succeeded.
    Idle,
    /// Fetching changes from the cloud store.
    Pulling,
    /// Sending the local snapshot to the cloud store.
    Pushing,
    /// The last pull failed and the push succeeded.
    PullFailed,
    /// The last push failed.
    PushFailed,
}

/// Result of a successful pull.
#[derive(Debug, Clone)]
pub struct PullSummary {
    /// Cursor the export was requested from (`None` = full export).
    pub since: Option<DateTime<Utc>>,
    /// Server "as-of" time of the export.
    pub synced_at: DateTime<Utc>,
    /// Effect on the local store.
    pub import: ImportReport,
}

/// Result of a successful push.
#[derive(Debug, Clone)]
pub struct PushSummary {
    /// Server commit time of the import.
    pub synced_at: DateTime<Utc>,
    /// Number of records sent.
    pub records_sent: usize,
}

/// Outcome of one `full_sync` cycle, with both phase results kept.
#[derive(Debug)]
pub struct SyncReport {
    /// Pull phase result.
    pub pull: Result<PullSummary>,
    /// Push phase result.
    pub push: Result<PushSummary>,
    /// When the cycle started.
    pub started_at: DateTime<Utc>,
    /// How long the cycle took.
    pub duration: Duration,
}

impl SyncReport {
    /// A cycle succeeds if at least one phase succeeded.
    pub fn is_success(&self) -> bool {
        self.pull.is_ok() || self.push.is_ok()
    }

    /// True only when both phases succeeded.
    pub fn is_complete(&self) -> bool {
        self.pull.is_ok() && self.push.is_ok()
    }

    /// Pull error, if the pull failed.
    pub fn pull_error(&self) -> Option<&Error> {
        self.pull.as_ref().err()
    }

    /// Push error, if the push failed.
    pub fn push_error(&self) -> Option<&Error> {
        self.push.as_ref().err()
    }

    /// One-line human readable summary.
    pub fn summary(&self) -> String {
        let pull = match &self.pull {
            Ok(p) => format!("pulled {} ({} unchanged)", p.import.applied(), p.import.unchanged),
            Err(e) => format!("pull failed: {}", e),
        };
        let push = match &self.push {
            Ok(p) => format!("pushed {}", p.records_sent),
            Err(e) => format!("push failed: {}", e),
        };
        format!("{}; {} in {:?}", pull, push, self.duration)
    }
}

/// Clears the in-flight flag when a cycle ends, however it ends.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Sync engine for one device.
///
/// Owns only its bookkeeping state (device id and cursor); both stores
/// are shared collaborators.
pub struct SyncEngine<L, C, S>
where
    L: LocalStore + ?Sized,
    C: CloudStore + ?Sized,
    S: StateStore,
{
    /// On-device working copy.
    local: Arc<L>,
    /// Authoritative server store.
    cloud: Arc<C>,
    /// Cursor and device identity.
    state: SyncClientState<S>,
    /// Merge policy for pulled records.
    policy: MergePolicy,
    /// Configuration.
    config: SyncConfig,
    /// Current cycle status.
    status: watch::Sender<SyncStatus>,
    /// Set while a pull, push or full cycle is running.
    in_flight: AtomicBool,
}

impl<L, C, S> SyncEngine<L, C, S>
where
    L: LocalStore + ?Sized,
    C: CloudStore + ?Sized,
    S: StateStore,
{
    /// Create a new sync engine.
    pub fn new(local: Arc<L>, cloud: Arc<C>, state_store: S, config: SyncConfig) -> Self {
        let (status, _) = watch::channel(SyncStatus::Idle);
        Self {
            local,
            cloud,
            state: SyncClientState::new(state_store),
            policy: MergePolicy::new(config.merge_strategy),
            config,
            status,
            in_flight: AtomicBool::new(false),
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Get the local store.
    pub fn local(&self) -> &Arc<L> {
        &self.local
    }

    /// Get the client state.
    pub fn client_state(&self) -> &SyncClientState<S> {
        &self.state
    }

    /// Current cycle status.
    pub fn status(&self) -> SyncStatus {
        *self.status.borrow()
    }

    /// Watch status transitions.
    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    /// This installation's device token.
    pub fn device_id(&self) -> DeviceId {
        self.state.device_id()
    }

    /// The last successful sync boundary.
    pub fn last_synced_at(&self) -> Result<Option<DateTime<Utc>>> {
        self.state.last_synced_at()
    }

    /// Device id and cursor together.
    pub fn snapshot(&self) -> Result<ClientStateSnapshot> {
        self.state.snapshot()
    }

    /// Forget the cursor so the next pull is a full export.
    pub fn reset_cursor(&self) -> Result<()> {
        self.state.reset()
    }

    /// Full snapshot of the local store.
    pub fn export_local_data(&self) -> Result<SyncPayload> {
        mapping::export_local_data(self.local.as_ref())
    }

    /// Upsert a payload into the local store using the configured policy.
    pub fn import_cloud_data(&self, payload: &SyncPayload) -> Result<ImportReport> {
        mapping::import_cloud_data(self.local.as_ref(), payload, &self.policy)
    }

    /// Check that sync may run at all.
    ///
    /// # Errors
    /// - `Error::Unavailable` when sync is disabled in the configuration
    pub fn check_available(&self) -> Result<()> {
        if !self.config.enabled {
            return Err(Error::Unavailable("sync is disabled".to_string()));
        }
        Ok(())
    }

    fn begin(&self) -> Result<InFlightGuard<'_>> {
        self.check_available()?;
        if self.in_flight.swap(true, Ordering::SeqCst) {
            return Err(Error::Unavailable(
                "a sync operation is already in progress".to_string(),
            ));
        }
        Ok(InFlightGuard(&self.in_flight))
    }

    fn set_status(&self, status: SyncStatus) {
        debug!("Sync status: {:?}", status);
        self.status.send_replace(status);
    }

    /// Fetch changes since the cursor and apply them locally.
    pub async fn pull_from_cloud(&self) -> Result<PullSummary> {
        let _guard = self.begin()?;
        self.set_status(SyncStatus::Pulling);
        let result = self.pull_phase().await;
        self.set_status(if result.is_ok() {
            SyncStatus::Idle
        } else {
            SyncStatus::PullFailed
        });
        result
    }

    /// Send the full local snapshot and advance the cursor.
    pub async fn push_to_cloud(&self) -> Result<PushSummary> {
        let _guard = self.begin()?;
        self.set_status(SyncStatus::Pushing);
        let result = self.push_phase().await;
        self.set_status(if result.is_ok() {
            SyncStatus::Idle
        } else {
            SyncStatus::PushFailed
        });
        result
    }

    /// Run one cycle: pull, then push.
    ///
    /// Push runs even if pull failed. The cycle succeeds if either phase
    /// succeeded; both phase results are kept in the report.
    ///
    /// # Errors
    /// - `Error::Unavailable` if preconditions fail; no phase is attempted
    pub async fn full_sync(&self) -> Result<SyncReport> {
        let _guard = self.begin()?;
        let start = Instant::now();
        let started_at = Utc::now();

        info!("Starting full sync");

        self.set_status(SyncStatus::Pulling);
        let pull = self.pull_phase().await;
        if pull.is_err() {
            self.set_status(SyncStatus::PullFailed);
        }

        self.set_status(SyncStatus::Pushing);
        let push = self.push_phase().await;

        self.set_status(match (&pull, &push) {
            (_, Err(_)) => SyncStatus::PushFailed,
            (Err(_), Ok(_)) => SyncStatus::PullFailed,
            (Ok(_), Ok(_)) => SyncStatus::Idle,
        });

        let report = SyncReport {
            pull,
            push,
            started_at,
            duration: start.elapsed(),
        };

        if report.is_success() {
            info!("Full sync completed: {}", report.summary());
        } else {
            error!("Full sync failed: {}", report.summary());
        }

        Ok(report)
    }

    async fn pull_phase(&self) -> Result<PullSummary> {
        let since = self.state.last_synced_at()?;
        match since {
            Some(at) => info!("Pulling changes since {}", at),
            None => info!("Pulling full export (first sync)"),
        }

        let response = match self.cloud.export(since).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Pull from {} failed: {}", self.cloud.name(), e);
                return Err(e);
            }
        };

        // The payload is complete at this point; only now touch the local store.
        let import = self.import_cloud_data(&response.data)?;
        self.state.advance_cursor(response.synced_at)?;

        info!(
            "Pulled {} records: {} inserted, {} updated, {} kept local",
            response.data.record_count(),
            import.inserted,
            import.updated,
            import.skipped_stale
        );

        Ok(PullSummary {
            since,
            synced_at: response.synced_at,
            import,
        })
    }

    async fn push_phase(&self) -> Result<PushSummary> {
        let data = self.export_local_data()?;
        let records_sent = data.record_count();
        let request = ImportRequest {
            last_synced_at: self.state.last_synced_at()?,
            device_id: self.state.device_id(),
            email: self.config.email.clone(),
            data,
        };

        info!(
            "Pushing {} records from device {}",
            records_sent, request.device_id
        );

        let response = match self.cloud.import(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Push to {} failed: {}", self.cloud.name(), e);
                return Err(e);
            }
        };

        self.state.advance_cursor(response.synced_at)?;

        Ok(PushSummary {
            synced_at: response.synced_at,
            records_sent,
        })
    }
}
