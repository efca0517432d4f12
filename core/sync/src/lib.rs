//! FitSync Sync Engine
//!
//! Keeps a device's local fitness data and the cloud copy converged:
//! - Pull-then-push cycles with independent phase outcomes
//! - Server-issued sync cursor and per-installation device identity
//! - Additive, idempotent import with an optional newer-wins guard
//! - Manual and periodic scheduling with backoff after failures

pub mod conflict;
pub mod engine;
pub mod mapping;
pub mod retry;
pub mod scheduler;
pub mod state;

// Re-export main types
pub use conflict::{MergeDecision, MergePolicy, MergeStrategy};
pub use engine::{PullSummary, PushSummary, SyncConfig, SyncEngine, SyncReport, SyncStatus};
pub use mapping::{export_local_data, import_cloud_data, ImportReport};
pub use retry::{Backoff, RetryConfig};
pub use scheduler::{SyncMode, SyncRequest, SyncResult, SyncScheduler, SyncSchedulerHandle};
pub use state::{
    ClientStateSnapshot, FileStateStore, MemoryStateStore, StateStore, SyncClientState,
    DEVICE_ID_KEY, LAST_SYNCED_AT_KEY,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_exports() {
        let _config = SyncConfig::default();
        let _retry_config = RetryConfig::default();
        let _policy = MergePolicy::default();
        let _state = SyncClientState::new(MemoryStateStore::new());
    }
}
