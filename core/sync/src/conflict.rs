//! Merge policy applied when an incoming record meets a local copy.

use serde::{Deserialize, Serialize};

use fitsync_common::Record;

/// How an incoming cloud record is reconciled with the local copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Blind upsert: the incoming record always replaces the local one.
    LastWriteWins,
    /// Guarded upsert: the incoming record replaces the local one unless
    /// the local copy is strictly newer.
    #[default]
    PreferNewer,
}

/// Outcome of comparing an incoming record with the local copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeDecision {
    /// No local copy exists.
    Insert,
    /// Replace the local copy.
    Overwrite,
    /// The local copy is newer; leave it.
    KeepLocal,
}

impl MergeDecision {
    /// Whether the incoming record should be written.
    pub fn applies(self) -> bool {
        !matches!(self, MergeDecision::KeepLocal)
    }
}

/// Record-granularity merge policy. There is no per-field merge.
#[derive(Debug, Clone, Copy, Default)]
pub struct MergePolicy {
    strategy: MergeStrategy,
}

impl MergePolicy {
    /// Create a policy with the given strategy.
    pub fn new(strategy: MergeStrategy) -> Self {
        Self { strategy }
    }

    /// Get the configured strategy.
    pub fn strategy(&self) -> MergeStrategy {
        self.strategy
    }

    /// Decide what to do with `incoming` given the local copy, if any.
    ///
    /// Ties resolve to `Overwrite`, so applying the same record twice is
    /// idempotent. A side without `updatedAt` cannot be ordered and the
    /// incoming record wins.
    pub fn decide(&self, local: Option<&Record>, incoming: &Record) -> MergeDecision {
        let Some(local) = local else {
            return MergeDecision::Insert;
        };

        match self.strategy {
            MergeStrategy::LastWriteWins => MergeDecision::Overwrite,
            MergeStrategy::PreferNewer => match (local.updated_at, incoming.updated_at) {
                (Some(ours), Some(theirs)) if ours > theirs => MergeDecision::KeepLocal,
                _ => MergeDecision::Overwrite,
            },
        }
    }
}
