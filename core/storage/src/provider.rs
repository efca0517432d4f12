//! Store trait definitions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use fitsync_common::{DeviceId, EntityId, EntityKind, Record, Result, SyncPayload};

/// On-device store holding the device's full working copy.
///
/// Operations are synchronous: local reads and writes never suspend the
/// sync protocol. Implementations must be safe to share across tasks.
pub trait LocalStore: Send + Sync {
    /// Get the store name (e.g., "memory", "sqlite").
    fn name(&self) -> &str;

    /// Fetch one record by identifier.
    ///
    /// # Returns
    /// `None` if no record of `kind` has this identifier.
    fn get(&self, kind: EntityKind, id: &EntityId) -> Result<Option<Record>>;

    /// Insert or overwrite a record, keyed by its identifier.
    ///
    /// # Postconditions
    /// - Exactly one record of `kind` with `record.id` exists
    fn put(&self, kind: EntityKind, record: Record) -> Result<()>;

    /// Read every record of a kind, including soft-deleted ones.
    fn scan(&self, kind: EntityKind) -> Result<Vec<Record>>;

    /// Remove every record. Only used by an explicit user data reset.
    fn clear(&self) -> Result<()>;
}

/// Response to a bulk export from the cloud store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportResponse {
    /// Records changed since the requested cursor (or everything).
    pub data: SyncPayload,
    /// Server-side "as-of" time of the export.
    pub synced_at: DateTime<Utc>,
}

/// Bulk import sent to the cloud store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRequest {
    /// Cursor the device held when it built the payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<DateTime<Utc>>,
    /// Diagnostic tag of the sending installation.
    pub device_id: DeviceId,
    /// Account email, if the client knows it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Full local snapshot.
    pub data: SyncPayload,
}

/// Response to a bulk import.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResponse {
    /// Server-side commit time of the import.
    pub synced_at: DateTime<Utc>,
}

/// Server-side store holding the authoritative merged copy of a user's data.
///
/// Both operations are scoped to the authenticated user by the
/// implementation. They are the only suspension points of a sync cycle.
#[async_trait]
pub trait CloudStore: Send + Sync {
    /// Get the store name (e.g., "memory", "http").
    fn name(&self) -> &str;

    /// Export records changed after `since`, or everything when `None`.
    ///
    /// # Errors
    /// - `Error::Network` when the store cannot be reached
    /// - `Error::Server` when the store rejects the request
    async fn export(&self, since: Option<DateTime<Utc>>) -> Result<ExportResponse>;

    /// Upsert every record of the payload by identifier.
    ///
    /// # Errors
    /// - `Error::Network` when the store cannot be reached
    /// - `Error::Server` when the store rejects the request
    async fn import(&self, request: ImportRequest) -> Result<ImportResponse>;
}
