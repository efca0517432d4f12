//! In-memory stores for testing.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tracing::debug;

use fitsync_common::{EntityId, EntityKind, Error, Record, Result, SyncPayload};

use crate::provider::{CloudStore, ExportResponse, ImportRequest, ImportResponse, LocalStore};

/// In-memory local store.
///
/// Useful for testing and development. All data is stored in memory
/// and lost on drop.
#[derive(Default)]
pub struct MemoryLocalStore {
    records: RwLock<HashMap<EntityKind, BTreeMap<EntityId, Record>>>,
}

impl MemoryLocalStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of records across all kinds.
    pub fn len(&self) -> usize {
        self.records
            .read()
            .map(|r| r.values().map(BTreeMap::len).sum())
            .unwrap_or(0)
    }

    /// Check if the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<T>(_: T) -> Error {
    Error::LocalStore("memory store lock poisoned".to_string())
}

impl LocalStore for MemoryLocalStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn get(&self, kind: EntityKind, id: &EntityId) -> Result<Option<Record>> {
        let records = self.records.read().map_err(poisoned)?;
        Ok(records.get(&kind).and_then(|m| m.get(id)).cloned())
    }

    fn put(&self, kind: EntityKind, record: Record) -> Result<()> {
        let mut records = self.records.write().map_err(poisoned)?;
        records
            .entry(kind)
            .or_default()
            .insert(record.id.clone(), record);
        Ok(())
    }

    fn scan(&self, kind: EntityKind) -> Result<Vec<Record>> {
        let records = self.records.read().map_err(poisoned)?;
        Ok(records
            .get(&kind)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default())
    }

    fn clear(&self) -> Result<()> {
        self.records.write().map_err(poisoned)?.clear();
        Ok(())
    }
}

/// A row held by the fake server, stamped with the server time it last changed.
#[derive(Debug, Clone)]
struct CloudRow {
    record: Record,
    changed_at: DateTime<Utc>,
}

/// Failure to inject into the next call.
#[derive(Debug, Clone)]
struct InjectedFailure {
    status: u16,
    message: String,
}

impl InjectedFailure {
    fn into_error(self) -> Error {
        Error::Server {
            status: self.status,
            message: self.message,
        }
    }
}

#[derive(Debug, Default)]
struct CloudState {
    rows: BTreeMap<(EntityKind, EntityId), CloudRow>,
    last_stamp: Option<DateTime<Utc>>,
    offline: bool,
    fail_next_export: Option<InjectedFailure>,
    fail_next_import: Option<InjectedFailure>,
    imports: Vec<ImportRequest>,
    export_calls: Vec<Option<DateTime<Utc>>>,
}

impl CloudState {
    /// Next server time, strictly greater than any time handed out before.
    fn next_stamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let stamp = match self.last_stamp {
            Some(last) if now <= last => last + Duration::milliseconds(1),
            _ => now,
        };
        self.last_stamp = Some(stamp);
        stamp
    }

    fn upsert(&mut self, kind: EntityKind, incoming: Record, stamp: DateTime<Utc>) -> bool {
        let key = (kind, incoming.id.clone());
        match self.rows.get_mut(&key) {
            Some(row) => {
                let newer = match (incoming.updated_at, row.record.updated_at) {
                    (Some(inc), Some(cur)) => inc >= cur,
                    _ => true,
                };
                if newer && row.record != incoming {
                    row.record = incoming;
                    row.changed_at = stamp;
                    true
                } else {
                    false
                }
            }
            None => {
                self.rows.insert(
                    key,
                    CloudRow {
                        record: incoming,
                        changed_at: stamp,
                    },
                );
                true
            }
        }
    }
}

/// In-memory fake of the cloud store, holding one user's data.
///
/// Clones share the same state, so several simulated devices can sync
/// against one server. Applies upsert-by-identifier where a record only
/// replaces the stored copy if its `updatedAt` is not older.
#[derive(Debug, Clone, Default)]
pub struct MemoryCloudStore {
    state: Arc<Mutex<CloudState>>,
}

impl MemoryCloudStore {
    /// Create a new empty server.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, CloudState>> {
        self.state.lock().map_err(|_| Error::Server {
            status: 500,
            message: "cloud state lock poisoned".to_string(),
        })
    }

    /// Simulate losing (or regaining) connectivity.
    pub fn set_offline(&self, offline: bool) {
        if let Ok(mut state) = self.lock() {
            state.offline = offline;
        }
    }

    /// Make the next export fail with the given server error.
    pub fn fail_next_export(&self, status: u16, message: impl Into<String>) {
        if let Ok(mut state) = self.lock() {
            state.fail_next_export = Some(InjectedFailure {
                status,
                message: message.into(),
            });
        }
    }

    /// Make the next import fail with the given server error.
    pub fn fail_next_import(&self, status: u16, message: impl Into<String>) {
        if let Ok(mut state) = self.lock() {
            state.fail_next_import = Some(InjectedFailure {
                status,
                message: message.into(),
            });
        }
    }

    /// Write a record directly on the server, as another client of the
    /// CRUD API would.
    pub fn seed(&self, kind: EntityKind, record: Record) {
        if let Ok(mut state) = self.lock() {
            let stamp = state.next_stamp();
            state.upsert(kind, record, stamp);
        }
    }

    /// Read the server's copy of a record.
    pub fn get(&self, kind: EntityKind, id: &EntityId) -> Option<Record> {
        let state = self.lock().ok()?;
        state
            .rows
            .get(&(kind, id.clone()))
            .map(|row| row.record.clone())
    }

    /// Number of records held by the server.
    pub fn record_count(&self) -> usize {
        self.lock().map(|s| s.rows.len()).unwrap_or(0)
    }

    /// Every import request received, in arrival order.
    pub fn imports(&self) -> Vec<ImportRequest> {
        self.lock().map(|s| s.imports.clone()).unwrap_or_default()
    }

    /// The `since` argument of every export request, in arrival order.
    pub fn export_calls(&self) -> Vec<Option<DateTime<Utc>>> {
        self.lock().map(|s| s.export_calls.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl CloudStore for MemoryCloudStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn export(&self, since: Option<DateTime<Utc>>) -> Result<ExportResponse> {
        let mut state = self.lock()?;
        if state.offline {
            return Err(Error::Network("cloud store unreachable".to_string()));
        }
        state.export_calls.push(since);
        if let Some(failure) = state.fail_next_export.take() {
            return Err(failure.into_error());
        }

        let mut data = SyncPayload::new();
        for ((kind, _), row) in &state.rows {
            if since.map_or(true, |s| row.changed_at > s) {
                data.push(*kind, row.record.clone());
            }
        }
        let synced_at = state.next_stamp();
        debug!(
            "Memory cloud export since {:?}: {} records",
            since,
            data.record_count()
        );

        Ok(ExportResponse { data, synced_at })
    }

    async fn import(&self, request: ImportRequest) -> Result<ImportResponse> {
        let mut state = self.lock()?;
        if state.offline {
            return Err(Error::Network("cloud store unreachable".to_string()));
        }
        if let Some(failure) = state.fail_next_import.take() {
            return Err(failure.into_error());
        }

        state.imports.push(request.clone());
        let stamp = state.next_stamp();
        let mut changed = 0;
        for (kind, records) in request.data.iter() {
            for record in records {
                if state.upsert(kind, record.clone(), stamp) {
                    changed += 1;
                }
            }
        }
        debug!(
            "Memory cloud import from device {}: {} records changed",
            request.device_id, changed
        );

        Ok(ImportResponse { synced_at: stamp })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use fitsync_common::DeviceId;

    fn id(s: &str) -> EntityId {
        EntityId::new(s).unwrap()
    }

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn import_of(kind: EntityKind, record: Record) -> ImportRequest {
        let mut data = SyncPayload::new();
        data.push(kind, record);
        ImportRequest {
            last_synced_at: None,
            device_id: DeviceId::new("test-device").unwrap(),
            email: None,
            data,
        }
    }

    #[test]
    fn test_local_put_get() {
        let store = MemoryLocalStore::new();
        let record = Record::new(id("squat")).with_field("muscle", "legs");

        store.put(EntityKind::Exercise, record.clone()).unwrap();
        assert_eq!(store.get(EntityKind::Exercise, &id("squat")).unwrap(), Some(record));
        assert_eq!(store.get(EntityKind::Program, &id("squat")).unwrap(), None);
    }

    #[test]
    fn test_local_put_overwrites() {
        let store = MemoryLocalStore::new();
        store
            .put(EntityKind::Exercise, Record::new(id("squat")).with_field("sets", 3))
            .unwrap();
        store
            .put(EntityKind::Exercise, Record::new(id("squat")).with_field("sets", 5))
            .unwrap();

        let scanned = store.scan(EntityKind::Exercise).unwrap();
        assert_eq!(scanned.len(), 1);
        assert_eq!(scanned[0].field("sets"), Some(&serde_json::json!(5)));
    }

    #[test]
    fn test_local_scan_sorted_and_clear() {
        let store = MemoryLocalStore::new();
        for name in ["c", "a", "b"] {
            store.put(EntityKind::WorkoutLog, Record::new(id(name))).unwrap();
        }
        let ids: Vec<_> = store
            .scan(EntityKind::WorkoutLog)
            .unwrap()
            .into_iter()
            .map(|r| r.id.to_string())
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);

        store.clear().unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_cloud_export_since_is_exclusive() {
        let cloud = MemoryCloudStore::new();
        cloud.seed(EntityKind::Exercise, Record::new(id("bench")));

        let first = cloud.export(None).await.unwrap();
        assert_eq!(first.data.record_count(), 1);

        let again = cloud.export(Some(first.synced_at)).await.unwrap();
        assert!(again.data.is_empty());
        assert!(again.synced_at > first.synced_at);

        cloud.seed(EntityKind::Exercise, Record::new(id("row")));
        let delta = cloud.export(Some(again.synced_at)).await.unwrap();
        assert_eq!(delta.data.record_count(), 1);
        assert_eq!(cloud.export_calls().len(), 3);
    }

    #[tokio::test]
    async fn test_cloud_import_keeps_newer_copy() {
        let cloud = MemoryCloudStore::new();
        let newer = Record::new(id("p1")).with_field("name", "new").with_updated_at(ts(200));
        let older = Record::new(id("p1")).with_field("name", "old").with_updated_at(ts(100));

        cloud.import(import_of(EntityKind::Program, newer.clone())).await.unwrap();
        cloud.import(import_of(EntityKind::Program, older)).await.unwrap();

        assert_eq!(cloud.get(EntityKind::Program, &id("p1")), Some(newer));
        assert_eq!(cloud.imports().len(), 2);
    }

    #[tokio::test]
    async fn test_cloud_failure_injection() {
        let cloud = MemoryCloudStore::new();

        cloud.set_offline(true);
        let err = cloud.export(None).await.unwrap_err();
        assert!(matches!(err, Error::Network(_)));
        cloud.set_offline(false);

        cloud.fail_next_import(500, "Internal error");
        let err = cloud
            .import(import_of(EntityKind::Exercise, Record::new(id("x"))))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Server { status: 500, .. }));
        assert_eq!(cloud.record_count(), 0);

        // Only the next call fails.
        cloud
            .import(import_of(EntityKind::Exercise, Record::new(id("x"))))
            .await
            .unwrap();
        assert_eq!(cloud.record_count(), 1);
    }
}
