//! Translation between the local store and the bulk sync payload.
//!
//! Each entity kind is handled in its own pass, independently of the others.

use tracing::debug;

use fitsync_common::{EntityKind, Result, SyncPayload};
use fitsync_storage::LocalStore;

use crate::conflict::{MergeDecision, MergePolicy};

/// What an import did to the local store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportReport {
    /// Records that did not exist locally.
    pub inserted: usize,
    /// Existing records replaced by a different incoming version.
    pub updated: usize,
    /// Incoming records identical to the local copy.
    pub unchanged: usize,
    /// Incoming records older than the local copy, left alone.
    pub skipped_stale: usize,
    /// Applied records that carried a new soft-delete marker.
    pub tombstoned: usize,
}

impl ImportReport {
    /// Number of records written to the local store.
    pub fn applied(&self) -> usize {
        self.inserted + self.updated
    }
}

/// Snapshot every record of every kind from the local store.
///
/// Every kind is present in the result, possibly empty. Records are
/// ordered by identifier so an unchanged store always exports the same
/// payload.
pub fn export_local_data<L: LocalStore + ?Sized>(local: &L) -> Result<SyncPayload> {
    let mut payload = SyncPayload::new();
    for kind in EntityKind::ALL {
        let mut records = local.scan(kind)?;
        records.sort_by(|a, b| a.id.cmp(&b.id));
        debug!("Exporting {} {} records", records.len(), kind);
        payload.insert(kind, records);
    }
    Ok(payload)
}

/// Upsert every record of `payload` into the local store, keyed by identifier.
///
/// Never deletes: a kind or record missing from the payload leaves the
/// local data untouched. Deletions arrive as tombstoned records.
pub fn import_cloud_data<L: LocalStore + ?Sized>(
    local: &L,
    payload: &SyncPayload,
    policy: &MergePolicy,
) -> Result<ImportReport> {
    let mut report = ImportReport::default();
    debug!(
        "Importing {} records ({:?})",
        payload.record_count(),
        policy.strategy()
    );

    for (kind, records) in payload.iter() {
        for incoming in records {
            let existing = local.get(kind, &incoming.id)?;
            let decision = policy.decide(existing.as_ref(), incoming);

            if !decision.applies() {
                debug!("Keeping newer local {} {}", kind, incoming.id);
                report.skipped_stale += 1;
                continue;
            }
            if existing.as_ref() == Some(incoming) {
                report.unchanged += 1;
                continue;
            }
            match decision {
                MergeDecision::Insert => report.inserted += 1,
                _ => report.updated += 1,
            }

            let was_deleted = existing.as_ref().is_some_and(|r| r.is_deleted());
            if incoming.is_deleted() && !was_deleted {
                report.tombstoned += 1;
            }
            local.put(kind, incoming.clone())?;
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::MergeStrategy;
    use chrono::{DateTime, TimeZone, Utc};
    use fitsync_common::{EntityId, Record};
    use fitsync_storage::MemoryLocalStore;
    use proptest::prelude::*;
    use serde_json::json;

    fn id(s: &str) -> EntityId {
        EntityId::new(s).unwrap()
    }

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn dump(store: &MemoryLocalStore) -> Vec<(EntityKind, Vec<Record>)> {
        EntityKind::ALL
            .into_iter()
            .map(|k| (k, store.scan(k).unwrap()))
            .collect()
    }

    #[test]
    fn test_export_empty_store_has_every_kind() {
        let store = MemoryLocalStore::new();
        let payload = export_local_data(&store).unwrap();
        assert_eq!(payload.kinds().count(), EntityKind::ALL.len());
        assert!(payload.is_empty());
    }

    #[test]
    fn test_export_is_stable() {
        let store = MemoryLocalStore::new();
        store.put(EntityKind::WorkoutLog, Record::new(id("w2"))).unwrap();
        store.put(EntityKind::WorkoutLog, Record::new(id("w1"))).unwrap();
        store
            .put(EntityKind::Settings, Record::new(id("settings")).with_field("units", "kg"))
            .unwrap();

        let first = export_local_data(&store).unwrap();
        let second = export_local_data(&store).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.to_json().unwrap(), second.to_json().unwrap());

        let logs = first.records(EntityKind::WorkoutLog).unwrap();
        assert_eq!(logs[0].id.as_str(), "w1");
        assert_eq!(logs[1].id.as_str(), "w2");
    }

    #[test]
    fn test_import_inserts_and_overwrites() {
        let store = MemoryLocalStore::new();
        store
            .put(EntityKind::Exercise, Record::new(id("squat")).with_field("sets", 3))
            .unwrap();

        let mut payload = SyncPayload::new();
        payload.push(EntityKind::Exercise, Record::new(id("squat")).with_field("sets", 5));
        payload.push(EntityKind::Exercise, Record::new(id("deadlift")));

        let report = import_cloud_data(&store, &payload, &MergePolicy::default()).unwrap();
        assert_eq!(report.inserted, 1);
        assert_eq!(report.updated, 1);
        assert_eq!(
            store.get(EntityKind::Exercise, &id("squat")).unwrap().unwrap().field("sets"),
            Some(&json!(5))
        );
    }

    #[test]
    fn test_import_never_deletes_on_omission() {
        let store = MemoryLocalStore::new();
        let local_only = Record::new(id("local-only")).with_field("name", "mine");
        store.put(EntityKind::Program, local_only.clone()).unwrap();
        store.put(EntityKind::Exercise, Record::new(id("bench"))).unwrap();

        // Programs present but without the local record; exercises absent.
        let mut payload = SyncPayload::new();
        payload.push(EntityKind::Program, Record::new(id("other")));

        import_cloud_data(&store, &payload, &MergePolicy::default()).unwrap();

        assert_eq!(store.get(EntityKind::Program, &id("local-only")).unwrap(), Some(local_only));
        assert!(store.get(EntityKind::Exercise, &id("bench")).unwrap().is_some());
    }

    #[test]
    fn test_import_guarded_keeps_newer_local() {
        let store = MemoryLocalStore::new();
        let local = Record::new(id("profile")).with_field("weightKg", 75).with_updated_at(ts(300));
        store.put(EntityKind::OnboardingProfile, local.clone()).unwrap();

        let mut payload = SyncPayload::new();
        payload.push(
            EntityKind::OnboardingProfile,
            Record::new(id("profile")).with_field("weightKg", 80).with_updated_at(ts(200)),
        );

        let guarded = import_cloud_data(&store, &payload, &MergePolicy::default()).unwrap();
        assert_eq!(guarded.skipped_stale, 1);
        assert_eq!(store.get(EntityKind::OnboardingProfile, &id("profile")).unwrap(), Some(local));

        let blind = MergePolicy::new(MergeStrategy::LastWriteWins);
        let report = import_cloud_data(&store, &payload, &blind).unwrap();
        assert_eq!(report.updated, 1);
        assert_eq!(
            store
                .get(EntityKind::OnboardingProfile, &id("profile"))
                .unwrap()
                .unwrap()
                .field("weightKg"),
            Some(&json!(80))
        );
    }

    #[test]
    fn test_import_applies_tombstones() {
        let store = MemoryLocalStore::new();
        store
            .put(EntityKind::WorkoutLog, Record::new(id("w1")).with_updated_at(ts(100)))
            .unwrap();

        let mut deleted = Record::new(id("w1"));
        deleted.tombstone(ts(200));
        let mut payload = SyncPayload::new();
        payload.push(EntityKind::WorkoutLog, deleted);

        let report = import_cloud_data(&store, &payload, &MergePolicy::default()).unwrap();
        assert_eq!(report.tombstoned, 1);
        assert!(store.get(EntityKind::WorkoutLog, &id("w1")).unwrap().unwrap().is_deleted());

        // Re-applying the same tombstone changes nothing.
        let again = import_cloud_data(&store, &payload, &MergePolicy::default()).unwrap();
        assert_eq!(again.unchanged, 1);
        assert_eq!(again.tombstoned, 0);
    }

    #[test]
    fn test_import_twice_reports_unchanged() {
        let store = MemoryLocalStore::new();
        let mut payload = SyncPayload::new();
        payload.push(EntityKind::Achievement, Record::new(id("first-workout")));

        let first = import_cloud_data(&store, &payload, &MergePolicy::default()).unwrap();
        let second = import_cloud_data(&store, &payload, &MergePolicy::default()).unwrap();
        assert_eq!(first.applied(), 1);
        assert_eq!(second.applied(), 0);
        assert_eq!(second.unchanged, 1);
    }

    fn arb_kind() -> impl Strategy<Value = EntityKind> {
        prop::sample::select(EntityKind::ALL.to_vec())
    }

    fn arb_record() -> impl Strategy<Value = Record> {
        (
            "[a-d]",
            0i64..5,
            prop::option::of(0i64..1_000),
            any::<bool>(),
        )
            .prop_map(|(name, value, updated, deleted)| {
                let mut record = Record::new(EntityId::new(name).unwrap()).with_field("v", value);
                record.updated_at = updated.map(|s| Utc.timestamp_opt(s, 0).unwrap());
                if deleted {
                    record.deleted_at = Some(Utc.timestamp_opt(2_000, 0).unwrap());
                }
                record
            })
    }

    fn arb_entries() -> impl Strategy<Value = Vec<(EntityKind, Record)>> {
        prop::collection::vec((arb_kind(), arb_record()), 0..12)
    }

    proptest! {
        #[test]
        fn prop_import_is_idempotent(
            existing in arb_entries(),
            incoming in arb_entries(),
            blind in any::<bool>(),
        ) {
            let policy = if blind {
                MergePolicy::new(MergeStrategy::LastWriteWins)
            } else {
                MergePolicy::new(MergeStrategy::PreferNewer)
            };

            let mut payload = SyncPayload::new();
            for (kind, record) in incoming {
                payload.push(kind, record);
            }

            let once = MemoryLocalStore::new();
            let twice = MemoryLocalStore::new();
            for (kind, record) in existing {
                once.put(kind, record.clone()).unwrap();
                twice.put(kind, record).unwrap();
            }

            import_cloud_data(&once, &payload, &policy).unwrap();
            import_cloud_data(&twice, &payload, &policy).unwrap();
            import_cloud_data(&twice, &payload, &policy).unwrap();

            prop_assert_eq!(dump(&once), dump(&twice));
        }
    }
}
