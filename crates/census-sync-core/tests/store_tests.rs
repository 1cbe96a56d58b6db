//! Record store integration tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use census_sync_core::cache::CacheResult;
use census_sync_core::db::DbError;
use census_sync_core::guard::parse_timestamp;
use census_sync_core::models::Namespace;
use census_sync_core::patch::patch_of;
use census_sync_core::remote::{RecordEvent, RemoteOp};
use census_sync_core::retry::RetryPolicy;
use census_sync_core::{
    CacheError, DailyRecord, InMemoryRemote, LocalCache, RecordStore, RemoteBackend, RemoteSyncStore,
    SaveOutcome, SqliteCache, SyncConfig, SyncError,
};
use serde_json::json;

fn test_config(max_retries: usize) -> SyncConfig {
    let mut config = SyncConfig {
        bed_ids: vec!["R1".into(), "R2".into(), "R3".into(), "NEO1".into()],
        ..SyncConfig::default()
    };
    config.retry.max_retries = max_retries;
    config
}

fn setup_with_retries(max_retries: usize) -> (Arc<InMemoryRemote>, RecordStore) {
    let remote = Arc::new(InMemoryRemote::new());
    let backend: Arc<dyn RemoteBackend> = remote.clone();
    let store = RecordStore::open(&test_config(max_retries), Some(backend)).unwrap();
    (remote, store)
}

fn setup() -> (Arc<InMemoryRemote>, RecordStore) {
    setup_with_retries(0)
}

/// A second editor writing to the same remote.
fn other_client(remote: &Arc<InMemoryRemote>) -> RemoteSyncStore {
    let backend: Arc<dyn RemoteBackend> = remote.clone();
    RemoteSyncStore::new(backend, RetryPolicy::none())
}

fn record_with_patient(date: &str, bed: &str, name: &str) -> DailyRecord {
    let mut record = DailyRecord::blank(date, &["R1", "R2", "R3", "NEO1"]);
    record.beds.get_mut(bed).unwrap().patient_name = name.into();
    record
}

#[tokio::test(start_paused = true)]
async fn test_save_with_failing_remote_is_readable_locally() {
    let (remote, store) = setup_with_retries(3);
    remote.set_offline(true);

    let outcome = store
        .save(record_with_patient("2025-03-01", "R1", "Ana Tuki"), None)
        .await
        .unwrap();

    assert!(matches!(outcome, SaveOutcome::RemoteFailed(_)));
    assert_eq!(remote.calls(RemoteOp::SetFull), 4);

    let local = store.get_for_date("2025-03-01").await.unwrap().unwrap();
    assert_eq!(local.beds["R1"].patient_name, "Ana Tuki");
}

#[tokio::test]
async fn test_stale_save_raises_concurrency_and_keeps_local_write() {
    let (remote, store) = setup();

    let SaveOutcome::Synced { last_updated: base } = store
        .save(record_with_patient("2025-03-01", "R1", "Ana"), None)
        .await
        .unwrap()
    else {
        panic!("first save should sync");
    };

    // Another editor saves on top of the same base.
    other_client(&remote)
        .save_full_document(
            Namespace::Production,
            &record_with_patient("2025-03-01", "R1", "Theirs"),
            Some(base),
        )
        .await
        .unwrap();

    let mut mine = store.get_for_date("2025-03-01").await.unwrap().unwrap();
    mine.beds.get_mut("R1").unwrap().patient_name = "Mine".into();
    let result = store.save(mine, Some(base)).await;

    match result {
        Err(SyncError::Concurrency { date, base: reported, remote_updated }) => {
            assert_eq!(date, "2025-03-01");
            assert_eq!(reported, base);
            assert!(remote_updated > base);
        }
        other => panic!("expected concurrency error, got {:?}", other),
    }

    let local = store.get_for_date("2025-03-01").await.unwrap().unwrap();
    assert_eq!(local.beds["R1"].patient_name, "Mine");

    let remote_doc = remote.document(Namespace::Production, "2025-03-01").unwrap();
    assert_eq!(remote_doc["beds"]["R1"]["patientName"], "Theirs");
}

#[tokio::test]
async fn test_guarded_save_chain_uses_adopted_server_time() {
    let (_remote, store) = setup();

    let mut record = record_with_patient("2025-03-01", "R1", "Ana");
    for name in ["Ana", "Ana Tuki", "Ana Tuki Pakarati"] {
        let base = store
            .get_for_date("2025-03-01")
            .await
            .unwrap()
            .map(|r| r.last_updated);
        record.beds.get_mut("R1").unwrap().patient_name = name.into();
        assert!(store.save(record.clone(), base).await.unwrap().is_synced());
    }
}

#[tokio::test]
async fn test_update_partial_changes_only_that_field() {
    let (remote, store) = setup();
    store
        .save(record_with_patient("2025-03-01", "R2", "Luis"), None)
        .await
        .unwrap();
    let before = store.get_for_date("2025-03-01").await.unwrap().unwrap();

    let after = store
        .update_partial(
            "2025-03-01",
            patch_of([("beds.R1.patientName", json!("Jane Doe"))]),
        )
        .await
        .unwrap();

    let mut expected = before.clone();
    expected.beds.get_mut("R1").unwrap().patient_name = "Jane Doe".into();
    assert_eq!(after, expected);

    store.flush_remote().await;
    let doc = remote.document(Namespace::Production, "2025-03-01").unwrap();
    assert_eq!(doc["beds"]["R1"]["patientName"], "Jane Doe");
    assert_eq!(doc["beds"]["R2"]["patientName"], "Luis");
    assert_eq!(store.patch_stats().unwrap().delivered, 1);

    // Delivery hands the server stamp back to the local copy.
    let stamped = parse_timestamp(&doc["lastUpdated"]).unwrap();
    assert!(stamped > before.last_updated);
    expected.last_updated = stamped;
    assert_eq!(store.get_for_date("2025-03-01").await.unwrap().unwrap(), expected);
}

#[tokio::test]
async fn test_own_patch_does_not_stale_next_save() {
    let (remote, store) = setup();
    store
        .save(record_with_patient("2025-03-01", "R1", "Ana"), None)
        .await
        .unwrap();
    store
        .update_partial("2025-03-01", patch_of([("beds.R1.diagnosis", json!("Asma"))]))
        .await
        .unwrap();
    store.flush_remote().await;

    let mut record = store.get_for_date("2025-03-01").await.unwrap().unwrap();
    let base = record.last_updated;
    record.beds.get_mut("R2").unwrap().patient_name = "Luis".into();
    assert!(store.save(record, Some(base)).await.unwrap().is_synced());

    let doc = remote.document(Namespace::Production, "2025-03-01").unwrap();
    assert_eq!(doc["beds"]["R1"]["diagnosis"], "Asma");
    assert_eq!(doc["beds"]["R2"]["patientName"], "Luis");
}

#[tokio::test]
async fn test_path_update_from_other_client_stales_older_base() {
    let (remote, store) = setup();
    let SaveOutcome::Synced { last_updated: base } = store
        .save(record_with_patient("2025-03-01", "R1", "Ana"), None)
        .await
        .unwrap()
    else {
        panic!("first save should sync");
    };

    let patched = other_client(&remote)
        .update_paths(
            Namespace::Production,
            "2025-03-01",
            &patch_of([("beds.R2.patientName", json!("Theirs"))]),
        )
        .await
        .unwrap();
    assert!(patched > base);

    let mut mine = store.get_for_date("2025-03-01").await.unwrap().unwrap();
    mine.beds.get_mut("R3").unwrap().patient_name = "Mine".into();
    match store.save(mine, Some(base)).await {
        Err(SyncError::Concurrency { remote_updated, .. }) => assert_eq!(remote_updated, patched),
        other => panic!("expected concurrency error, got {:?}", other),
    }

    let doc = remote.document(Namespace::Production, "2025-03-01").unwrap();
    assert_eq!(doc["beds"]["R2"]["patientName"], "Theirs");
}

#[tokio::test]
async fn test_keyed_map_corruption_is_repaired_on_resync() {
    let (remote, store) = setup();
    store
        .save(DailyRecord::blank("2025-03-01", store.bed_ids()), None)
        .await
        .unwrap();

    store
        .update_partial("2025-03-01", patch_of([("nursesDayShift.0", json!("Rosa"))]))
        .await
        .unwrap();
    store.flush_remote().await;

    let doc = remote.document(Namespace::Production, "2025-03-01").unwrap();
    assert!(doc["nursesDayShift"].is_object());

    let resynced = store.resync_from_remote("2025-03-01").await.unwrap().unwrap();
    assert_eq!(resynced.nurses_day_shift, vec!["Rosa", ""]);
    assert_eq!(
        store.get_for_date("2025-03-01").await.unwrap().unwrap().nurses_day_shift,
        vec!["Rosa", ""]
    );
}

#[tokio::test]
async fn test_failed_remote_patch_is_swallowed() {
    let (remote, store) = setup();
    remote.set_offline(true);

    let updated = store
        .update_partial("2025-03-01", patch_of([("beds.R3.diagnosis", json!("Asma"))]))
        .await
        .unwrap();
    store.flush_remote().await;

    assert_eq!(updated.beds["R3"].diagnosis, "Asma");
    assert_eq!(store.patch_stats().unwrap().failed, 1);
    assert_eq!(
        store.get_for_date("2025-03-01").await.unwrap().unwrap().beds["R3"].diagnosis,
        "Asma"
    );
}

#[tokio::test]
async fn test_demo_and_production_never_cross() {
    let (remote, store) = setup();
    store
        .save(record_with_patient("2025-03-01", "R1", "Production Patient"), None)
        .await
        .unwrap();

    store.set_demo_mode_active(true);
    assert_eq!(store.namespace(), Namespace::Demo);
    assert!(store.get_for_date("2025-03-01").await.unwrap().is_none());

    let outcome = store
        .save(record_with_patient("2025-03-01", "R1", "Demo Patient"), None)
        .await
        .unwrap();
    assert_eq!(outcome, SaveOutcome::LocalOnly);
    store
        .update_partial("2025-03-01", patch_of([("beds.R2.patientName", json!("Demo 2"))]))
        .await
        .unwrap();
    assert_eq!(
        store.get_for_date("2025-03-01").await.unwrap().unwrap().beds["R1"].patient_name,
        "Demo Patient"
    );

    store.set_demo_mode_active(false);
    let production = store.get_for_date("2025-03-01").await.unwrap().unwrap();
    assert_eq!(production.beds["R1"].patient_name, "Production Patient");
    assert_eq!(production.beds["R2"].patient_name, "");

    assert_eq!(remote.calls(RemoteOp::SetFull), 1);
    assert_eq!(remote.calls(RemoteOp::UpdatePaths), 0);
    assert_eq!(remote.document_count(Namespace::Demo), 0);
}

#[tokio::test]
async fn test_delete_day_removes_both_copies_and_keeps_history() {
    let (remote, store) = setup();
    store
        .save(record_with_patient("2025-03-01", "R1", "Ana"), None)
        .await
        .unwrap();
    store
        .save(record_with_patient("2025-03-01", "R1", "Ana Tuki"), None)
        .await
        .unwrap();

    store.delete_day("2025-03-01").await.unwrap();

    assert!(store.get_for_date("2025-03-01").await.unwrap().is_none());
    assert!(remote.document(Namespace::Production, "2025-03-01").is_none());

    let history = store.history("2025-03-01").await.unwrap();
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|s| s.verify()));
    assert_eq!(history[1].payload["beds"]["R1"]["patientName"], "Ana Tuki");
}

#[tokio::test]
async fn test_resync_overwrites_local_copy() {
    let (remote, store) = setup();
    store.set_remote_enabled(false);
    store
        .save(record_with_patient("2025-03-01", "R1", "Local"), None)
        .await
        .unwrap();

    other_client(&remote)
        .save_full_document(
            Namespace::Production,
            &record_with_patient("2025-03-01", "R1", "Remote"),
            None,
        )
        .await
        .unwrap();

    assert!(matches!(
        store.resync_from_remote("2025-03-01").await,
        Err(SyncError::RemoteDisabled)
    ));

    store.set_remote_enabled(true);
    let pulled = store.resync_from_remote("2025-03-01").await.unwrap().unwrap();
    assert_eq!(pulled.beds["R1"].patient_name, "Remote");
    assert_eq!(
        store.get_for_date("2025-03-01").await.unwrap().unwrap(),
        pulled
    );

    assert!(store.resync_from_remote("2025-03-09").await.unwrap().is_none());
}

#[tokio::test]
async fn test_resync_surfaces_transient_error_when_retries_exhausted() {
    let (remote, store) = setup();
    remote.set_offline(true);

    assert!(matches!(
        store.resync_from_remote("2025-03-01").await,
        Err(SyncError::TransientIo(_))
    ));
}

#[tokio::test]
async fn test_pull_range_backfills_only_missing_days() {
    let (remote, store) = setup();
    let other = other_client(&remote);
    for (date, name) in [
        ("2025-03-01", "Remote 1"),
        ("2025-03-02", "Remote 2"),
        ("2025-03-03", "Remote 3"),
        ("2025-03-10", "Out of range"),
    ] {
        other
            .save_full_document(Namespace::Production, &record_with_patient(date, "R1", name), None)
            .await
            .unwrap();
    }

    store.set_remote_enabled(false);
    store
        .save(record_with_patient("2025-03-02", "R1", "Local 2"), None)
        .await
        .unwrap();
    store.set_remote_enabled(true);

    let pulled = store
        .pull_range_from_remote("2025-03-01", "2025-03-05")
        .await
        .unwrap();
    assert_eq!(pulled, vec!["2025-03-01", "2025-03-03"]);

    let march = store.month_records(2025, 3).await.unwrap();
    let names: Vec<&str> = march
        .iter()
        .map(|r| r.beds["R1"].patient_name.as_str())
        .collect();
    assert_eq!(names, vec!["Remote 1", "Local 2", "Remote 3"]);
}

#[tokio::test]
async fn test_watch_routes_to_remote() {
    let (_remote, store) = setup();
    let events: Arc<Mutex<Vec<RecordEvent>>> = Arc::default();
    let sink = Arc::clone(&events);

    let subscription = store
        .watch(
            "2025-03-01",
            Arc::new(move |e: RecordEvent| sink.lock().unwrap().push(e)),
        )
        .unwrap();
    store
        .save(record_with_patient("2025-03-01", "R1", "Ana"), None)
        .await
        .unwrap();
    drop(subscription);

    {
        let events = events.lock().unwrap();
        let confirmed = events.iter().filter(|e| !e.has_pending_writes).last().unwrap();
        assert_eq!(
            confirmed.record.as_ref().unwrap().beds["R1"].patient_name,
            "Ana"
        );
    }

    store.set_demo_mode_active(true);
    assert!(matches!(
        store.watch("2025-03-01", Arc::new(|_: RecordEvent| {})),
        Err(SyncError::RemoteDisabled)
    ));
}

#[tokio::test]
async fn test_legacy_migration_runs_once() {
    let cache = SqliteCache::open_in_memory().unwrap();
    cache
        .database()
        .lock()
        .await
        .put_legacy_blob(
            Namespace::Production,
            &json!({
                "2024-12-31": {
                    "date": "2024-12-31",
                    "beds": {"R1": {"bedId": "R1", "patientName": "Legacy"}},
                    "nursesDayShift": {"0": "Rosa"}
                }
            }),
        )
        .unwrap();

    let store = RecordStore::new(&test_config(0), Arc::new(cache), None).unwrap();
    assert!(store.migrate_legacy().await.unwrap());
    assert!(!store.migrate_legacy().await.unwrap());

    let migrated = store.get_for_date("2024-12-31").await.unwrap().unwrap();
    assert_eq!(migrated.beds["R1"].patient_name, "Legacy");
    assert_eq!(migrated.nurses_day_shift, vec!["Rosa", ""]);
    assert_eq!(migrated.technicians_night_shift.len(), 3);
}

/// Cache whose writes always fail.
struct ReadOnlyCache;

#[async_trait]
impl LocalCache for ReadOnlyCache {
    async fn get(&self, _: Namespace, _: &str) -> CacheResult<Option<DailyRecord>> {
        Ok(None)
    }

    async fn put(&self, _: Namespace, _: &DailyRecord) -> CacheResult<()> {
        Err(CacheError::Database(DbError::Constraint("disk is read-only".into())))
    }

    async fn put_if_absent(&self, _: Namespace, _: &DailyRecord) -> CacheResult<bool> {
        Err(CacheError::Database(DbError::Constraint("disk is read-only".into())))
    }

    async fn advance_last_updated(&self, _: Namespace, _: &str, _: DateTime<Utc>) -> CacheResult<bool> {
        Ok(false)
    }

    async fn delete(&self, _: Namespace, _: &str) -> CacheResult<bool> {
        Ok(false)
    }

    async fn scan_by_prefix(&self, _: Namespace, _: &str) -> CacheResult<Vec<DailyRecord>> {
        Ok(Vec::new())
    }

    async fn migrate_from_legacy_store(&self) -> CacheResult<bool> {
        Ok(false)
    }
}

#[tokio::test]
async fn test_local_write_failure_is_fatal_and_skips_remote() {
    let remote = Arc::new(InMemoryRemote::new());
    let backend: Arc<dyn RemoteBackend> = remote.clone();
    let store = RecordStore::new(&test_config(0), Arc::new(ReadOnlyCache), Some(backend)).unwrap();

    let result = store
        .save(record_with_patient("2025-03-01", "R1", "Ana"), None)
        .await;
    assert!(matches!(result, Err(SyncError::Cache(_))));
    assert_eq!(remote.calls(RemoteOp::SetFull), 0);

    let result = store
        .update_partial("2025-03-01", patch_of([("beds.R1.patientName", json!("Ana"))]))
        .await;
    assert!(matches!(result, Err(SyncError::Cache(_))));
    store.flush_remote().await;
    assert_eq!(remote.calls(RemoteOp::UpdatePaths), 0);
}

#[tokio::test]
async fn test_store_shutdown_delivers_queued_patches() {
    let (remote, store) = setup();
    store
        .update_partial("2025-03-04", patch_of([("beds.NEO1.patientName", json!("RN Tepano"))]))
        .await
        .unwrap();
    store.shutdown().await;

    let doc = remote.document(Namespace::Production, "2025-03-04").unwrap();
    assert_eq!(doc["beds"]["NEO1"]["patientName"], "RN Tepano");
}
